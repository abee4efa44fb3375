//! Query results in text format
//!
//! A [`PgResult`] is one statement's outcome inside a simple-query exchange:
//! a row set, a command tag, an error report, or the announcement that the
//! server switched into COPY mode. Values are kept as the raw text the server
//! sent and decoded on access.

use crate::protocol::{CopyResponse, ErrorFields, FieldDescription};
use crate::{Error, Result};
use bytes::Bytes;

/// Outcome category of a single statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    /// The query string contained no statement
    EmptyQuery,
    /// Statement completed without returning rows
    CommandOk,
    /// Statement returned a row set (possibly empty)
    TuplesOk,
    /// Server is sending COPY TO STDOUT data
    CopyOut,
    /// Server is waiting for COPY FROM STDIN data
    CopyIn,
    /// Bidirectional copy (replication)
    CopyBoth,
    /// Statement failed
    FatalError,
}

impl ResultStatus {
    /// `CommandOk` or `TuplesOk`
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CommandOk | Self::TuplesOk)
    }

    /// One of the three COPY statuses
    pub fn is_copy(&self) -> bool {
        matches!(self, Self::CopyOut | Self::CopyIn | Self::CopyBoth)
    }

    /// libpq-style name, e.g. `PGRES_TUPLES_OK`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyQuery => "PGRES_EMPTY_QUERY",
            Self::CommandOk => "PGRES_COMMAND_OK",
            Self::TuplesOk => "PGRES_TUPLES_OK",
            Self::CopyOut => "PGRES_COPY_OUT",
            Self::CopyIn => "PGRES_COPY_IN",
            Self::CopyBoth => "PGRES_COPY_BOTH",
            Self::FatalError => "PGRES_FATAL_ERROR",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one statement
#[derive(Debug, Clone)]
pub struct PgResult {
    status: ResultStatus,
    fields: Vec<FieldDescription>,
    rows: Vec<Vec<Option<Bytes>>>,
    command_tag: Option<String>,
    copy: Option<CopyResponse>,
    error: Option<ErrorFields>,
}

impl PgResult {
    fn with_status(status: ResultStatus) -> Self {
        Self {
            status,
            fields: Vec::new(),
            rows: Vec::new(),
            command_tag: None,
            copy: None,
            error: None,
        }
    }

    pub(crate) fn empty_query() -> Self {
        Self::with_status(ResultStatus::EmptyQuery)
    }

    pub(crate) fn command(tag: String) -> Self {
        let mut result = Self::with_status(ResultStatus::CommandOk);
        result.command_tag = Some(tag);
        result
    }

    pub(crate) fn tuples(
        fields: Vec<FieldDescription>,
        rows: Vec<Vec<Option<Bytes>>>,
        tag: String,
    ) -> Self {
        Self {
            status: ResultStatus::TuplesOk,
            fields,
            rows,
            command_tag: Some(tag),
            copy: None,
            error: None,
        }
    }

    pub(crate) fn copy(status: ResultStatus, response: CopyResponse) -> Self {
        let mut result = Self::with_status(status);
        result.copy = Some(response);
        result
    }

    pub(crate) fn error(fields: ErrorFields) -> Self {
        let mut result = Self::with_status(ResultStatus::FatalError);
        result.error = Some(fields);
        result
    }

    /// Outcome category
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    /// Number of rows (0 unless `TuplesOk`)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns (0 unless `TuplesOk`)
    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    /// Column descriptions in result order
    pub fn columns(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// Name of column `col`
    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.fields.get(col).map(|f| f.name.as_str())
    }

    /// Index of the first column called `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Type OID of column `col`
    pub fn column_type_oid(&self, col: usize) -> Option<u32> {
        self.fields.get(col).map(|f| f.type_oid)
    }

    /// Raw text of a cell; `None` for SQL NULL
    pub fn get_bytes(&self, row: usize, col: usize) -> Result<Option<&Bytes>> {
        let cells = self.rows.get(row).ok_or_else(|| {
            Error::Decode(format!(
                "row {} out of range ({} rows)",
                row,
                self.rows.len()
            ))
        })?;
        let cell = cells.get(col).ok_or_else(|| {
            Error::Decode(format!(
                "column {} out of range ({} columns)",
                col,
                cells.len()
            ))
        })?;
        Ok(cell.as_ref())
    }

    /// Whether a cell is SQL NULL. Out-of-range cells count as NULL.
    pub fn is_null(&self, row: usize, col: usize) -> bool {
        !matches!(self.get_bytes(row, col), Ok(Some(_)))
    }

    /// Cell as text, `None` for NULL
    pub fn get_opt_str(&self, row: usize, col: usize) -> Result<Option<&str>> {
        match self.get_bytes(row, col)? {
            Some(raw) => std::str::from_utf8(raw)
                .map(Some)
                .map_err(|e| Error::Decode(format!("invalid UTF-8 in column {}: {}", col, e))),
            None => Ok(None),
        }
    }

    /// Cell as text; NULL is an error
    pub fn get_string(&self, row: usize, col: usize) -> Result<String> {
        self.non_null(row, col).map(str::to_string)
    }

    /// Cell parsed as `bigint`
    pub fn get_int64(&self, row: usize, col: usize) -> Result<i64> {
        self.parse(row, col, "bigint")
    }

    /// Cell parsed as `integer`
    pub fn get_int32(&self, row: usize, col: usize) -> Result<i32> {
        self.parse(row, col, "integer")
    }

    /// Cell parsed as `double precision`
    pub fn get_double(&self, row: usize, col: usize) -> Result<f64> {
        let text = self.non_null(row, col)?;
        match text {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => text
                .parse()
                .map_err(|_| Error::Decode(format!("\"{}\" is not a valid double precision", text))),
        }
    }

    /// Cell parsed as `boolean` (`t` / `f`)
    pub fn get_bool(&self, row: usize, col: usize) -> Result<bool> {
        match self.non_null(row, col)? {
            "t" | "true" => Ok(true),
            "f" | "false" => Ok(false),
            other => Err(Error::Decode(format!("\"{}\" is not a valid boolean", other))),
        }
    }

    /// Command tag from CommandComplete, e.g. `INSERT 0 3`
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// Rows affected according to the command tag
    pub fn affected_rows(&self) -> Option<u64> {
        let tag = self.command_tag.as_deref()?;
        let mut words = tag.split_whitespace();
        match words.next()? {
            "INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MOVE" | "FETCH" | "COPY" | "MERGE" => {
                words.last()?.parse().ok()
            }
            _ => None,
        }
    }

    /// Server error report; empty unless `FatalError`
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(ErrorFields::to_report)
            .unwrap_or_default()
    }

    /// Structured error fields
    pub fn error_fields(&self) -> Option<&ErrorFields> {
        self.error.as_ref()
    }

    /// Copy format announced by the server; only set for COPY statuses
    pub fn copy_response(&self) -> Option<&CopyResponse> {
        self.copy.as_ref()
    }

    fn non_null(&self, row: usize, col: usize) -> Result<&str> {
        self.get_opt_str(row, col)?.ok_or_else(|| {
            Error::Decode(format!("value at row {} column {} is NULL", row, col))
        })
    }

    fn parse<T: std::str::FromStr>(&self, row: usize, col: usize, type_name: &str) -> Result<T> {
        let text = self.non_null(row, col)?;
        text.trim()
            .parse()
            .map_err(|_| Error::Decode(format!("\"{}\" is not a valid {}", text, type_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, type_oid: u32) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format_code: 0,
        }
    }

    fn sample() -> PgResult {
        PgResult::tuples(
            vec![field("id", 20), field("name", 25), field("ok", 16), field("ratio", 701)],
            vec![
                vec![
                    Some(Bytes::from_static(b"1")),
                    Some(Bytes::from_static(b"alice")),
                    Some(Bytes::from_static(b"t")),
                    Some(Bytes::from_static(b"0.5")),
                ],
                vec![
                    Some(Bytes::from_static(b"-9000000000")),
                    None,
                    Some(Bytes::from_static(b"f")),
                    Some(Bytes::from_static(b"NaN")),
                ],
            ],
            "SELECT 2".to_string(),
        )
    }

    #[test]
    fn test_tuples_accessors() {
        let result = sample();
        assert_eq!(result.status(), ResultStatus::TuplesOk);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.column_count(), 4);
        assert_eq!(result.column_name(1), Some("name"));
        assert_eq!(result.column_index("ok"), Some(2));
        assert_eq!(result.column_type_oid(0), Some(20));
        assert_eq!(result.column_name(9), None);

        assert_eq!(result.get_int64(0, 0).unwrap(), 1);
        assert_eq!(result.get_int32(0, 0).unwrap(), 1);
        assert_eq!(result.get_int64(1, 0).unwrap(), -9_000_000_000);
        assert!(result.get_int32(1, 0).is_err());
        assert_eq!(result.get_string(0, 1).unwrap(), "alice");
        assert!(result.get_bool(0, 2).unwrap());
        assert!(!result.get_bool(1, 2).unwrap());
        assert_eq!(result.get_double(0, 3).unwrap(), 0.5);
        assert!(result.get_double(1, 3).unwrap().is_nan());
    }

    #[test]
    fn test_null_handling() {
        let result = sample();
        assert!(result.is_null(1, 1));
        assert!(!result.is_null(0, 1));
        assert!(result.is_null(7, 0));
        assert_eq!(result.get_opt_str(1, 1).unwrap(), None);
        assert!(matches!(result.get_string(1, 1), Err(Error::Decode(_))));
    }

    #[test]
    fn test_out_of_range() {
        let result = sample();
        assert!(matches!(result.get_bytes(2, 0), Err(Error::Decode(_))));
        assert!(matches!(result.get_bytes(0, 4), Err(Error::Decode(_))));
    }

    #[test]
    fn test_invalid_number() {
        let result = sample();
        let err = result.get_int64(0, 1).unwrap_err();
        assert!(err.to_string().contains("\"alice\" is not a valid bigint"));
    }

    #[test]
    fn test_affected_rows() {
        assert_eq!(PgResult::command("INSERT 0 3".into()).affected_rows(), Some(3));
        assert_eq!(PgResult::command("UPDATE 7".into()).affected_rows(), Some(7));
        assert_eq!(PgResult::command("COPY 42".into()).affected_rows(), Some(42));
        assert_eq!(PgResult::command("CREATE TABLE".into()).affected_rows(), None);
        assert_eq!(sample().affected_rows(), Some(2));
    }

    #[test]
    fn test_error_result() {
        let result = PgResult::error(ErrorFields {
            severity: Some("ERROR".into()),
            code: Some("42601".into()),
            message: Some("syntax error at or near \"SELEC\"".into()),
            ..Default::default()
        });
        assert_eq!(result.status(), ResultStatus::FatalError);
        assert!(!result.status().is_success());
        assert_eq!(result.error_message(), "ERROR:  syntax error at or near \"SELEC\"");
        assert_eq!(result.error_fields().and_then(|f| f.code.as_deref()), Some("42601"));
        assert_eq!(result.row_count(), 0);
    }

    #[test]
    fn test_status_classification() {
        assert!(ResultStatus::CommandOk.is_success());
        assert!(ResultStatus::TuplesOk.is_success());
        assert!(!ResultStatus::EmptyQuery.is_success());
        assert!(ResultStatus::CopyIn.is_copy());
        assert!(!ResultStatus::FatalError.is_copy());
        assert_eq!(ResultStatus::CopyOut.to_string(), "PGRES_COPY_OUT");
        assert_eq!(PgResult::empty_query().error_message(), "");
    }

    #[test]
    fn test_copy_result_carries_format() {
        let result = PgResult::copy(
            ResultStatus::CopyOut,
            CopyResponse {
                format: 1,
                column_formats: vec![1, 1],
            },
        );
        assert!(result.copy_response().unwrap().is_binary());
        assert_eq!(result.command_tag(), None);
    }
}
