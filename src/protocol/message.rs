//! Protocol message types

use bytes::Bytes;

/// Frontend message (client → server)
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// Startup message
    Startup {
        /// Protocol version
        version: i32,
        /// Connection parameters
        params: Vec<(String, String)>,
    },

    /// Password message
    Password(String),

    /// Simple query message; may carry several `;`-separated statements
    Query(String),

    /// Terminate message
    Terminate,

    /// SASL initial response message
    SaslInitialResponse {
        /// SASL mechanism name (e.g., "SCRAM-SHA-256")
        mechanism: String,
        /// SASL client first message data
        data: Vec<u8>,
    },

    /// SASL response message
    SaslResponse {
        /// SASL client final message data
        data: Vec<u8>,
    },

    /// SSLRequest message (TLS negotiation)
    SslRequest,

    /// A chunk of COPY FROM STDIN payload
    CopyData(Bytes),

    /// End of COPY FROM STDIN payload
    CopyDone,

    /// Abort COPY FROM STDIN with the given reason
    CopyFail(String),
}

/// Backend message (server → client)
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Authentication request
    Authentication(AuthenticationMessage),

    /// Backend key data (for cancellation)
    BackendKeyData {
        /// Process ID
        process_id: i32,
        /// Secret key
        secret_key: i32,
    },

    /// Command complete
    CommandComplete(String),

    /// Server entered COPY FROM STDIN mode
    CopyInResponse(CopyResponse),

    /// Server entered COPY TO STDOUT mode
    CopyOutResponse(CopyResponse),

    /// Server entered bidirectional copy mode
    CopyBothResponse(CopyResponse),

    /// A chunk of COPY TO STDOUT payload
    CopyData(Bytes),

    /// End of COPY TO STDOUT payload
    CopyDone,

    /// Data row
    DataRow(Vec<Option<Bytes>>),

    /// Empty query string was submitted
    EmptyQueryResponse,

    /// Error response
    ErrorResponse(ErrorFields),

    /// Notice response
    NoticeResponse(ErrorFields),

    /// Parameter status
    ParameterStatus {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },

    /// Ready for query
    ReadyForQuery {
        /// Transaction status
        status: u8,
    },

    /// Row description
    RowDescription(Vec<FieldDescription>),
}

/// Authentication message types
#[derive(Debug, Clone)]
pub enum AuthenticationMessage {
    /// Authentication OK
    Ok,

    /// Cleartext password required
    CleartextPassword,

    /// MD5 password required
    Md5Password {
        /// Salt for MD5 hash
        salt: [u8; 4],
    },

    /// SASL authentication mechanisms available (Postgres 10+)
    Sasl {
        /// List of SASL mechanism names (e.g., ["SCRAM-SHA-256"])
        mechanisms: Vec<String>,
    },

    /// SASL continuation message (server challenge)
    SaslContinue {
        /// SASL server first/continue message data
        data: Vec<u8>,
    },

    /// SASL final message (server verification)
    SaslFinal {
        /// SASL server final message data
        data: Vec<u8>,
    },
}

/// Body shared by the three copy-response messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall format: 0 = text, 1 = binary
    pub format: i8,
    /// Per-column format codes
    pub column_formats: Vec<i16>,
}

impl CopyResponse {
    /// Whether the payload is in binary COPY format
    pub fn is_binary(&self) -> bool {
        self.format == 1
    }
}

/// Field description (column metadata)
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: i32,
    /// Column attribute number (0 if not a table column)
    pub column_attr: i16,
    /// Data type OID
    pub type_oid: u32,
    /// Data type size
    pub type_size: i16,
    /// Type modifier
    pub type_modifier: i32,
    /// Format code (0 = text, 1 = binary)
    pub format_code: i16,
}

/// Error/notice fields
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity (ERROR, WARNING, etc.)
    pub severity: Option<String>,
    /// SQLSTATE code
    pub code: Option<String>,
    /// Human-readable message
    pub message: Option<String>,
    /// Additional detail
    pub detail: Option<String>,
    /// Hint
    pub hint: Option<String>,
    /// Position in query string
    pub position: Option<String>,
}

impl ErrorFields {
    /// Render the fields the way `psql` prints a server error:
    /// `ERROR:  message` followed by optional `DETAIL:` and `HINT:` lines.
    pub fn to_report(&self) -> String {
        let severity = self.severity.as_deref().unwrap_or("ERROR");
        let mut out = format!("{}:  {}", severity, self.message.as_deref().unwrap_or(""));
        if let Some(ref detail) = self.detail {
            out.push_str("\nDETAIL:  ");
            out.push_str(detail);
        }
        if let Some(ref hint) = self.hint {
            out.push_str("\nHINT:  ");
            out.push_str(hint);
        }
        out
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref msg) = self.message {
            write!(f, "{}", msg)?;
        }
        if let Some(ref code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_includes_detail_and_hint() {
        let fields = ErrorFields {
            severity: Some("ERROR".into()),
            code: Some("42P01".into()),
            message: Some("relation \"missing\" does not exist".into()),
            detail: Some("some detail".into()),
            hint: Some("try another table".into()),
            position: Some("15".into()),
        };

        let report = fields.to_report();
        assert!(report.starts_with("ERROR:  relation \"missing\" does not exist"));
        assert!(report.contains("\nDETAIL:  some detail"));
        assert!(report.ends_with("\nHINT:  try another table"));
    }

    #[test]
    fn test_error_report_defaults_severity() {
        let fields = ErrorFields {
            message: Some("boom".into()),
            ..Default::default()
        };
        assert_eq!(fields.to_report(), "ERROR:  boom");
    }
}
