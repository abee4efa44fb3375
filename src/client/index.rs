//! Index metadata

use super::pg_connection::PgConnection;

/// One index on a remote table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name
    pub name: String,
    /// Indexed column expressions, in key order
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness
    pub is_unique: bool,
    /// Whether the index backs the primary key
    pub is_primary: bool,
}

impl PgConnection {
    /// Indexes of `table_name`.
    ///
    /// Index metadata is not collected; the list is always empty.
    pub fn get_index_info(&self, _table_name: &str) -> Vec<IndexInfo> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_info_is_empty() {
        assert!(PgConnection::default().get_index_info("orders").is_empty());
    }
}
