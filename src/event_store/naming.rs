//! Table naming and statement construction
//!
//! Store ids come straight from clients, so they are encoded into
//! `[A-Za-z0-9_]` before they become part of an identifier. The encoding is
//! reversible: distinct store ids never share a table. The format
//! version is part of every table name: a new storage layout starts a new
//! table instead of migrating the old one in place.

/// Version of the on-disk event table layout
pub const PERSISTENCE_FORMAT_VERSION: u32 = 7;

/// Bound parameters used by one inserted event row
pub const COLUMNS_PER_EVENT: usize = 7;

/// Encode a store id as an identifier fragment
///
/// ASCII letters and digits are kept, `_` becomes `__` and every other
/// UTF-8 byte becomes `_` followed by two lowercase hex digits.
pub fn encode_store_id(store_id: &str) -> String {
    let mut encoded = String::with_capacity(store_id.len());
    for byte in store_id.bytes() {
        match byte {
            b'_' => encoded.push_str("__"),
            b if b.is_ascii_alphanumeric() => encoded.push(b as char),
            b => encoded.push_str(&format!("_{:02x}", b)),
        }
    }
    encoded
}

/// Name of the table holding a store's events
pub fn event_log_table_name(store_id: &str) -> String {
    format!(
        "eventlog_{}_{}",
        PERSISTENCE_FORMAT_VERSION,
        encode_store_id(store_id)
    )
}

/// Quote an identifier for use in SQL text
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Events per insert statement so that one statement stays within
/// `max_parameters` bound parameters (never less than one row)
pub fn insert_chunk_size(max_parameters: usize) -> usize {
    (max_parameters / COLUMNS_PER_EVENT).max(1)
}

/// `CREATE TABLE` statement for a store's event table
pub fn create_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            seqNum INTEGER PRIMARY KEY,
            parentSeqNum INTEGER NOT NULL,
            name TEXT NOT NULL,
            args TEXT,
            createdAt TEXT NOT NULL,
            clientId TEXT NOT NULL,
            sessionId TEXT NOT NULL
        )",
        quote_identifier(table)
    )
}

/// Multi-row `INSERT` with positional placeholders `?1..?N`
pub fn insert_statement(table: &str, rows: usize) -> String {
    let values = (0..rows)
        .map(|row| {
            let first = row * COLUMNS_PER_EVENT + 1;
            let placeholders: Vec<String> = (first..first + COLUMNS_PER_EVENT)
                .map(|i| format!("?{}", i))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} (seqNum, parentSeqNum, name, args, createdAt, clientId, sessionId) VALUES {}",
        quote_identifier(table),
        values
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_escapes_non_alphanumerics() {
        assert_eq!(encode_store_id("team42"), "team42");
        assert_eq!(encode_store_id("team-42/notes"), "team_2d42_2fnotes");
        assert_eq!(
            encode_store_id("a\"; DROP TABLE x;--"),
            "a_22_3b_20DROP_20TABLE_20x_3b_2d_2d"
        );
        assert_eq!(encode_store_id("café"), "caf_c3_a9");
    }

    #[test]
    fn test_distinct_ids_get_distinct_tables() {
        let ids = ["a-b", "a_b", "a__b", "a_5fb", "a_2db", "a b", "ab", "a\u{0}b"];
        let names: std::collections::HashSet<String> =
            ids.iter().map(|id| event_log_table_name(id)).collect();
        assert_eq!(names.len(), ids.len());
        assert_eq!(event_log_table_name("a-b"), "eventlog_7_a_2db");
        assert_eq!(event_log_table_name("a_b"), "eventlog_7_a__b");
    }

    #[test]
    fn test_table_name_embeds_version() {
        assert_eq!(event_log_table_name("store-1"), "eventlog_7_store_2d1");
    }

    #[test]
    fn test_chunk_size_stays_under_parameter_ceiling() {
        assert_eq!(insert_chunk_size(100), 14);
        assert!(insert_chunk_size(100) * COLUMNS_PER_EVENT <= 100);
        assert_eq!(insert_chunk_size(999), 142);
        assert_eq!(insert_chunk_size(3), 1);
    }

    #[test]
    fn test_insert_statement_placeholders() {
        let sql = insert_statement("eventlog_7_s", 2);
        assert!(sql.starts_with("INSERT INTO \"eventlog_7_s\""));
        assert!(sql.contains("(?1, ?2, ?3, ?4, ?5, ?6, ?7), (?8, ?9, ?10, ?11, ?12, ?13, ?14)"));
        assert!(!sql.contains("?15"));
    }
}
