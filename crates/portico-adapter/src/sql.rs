//! Coarse SQL classification and script splitting.
//!
//! The gateway never parses SQL. It only needs the leading keyword to route
//! writes to the primary, recognize transaction-control statements, and
//! answer `describe` requests; and a quote-aware split to run multi-statement
//! scripts.

/// Leading keywords that classify a statement as a write.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "REPLACE",
];

/// Leading keywords that classify a statement as DDL.
const DDL_KEYWORDS: &[&str] = &["CREATE", "DROP", "ALTER"];

/// Extract the first keyword of a statement, uppercased.
pub fn leading_keyword(sql: &str) -> String {
    sql.trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Whether the statement must be routed to the primary connection.
pub fn is_write(sql: &str) -> bool {
    let keyword = leading_keyword(sql);
    WRITE_KEYWORDS.iter().any(|k| *k == keyword)
}

/// Whether the statement is DDL.
pub fn is_ddl(sql: &str) -> bool {
    let keyword = leading_keyword(sql);
    DDL_KEYWORDS.iter().any(|k| *k == keyword)
}

/// Transaction-control classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnControl {
    /// `BEGIN` / `START TRANSACTION`
    Begin,
    /// `COMMIT` / `END`
    Commit,
    /// `ROLLBACK`
    Rollback,
}

/// Detect transaction-control statements by leading keyword.
pub fn txn_control(sql: &str) -> Option<TxnControl> {
    match leading_keyword(sql).as_str() {
        "BEGIN" | "START" => Some(TxnControl::Begin),
        "COMMIT" | "END" => Some(TxnControl::Commit),
        "ROLLBACK" => Some(TxnControl::Rollback),
        _ => None,
    }
}

/// Split a SQL script into individual statements.
///
/// Splits on `;` while respecting single-quoted strings, double-quoted
/// identifiers, and `--` line comments. Empty fragments are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;

    while let Some(c) = chars.next() {
        if in_line_comment {
            current.push(c);
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }

        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(c);
            }
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                in_line_comment = true;
                current.push(c);
            }
            ';' if !in_single && !in_double => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let stmt = current.trim();
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }

    statements
}
