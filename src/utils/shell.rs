//! Shell escaping and quoting utilities.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Escape an entire command string for sh -c execution.
/// Wraps entire command in single quotes and escapes embedded quotes.
pub fn escape_command_for_shell(command: &str) -> String {
    format!("'{}'", escape_single_quote_content(command))
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

/// Join a directory and a relative entry with exactly one `/` between them.
/// Remote paths are always POSIX, regardless of the operator's platform.
pub fn join_remote(dir: &str, entry: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let entry = entry.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{}", entry)
    } else {
        format!("{}/{}", dir, entry)
    }
}
