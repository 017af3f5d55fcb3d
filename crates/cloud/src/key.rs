//! Destination keys for uploaded artifacts.

/// Fallback file name when the artifact name is empty after sanitizing.
const FALLBACK_NAME: &str = "output";

/// `runs/<run-id>/<file-name>`, with whitespace and path separators in the
/// file name replaced by `_`.
pub fn storage_key(run_id: &str, file_name: &str) -> String {
    format!("runs/{run_id}/{}", sanitize(file_name))
}

fn sanitize(file_name: &str) -> String {
    let cleaned: String = file_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}
