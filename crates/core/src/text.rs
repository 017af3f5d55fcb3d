//! Bounded text tails for diagnostics.

/// Last `max_chars` characters of `text`.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// Append-only buffer that keeps only the most recent characters.
///
/// Used to capture engine output without letting a chatty process grow
/// memory without bound.
#[derive(Debug, Clone)]
pub struct TailBuffer {
    buf: String,
    max_chars: usize,
}

impl TailBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buf: String::new(),
            max_chars,
        }
    }

    /// Append `line` followed by a newline, then trim the front.
    pub fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        // Trim lazily so the hot path stays an append.
        if self.buf.len() > self.max_chars.saturating_mul(8) {
            self.compact();
        }
    }

    /// Current tail text.
    pub fn snapshot(&self) -> String {
        tail(&self.buf, self.max_chars).to_string()
    }

    fn compact(&mut self) {
        let kept = tail(&self.buf, self.max_chars).len();
        let cut = self.buf.len() - kept;
        self.buf.drain(..cut);
    }
}
