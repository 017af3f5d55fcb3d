//! Keyframe schedules in the engine's `frame:(value)` grammar.
//!
//! The engine reads most animation parameters as piecewise schedules over
//! the frame index, e.g. `0:(1.0), 30:(1.02)`. A [`Schedule`] keeps the
//! exact wire text next to its parsed keyframes so that pre-formatted
//! user input reaches the engine byte-for-byte.
//!
//! [`normalize`] is the single entry point used by the job builder: it
//! never returns an empty schedule, which the engine would fail to parse.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Separator used when rendering multi-segment schedules.
const SEGMENT_SEPARATOR: &str = ", ";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One `frame:(value)` segment of a schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyframe {
    pub frame: u32,
    /// Raw expression between the parentheses (a number or an engine
    /// math expression such as `1.0+0.002*sin(t)`).
    pub value: String,
}

/// A non-empty schedule string plus its parsed keyframes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    text: String,
    keyframes: Vec<Keyframe>,
}

/// Errors from [`Schedule::parse`] and [`Schedule::from_keyframes`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("schedule is empty")]
    Empty,

    #[error("malformed schedule {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Schedule {
    /// Single-segment schedule holding `value` from frame 0.
    pub fn constant(value: impl fmt::Display) -> Self {
        let value = value.to_string();
        Self {
            text: format!("0:({value})"),
            keyframes: vec![Keyframe { frame: 0, value }],
        }
    }

    /// Render a schedule from explicit keyframes.
    pub fn from_keyframes(keyframes: Vec<Keyframe>) -> Result<Self, ScheduleError> {
        if keyframes.is_empty() {
            return Err(ScheduleError::Empty);
        }
        let text = keyframes
            .iter()
            .map(|k| format!("{}:({})", k.frame, k.value))
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR);
        Ok(Self { text, keyframes })
    }

    /// Parse schedule text. Segments may be separated by `,` or `;`.
    ///
    /// The original text is kept verbatim as the wire form.
    pub fn parse(input: &str) -> Result<Self, ScheduleError> {
        let malformed = |reason| ScheduleError::Malformed {
            input: input.to_string(),
            reason,
        };

        if input.trim().is_empty() {
            return Err(ScheduleError::Empty);
        }

        let mut keyframes = Vec::new();
        let mut rest = input.trim_start();

        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            if digits == 0 {
                return Err(malformed("expected a frame number"));
            }
            let frame: u32 = rest[..digits]
                .parse()
                .map_err(|_| malformed("frame number out of range"))?;

            rest = rest[digits..].trim_start();
            rest = rest
                .strip_prefix(':')
                .ok_or_else(|| malformed("expected ':' after frame number"))?
                .trim_start();
            rest = rest
                .strip_prefix('(')
                .ok_or_else(|| malformed("expected '(' before value"))?;

            let close = matching_paren(rest).ok_or_else(|| malformed("unbalanced parentheses"))?;
            let value = rest[..close].trim();
            if value.is_empty() {
                return Err(malformed("empty value"));
            }
            keyframes.push(Keyframe {
                frame,
                value: value.to_string(),
            });

            rest = rest[close + 1..].trim_start();
            if rest.is_empty() {
                break;
            }
            rest = rest
                .strip_prefix([',', ';'])
                .ok_or_else(|| malformed("expected ',' or ';' between segments"))?
                .trim_start();
        }

        Ok(Self {
            text: input.to_string(),
            keyframes,
        })
    }

    /// Keep text that looks like a schedule but does not parse cleanly.
    ///
    /// The engine's own parser is more permissive than [`Schedule::parse`]
    /// (it evaluates arbitrary expressions), so such text is passed through.
    fn verbatim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            keyframes: Vec::new(),
        }
    }

    /// Wire text sent to the engine.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Parsed segments. Empty only for pass-through text the strict parser
    /// could not read.
    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Coerce a user-supplied value into a schedule.
///
/// - absent, `null` or blank string: `default`, unchanged;
/// - number: `0:(<n>)` using the number's natural text;
/// - boolean: `0:(1)` or `0:(0)`;
/// - string with a `:` and a balanced `(...)`: unchanged;
/// - any other string: `0:(<trimmed>)`.
pub fn normalize(value: Option<&Value>, default: &Schedule) -> Schedule {
    match value {
        None | Some(Value::Null) => default.clone(),
        Some(Value::Number(n)) => Schedule::constant(n),
        Some(Value::Bool(b)) => Schedule::constant(u8::from(*b)),
        Some(Value::String(s)) => normalize_str(s, default),
        Some(other) => normalize_str(&other.to_string(), default),
    }
}

/// String half of [`normalize`].
pub fn normalize_str(value: &str, default: &Schedule) -> Schedule {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return default.clone();
    }
    if is_preformatted(value) {
        return Schedule::parse(value).unwrap_or_else(|_| Schedule::verbatim(value));
    }
    Schedule::constant(trimmed)
}

/// `true` if `s` has a colon and at least one balanced parenthesis pair.
pub fn is_preformatted(s: &str) -> bool {
    if !s.contains(':') {
        return false;
    }
    let mut depth = 0i32;
    let mut pairs = 0usize;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                pairs += 1;
            }
            _ => {}
        }
    }
    depth == 0 && pairs > 0
}

/// Byte index of the `)` closing an already-opened `(`.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
