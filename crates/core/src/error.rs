/// Domain errors raised while turning an inbound request into a job.
///
/// Everything past request coercion has a default, so validation is the
/// only way a run can fail before it starts.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: field '{field}' {message}")]
    Validation { field: String, message: String },
}

impl CoreError {
    /// Build a [`CoreError::Validation`] for `field`.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The offending field name.
    pub fn field(&self) -> &str {
        match self {
            Self::Validation { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_names_field() {
        let err = CoreError::invalid("width", "must be an integer, got \"wide\"");
        assert_eq!(
            err.to_string(),
            "Validation failed: field 'width' must be an integer, got \"wide\""
        );
        assert_eq!(err.field(), "width");
    }
}
