//! Domain error types

use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Request has no messages")]
    EmptyConversation,

    #[error("Invalid temperature {0}: expected a value between 0 and 2")]
    InvalidTemperature(f32),

    #[error("max_tokens must be greater than zero")]
    ZeroMaxTokens,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_error_names_the_value() {
        let error = DomainError::InvalidTemperature(3.5);
        assert_eq!(
            error.to_string(),
            "Invalid temperature 3.5: expected a value between 0 and 2"
        );
    }
}
