use thiserror::Error;

#[derive(Debug, Error)]
pub enum TourError {
    /// No tour registered under this id
    #[error("Unknown tour: {0}")]
    UnknownTour(String),

    /// Step index outside `[0, total)`
    #[error("Step {index} out of range (tour has {total} steps)")]
    StepOutOfRange { index: usize, total: usize },

    /// Operation requires an active tour
    #[error("No tour is active")]
    NotActive,

    /// A tour with this id is already registered
    #[error("Duplicate tour: {0}")]
    DuplicateTour(String),

    /// Tour definition rejected at registration
    #[error("Invalid definition for tour '{tour}': {reason}")]
    InvalidDefinition { tour: String, reason: String },

    /// Preference store failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TourError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tour_error() {
        let err = TourError::UnknownTour("onboarding".to_string());
        assert_eq!(err.to_string(), "Unknown tour: onboarding");
    }

    #[test]
    fn test_step_out_of_range_error() {
        let err = TourError::StepOutOfRange { index: 7, total: 5 };
        assert_eq!(err.to_string(), "Step 7 out of range (tour has 5 steps)");
    }

    #[test]
    fn test_invalid_definition_error() {
        let err = TourError::InvalidDefinition {
            tour: "intro".to_string(),
            reason: "no steps".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid definition for tour 'intro': no steps");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TourError = json_err.into();
        assert!(matches!(err, TourError::Json(_)));
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
