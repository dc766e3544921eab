use thiserror::Error;

use crate::analysis::AnalysisError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Error shape that is safe to show to the person who ran a command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check the command options and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The analysis service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Analysis(AnalysisError::InvalidInput(message)) => {
                Self::BadRequest { message, correlation_id: unassigned() }
            }
            ApplicationError::Analysis(error @ AnalysisError::Unavailable(_))
            | ApplicationError::Analysis(error @ AnalysisError::TimedOut(_)) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Analysis(AnalysisError::Failed(message)) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::AnalysisError;
    use crate::errors::{ApplicationError, InterfaceError};

    #[test]
    fn invalid_input_maps_to_bad_request_with_correlation_id() {
        let interface =
            ApplicationError::from(AnalysisError::InvalidInput("unknown ticker".to_owned()))
                .into_interface("1187");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "1187"
        ));
        assert_eq!(interface.correlation_id(), "1187");
    }

    #[test]
    fn timeout_maps_to_service_unavailable() {
        let interface =
            ApplicationError::from(AnalysisError::TimedOut(300)).into_interface("1188");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The analysis service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn failed_analysis_maps_to_internal() {
        let interface = ApplicationError::from(AnalysisError::Failed("model crashed".to_owned()))
            .into_interface("1189");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
