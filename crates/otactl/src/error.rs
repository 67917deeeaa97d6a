//! Error types for otactl

use meshota_core::OtaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No update: {0}")]
    NoUpdate(String),

    #[error("Update failed: {0}")]
    UpdateFailed(String),

    #[error("Manifest unavailable: {0}")]
    ManifestUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::InvalidArgument(_) => 2,
            CliError::NoUpdate(_) => 3,
            CliError::UpdateFailed(_) => 4,
            CliError::ManifestUnavailable(_) => 5,
            CliError::IoError(_) | CliError::JsonError(_) => 1,
        }
    }
}

impl From<OtaError> for CliError {
    fn from(error: OtaError) -> Self {
        let message = error.to_string();
        match error {
            OtaError::Fetch { .. } | OtaError::Parse { .. } => CliError::ManifestUnavailable(message),
            OtaError::NoImageAvailable { .. } | OtaError::NoUpdateNeeded { .. } => {
                CliError::NoUpdate(message)
            }
            OtaError::UnknownDeviceType(_)
            | OtaError::DuplicateAdapter(_)
            | OtaError::Config(_) => CliError::InvalidArgument(message),
            OtaError::DownloadFailed(_)
            | OtaError::IntegrityFailure { .. }
            | OtaError::TransferFailed(_)
            | OtaError::ActivationTimeout(_)
            | OtaError::SessionInUse(_)
            | OtaError::Cancelled
            | OtaError::Device(_) => CliError::UpdateFailed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ota_errors_map_to_exit_codes() {
        let fetch = CliError::from(OtaError::Fetch {
            url: "u".to_string(),
            message: "refused".to_string(),
        });
        assert_eq!(fetch.exit_code(), 5);

        let up_to_date = CliError::from(OtaError::NoUpdateNeeded {
            current: 3,
            available: 3,
        });
        assert_eq!(up_to_date.exit_code(), 3);

        let integrity = CliError::from(OtaError::IntegrityFailure {
            expected: "a".to_string(),
            actual: "b".to_string(),
        });
        assert_eq!(integrity.exit_code(), 4);

        let unknown = CliError::from(OtaError::UnknownDeviceType("x".to_string()));
        assert_eq!(unknown.exit_code(), 2);
    }
}
