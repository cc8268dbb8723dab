use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synchronous refusal of a host or resolve request.
///
/// This is distinct from a task that was accepted and later finished with an
/// error; those surface as [`crate::CloudAnchorState::Error`] on the polling
/// path.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionError {
    #[error("anchor is not currently tracking")]
    NotTracking,
    #[error("session is paused")]
    SessionPaused,
    #[error("too many cloud anchor operations are in flight")]
    ResourceExhausted,
    #[error("anchor is not supported for hosting")]
    NotSupportedForHosting,
    #[error("cloud anchors are not enabled in the session configuration")]
    CloudAnchorsNotConfigured,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RejectionError {
    /// Maps a platform status code to a rejection. Returns `None` for success
    /// (`0`); unrecognised failures become `InvalidArgument` with the raw code.
    pub fn from_status(code: i32) -> Option<Self> {
        match code {
            0 => None,
            -3 => Some(RejectionError::SessionPaused),
            -5 => Some(RejectionError::NotTracking),
            -11 => Some(RejectionError::ResourceExhausted),
            -14 => Some(RejectionError::CloudAnchorsNotConfigured),
            -16 => Some(RejectionError::NotSupportedForHosting),
            other => Some(RejectionError::InvalidArgument(format!(
                "platform status {other}"
            ))),
        }
    }

    /// Whether retrying the same request later could succeed without user
    /// action beyond moving the device.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RejectionError::NotTracking
                | RejectionError::SessionPaused
                | RejectionError::ResourceExhausted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_rejections() {
        assert_eq!(RejectionError::from_status(0), None);
        assert_eq!(
            RejectionError::from_status(-5),
            Some(RejectionError::NotTracking)
        );
        assert_eq!(
            RejectionError::from_status(-16),
            Some(RejectionError::NotSupportedForHosting)
        );
        assert!(matches!(
            RejectionError::from_status(-99),
            Some(RejectionError::InvalidArgument(msg)) if msg.contains("-99")
        ));
    }

    #[test]
    fn configuration_problems_are_not_transient() {
        assert!(RejectionError::NotTracking.is_transient());
        assert!(!RejectionError::CloudAnchorsNotConfigured.is_transient());
        assert!(!RejectionError::InvalidArgument("ttl".into()).is_transient());
    }
}
