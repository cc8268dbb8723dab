use serde::{Deserialize, Serialize};

/// Cloud lifecycle of an anchor as reported by the platform.
///
/// Only the platform moves an anchor between states. Once an anchor reaches
/// [`CloudAnchorState::Success`] or an error it stays there for the rest of
/// its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudAnchorState {
    None,
    TaskInProgress,
    Success,
    Error(CloudAnchorError),
}

/// Terminal failure reported for a host or resolve task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudAnchorError {
    Internal,
    NotAuthorized,
    ResourceExhausted,
    HostingDatasetProcessingFailed,
    CloudIdNotFound,
    SdkVersionTooOld,
    SdkVersionTooNew,
    ServiceUnavailable,
    /// A code this build does not know about. Newer platforms add states;
    /// carrying the raw value keeps them reportable instead of undefined.
    Unknown(i32),
}

impl CloudAnchorState {
    /// Maps the platform's numeric state codes. Every input maps to something.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => CloudAnchorState::None,
            1 => CloudAnchorState::TaskInProgress,
            2 => CloudAnchorState::Success,
            -1 => CloudAnchorState::Error(CloudAnchorError::Internal),
            -2 => CloudAnchorState::Error(CloudAnchorError::NotAuthorized),
            -3 | -10 => CloudAnchorState::Error(CloudAnchorError::ServiceUnavailable),
            -4 => CloudAnchorState::Error(CloudAnchorError::ResourceExhausted),
            -5 => CloudAnchorState::Error(CloudAnchorError::HostingDatasetProcessingFailed),
            -6 => CloudAnchorState::Error(CloudAnchorError::CloudIdNotFound),
            -8 => CloudAnchorState::Error(CloudAnchorError::SdkVersionTooOld),
            -9 => CloudAnchorState::Error(CloudAnchorError::SdkVersionTooNew),
            other => CloudAnchorState::Error(CloudAnchorError::Unknown(other)),
        }
    }

    /// `None` and `TaskInProgress` both mean "not done yet".
    pub fn is_returnable(self) -> bool {
        !matches!(
            self,
            CloudAnchorState::None | CloudAnchorState::TaskInProgress
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, CloudAnchorState::Success)
    }

    pub fn error(self) -> Option<CloudAnchorError> {
        match self {
            CloudAnchorState::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: CloudAnchorState) -> bool {
        if self.is_returnable() {
            return self == next;
        }
        true
    }

    /// Text suitable for a status line in the embedding UI.
    pub fn user_message(self) -> String {
        match self {
            CloudAnchorState::None => "No cloud task has been started.".to_string(),
            CloudAnchorState::TaskInProgress => "Cloud task in progress.".to_string(),
            CloudAnchorState::Success => "Cloud task completed successfully.".to_string(),
            CloudAnchorState::Error(err) => err.user_message(),
        }
    }
}

impl CloudAnchorError {
    pub fn user_message(self) -> String {
        match self {
            CloudAnchorError::Internal => {
                "The cloud service hit an internal error.".to_string()
            }
            CloudAnchorError::NotAuthorized => {
                "The app is not authorized to use cloud anchors.".to_string()
            }
            CloudAnchorError::ResourceExhausted => {
                "The cloud anchor quota has been exhausted.".to_string()
            }
            CloudAnchorError::HostingDatasetProcessingFailed => {
                "Hosting failed; move the device around to capture more of the scene.".to_string()
            }
            CloudAnchorError::CloudIdNotFound => {
                "No cloud anchor exists for the requested id.".to_string()
            }
            CloudAnchorError::SdkVersionTooOld => {
                "The anchor was hosted with a newer SDK; update the app to resolve it.".to_string()
            }
            CloudAnchorError::SdkVersionTooNew => {
                "The anchor was hosted with an older, incompatible SDK.".to_string()
            }
            CloudAnchorError::ServiceUnavailable => {
                "The cloud anchor service is unreachable.".to_string()
            }
            CloudAnchorError::Unknown(code) => format!("Unknown cloud anchor error ({code})."),
        }
    }
}

impl std::fmt::Display for CloudAnchorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudAnchorState::None => f.write_str("none"),
            CloudAnchorState::TaskInProgress => f.write_str("task_in_progress"),
            CloudAnchorState::Success => f.write_str("success"),
            CloudAnchorState::Error(err) => write!(f, "error:{err}"),
        }
    }
}

impl std::fmt::Display for CloudAnchorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudAnchorError::Internal => f.write_str("internal"),
            CloudAnchorError::NotAuthorized => f.write_str("not_authorized"),
            CloudAnchorError::ResourceExhausted => f.write_str("resource_exhausted"),
            CloudAnchorError::HostingDatasetProcessingFailed => {
                f.write_str("hosting_dataset_processing_failed")
            }
            CloudAnchorError::CloudIdNotFound => f.write_str("cloud_id_not_found"),
            CloudAnchorError::SdkVersionTooOld => f.write_str("sdk_version_too_old"),
            CloudAnchorError::SdkVersionTooNew => f.write_str("sdk_version_too_new"),
            CloudAnchorError::ServiceUnavailable => f.write_str("service_unavailable"),
            CloudAnchorError::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// Pose tracking state of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    #[default]
    Tracking,
    Paused,
    Stopped,
}
