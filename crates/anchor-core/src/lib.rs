//! Core primitives shared by the cloud anchor lifecycle crates.
//!
//! Nothing in here talks to a platform. These types describe what a platform
//! reports (anchor handles, cloud states, rejection reasons) so that the
//! lifecycle manager, the simulated platform and the demo app agree on a
//! single vocabulary.

pub mod rejection;
pub mod state;

pub use rejection::RejectionError;
pub use state::{CloudAnchorError, CloudAnchorState, TrackingState};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identity of a platform-owned anchor.
///
/// Two handles compare equal iff they refer to the same platform anchor. The
/// value is stable for the lifetime of the anchor and is never reused by a
/// well-behaved platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorHandle(u64);

impl AnchorHandle {
    pub const fn from_raw(raw: u64) -> Self {
        AnchorHandle(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for AnchorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anchor#{}", self.0)
    }
}

/// Identifier assigned by the cloud service to a hosted anchor.
///
/// Always non-empty; construct through [`CloudAnchorId::new`] or `TryFrom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CloudAnchorId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cloud anchor id cannot be empty")]
pub struct EmptyCloudAnchorId;

impl CloudAnchorId {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyCloudAnchorId> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EmptyCloudAnchorId);
        }
        if trimmed.len() == value.len() {
            Ok(CloudAnchorId(value))
        } else {
            Ok(CloudAnchorId(trimmed.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CloudAnchorId {
    type Error = EmptyCloudAnchorId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CloudAnchorId::new(value)
    }
}

impl TryFrom<&str> for CloudAnchorId {
    type Error = EmptyCloudAnchorId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        CloudAnchorId::new(value)
    }
}

impl From<CloudAnchorId> for String {
    fn from(value: CloudAnchorId) -> Self {
        value.0
    }
}

impl std::fmt::Display for CloudAnchorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short numeric code under which a host publishes its cloud anchor id so a
/// second device can find it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RoomCode(u64);

impl RoomCode {
    /// Room codes are strictly positive; zero is the "no room" sentinel used by
    /// brokers and is rejected here.
    pub fn new(code: u64) -> Option<Self> {
        (code != 0).then_some(RoomCode(code))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("room code must be non-zero")]
pub struct ZeroRoomCode;

impl TryFrom<u64> for RoomCode {
    type Error = ZeroRoomCode;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        RoomCode::new(code).ok_or(ZeroRoomCode)
    }
}

impl From<RoomCode> for u64 {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
