//! Cloud anchor lifecycle management.
//!
//! The platform only exposes a per-anchor state flag for host/resolve tasks;
//! nothing is pushed. [`CloudAnchorManager`] turns that into listener
//! callbacks by sweeping its pending table once per frame, and
//! [`HostResolveController`] layers the single-operation UI flow (host button,
//! resolve dialog, room codes) over the same primitives.

pub mod config;
pub mod handle;
pub mod listener;
pub mod log_throttle;
pub mod manager;
pub mod mode;
pub mod pending;
pub mod platform;
pub mod sim;

pub use anchor_core::{
    AnchorHandle, CloudAnchorError, CloudAnchorId, CloudAnchorState, RejectionError, RoomCode,
    TrackingState,
};
pub use config::{ConfigError, ManagerConfig};
pub use handle::OwnedAnchor;
pub use listener::{Completion, CompletionRecord, Listener, OperationKind, OperationToken};
pub use manager::CloudAnchorManager;
pub use mode::{
    ButtonVisibility, ControllerEvent, ControllerEvents, HostResolveController, HostingError,
    ModeKind, NoopEvents, RoomCodeUpdate,
};
pub use platform::Platform;
pub use sim::SimulatedPlatform;
