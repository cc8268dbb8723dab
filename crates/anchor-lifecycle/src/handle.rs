use std::fmt;
use std::sync::Arc;

use anchor_core::{AnchorHandle, CloudAnchorId, CloudAnchorState, TrackingState};

use crate::platform::Platform;

/// Sole owner of a platform anchor reference.
///
/// The reference is released exactly once: when this value drops, or when it
/// is consumed by [`OwnedAnchor::detach_and_release`]. Moving it between slots
/// moves the obligation with it, so a pending anchor promoted to "tracked" can
/// never be released twice.
pub struct OwnedAnchor {
    handle: AnchorHandle,
    platform: Arc<dyn Platform>,
    armed: bool,
}

impl OwnedAnchor {
    /// Takes ownership of `handle`. The caller must not release it elsewhere.
    pub fn adopt(handle: AnchorHandle, platform: Arc<dyn Platform>) -> Self {
        Self {
            handle,
            platform,
            armed: true,
        }
    }

    pub fn handle(&self) -> AnchorHandle {
        self.handle
    }

    pub fn cloud_state(&self) -> CloudAnchorState {
        self.platform.cloud_state(self.handle)
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.platform.tracking_state(self.handle)
    }

    pub fn cloud_anchor_id(&self) -> Option<CloudAnchorId> {
        if self.cloud_state().is_success() {
            self.platform.cloud_anchor_id(self.handle)
        } else {
            None
        }
    }

    /// Stops tracking and then releases.
    pub fn detach_and_release(self) {
        self.platform.detach(self.handle);
        drop(self);
    }

    /// Gives up ownership without releasing. The caller becomes responsible
    /// for calling [`Platform::release`].
    pub fn into_handle(mut self) -> AnchorHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for OwnedAnchor {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::trace!(target: "anchor::lifecycle", handle = %self.handle, "releasing anchor");
        self.platform.release(self.handle);
    }
}

impl fmt::Debug for OwnedAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnedAnchor").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPlatform;

    #[test]
    fn drop_releases_once() {
        let platform = Arc::new(SimulatedPlatform::new());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        let owned = OwnedAnchor::adopt(local, platform.clone());
        assert!(platform.is_live(local));
        drop(owned);
        assert!(!platform.is_live(local));
        assert_eq!(platform.release_count(local), 1);
    }

    #[test]
    fn detach_and_release_detaches_first() {
        let platform = Arc::new(SimulatedPlatform::new());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        OwnedAnchor::adopt(local, platform.clone()).detach_and_release();
        assert!(platform.was_detached(local));
        assert_eq!(platform.release_count(local), 1);
    }

    #[test]
    fn into_handle_transfers_release_duty() {
        let platform = Arc::new(SimulatedPlatform::new());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        let raw = OwnedAnchor::adopt(local, platform.clone()).into_handle();
        assert_eq!(raw, local);
        assert!(platform.is_live(local));
        assert_eq!(Arc::strong_count(&platform), 1);
    }
}
