use anchor_core::{AnchorHandle, CloudAnchorId, CloudAnchorState, RejectionError, TrackingState};

/// The slice of the AR platform the lifecycle code depends on.
///
/// Cloud states only advance during the platform's own per-frame update, so
/// callers poll after that update and never in between.
pub trait Platform: Send + Sync {
    /// Starts hosting `anchor`. The returned handle is a new anchor that tracks
    /// the hosting task; `anchor` itself is untouched.
    fn host_anchor(
        &self,
        anchor: AnchorHandle,
        ttl_days: u32,
    ) -> Result<AnchorHandle, RejectionError>;

    /// Starts resolving `id`. The returned anchor reports
    /// [`CloudAnchorState::TaskInProgress`] and paused tracking until the task
    /// finishes.
    fn resolve_anchor(&self, id: &CloudAnchorId) -> Result<AnchorHandle, RejectionError>;

    fn cloud_state(&self, handle: AnchorHandle) -> CloudAnchorState;

    /// Only meaningful once [`Platform::cloud_state`] reports success.
    fn cloud_anchor_id(&self, handle: AnchorHandle) -> Option<CloudAnchorId>;

    fn tracking_state(&self, handle: AnchorHandle) -> TrackingState;

    /// Stops pose updates for `handle`. Idempotent.
    fn detach(&self, handle: AnchorHandle);

    /// Drops the platform's reference to `handle`. Idempotent.
    fn release(&self, handle: AnchorHandle);
}
