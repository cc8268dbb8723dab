//! Single-slot host/resolve flow driven by UI intents.

use std::fmt;
use std::sync::Arc;

use anchor_core::{AnchorHandle, CloudAnchorId, CloudAnchorState, RejectionError, RoomCode};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ManagerConfig};
use crate::handle::OwnedAnchor;
use crate::listener::OperationKind;
use crate::platform::Platform;

const TARGET: &str = "anchor::mode";

const HOSTING_MESSAGE: &str = "Now in hosting mode. Press cancel to exit.";
const RESOLVING_MESSAGE: &str = "Now in resolving mode. Press cancel to exit.";
const COMMUNICATION_ERROR_MESSAGE: &str = "Failed to resolve room code.";

/// Fieldless view of the controller's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    None,
    Hosting,
    ResolveDialogPresenting,
    Resolving,
    Resolved,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModeKind::None => "none",
            ModeKind::Hosting => "hosting",
            ModeKind::ResolveDialogPresenting => "resolve_dialog_presenting",
            ModeKind::Resolving => "resolving",
            ModeKind::Resolved => "resolved",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonVisibility {
    All,
    OnlyHost,
    OnlyResolve,
}

/// What the room code broker should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "room_code")]
pub enum RoomCodeUpdate {
    /// Allocate a fresh code for hosting.
    Allocate,
    /// Watch the code the user typed in.
    Show(RoomCode),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ControllerEvent {
    ModeChanged { from: ModeKind, to: ModeKind },
    Message { text: String },
    ButtonVisibility { visibility: ButtonVisibility },
    RoomCode { update: RoomCodeUpdate },
    ShowResolveDialog,
    /// A hosted anchor reached `Success`; publish the id under the room code.
    CloudAnchorAvailable { cloud_anchor_id: CloudAnchorId },
    Promoted { kind: OperationKind, state: CloudAnchorState },
}

/// UI side of the controller. Called after the controller's lock is
/// released, so implementations may call back into the controller.
pub trait ControllerEvents: Send + Sync {
    fn on_event(&self, event: &ControllerEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl ControllerEvents for NoopEvents {
    fn on_event(&self, _event: &ControllerEvent) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostingError {
    #[error("hosting is not allowed in {mode} mode or while an anchor is tracked or pending")]
    NotAllowed { mode: ModeKind },
    #[error(transparent)]
    Rejected(#[from] RejectionError),
}

impl HostingError {
    /// Only platform refusals can clear up on a later frame.
    pub fn is_transient(&self) -> bool {
        match self {
            HostingError::NotAllowed { .. } => false,
            HostingError::Rejected(err) => err.is_transient(),
        }
    }
}

enum HostResolveMode {
    None,
    Hosting {
        pending: Option<OwnedAnchor>,
    },
    ResolveDialogPresenting,
    Resolving {
        room_code: RoomCode,
        pending: Option<OwnedAnchor>,
    },
    Resolved {
        room_code: RoomCode,
    },
}

impl HostResolveMode {
    fn kind(&self) -> ModeKind {
        match self {
            HostResolveMode::None => ModeKind::None,
            HostResolveMode::Hosting { .. } => ModeKind::Hosting,
            HostResolveMode::ResolveDialogPresenting => ModeKind::ResolveDialogPresenting,
            HostResolveMode::Resolving { .. } => ModeKind::Resolving,
            HostResolveMode::Resolved { .. } => ModeKind::Resolved,
        }
    }

    fn pending(&self) -> Option<&OwnedAnchor> {
        match self {
            HostResolveMode::Hosting { pending } | HostResolveMode::Resolving { pending, .. } => {
                pending.as_ref()
            }
            _ => None,
        }
    }

    fn take_pending(&mut self) -> Option<OwnedAnchor> {
        match self {
            HostResolveMode::Hosting { pending } | HostResolveMode::Resolving { pending, .. } => {
                pending.take()
            }
            _ => None,
        }
    }
}

struct ControllerInner {
    mode: HostResolveMode,
    tracked: Option<OwnedAnchor>,
}

impl ControllerInner {
    fn allows_hosting(&self) -> bool {
        matches!(self.mode, HostResolveMode::Hosting { pending: None }) && self.tracked.is_none()
    }

    /// Replaces the tracked anchor. The previous one is released first.
    fn set_tracked(&mut self, anchor: Option<OwnedAnchor>) {
        self.tracked = None;
        self.tracked = anchor;
    }

    /// Cancel path: stop tracking and release both slots.
    fn abandon(&mut self) {
        if let Some(pending) = self.mode.take_pending() {
            debug!(target: TARGET, handle = %pending.handle(), "abandoning pending anchor");
            pending.detach_and_release();
        }
        if let Some(tracked) = self.tracked.take() {
            tracked.detach_and_release();
        }
    }

    fn promote(
        &mut self,
        retain_resolved: bool,
        events: &mut Vec<ControllerEvent>,
    ) -> Option<(OperationKind, CloudAnchorState)> {
        let (kind, room_code, pending) = match &mut self.mode {
            HostResolveMode::Hosting { pending } => (OperationKind::Host, None, pending),
            HostResolveMode::Resolving { room_code, pending } => {
                (OperationKind::Resolve, Some(*room_code), pending)
            }
            _ => return None,
        };
        let state = pending.as_ref()?.cloud_state();
        if !state.is_returnable() {
            return None;
        }
        let anchor = pending.take()?;
        let handle = anchor.handle();

        if state.is_success() {
            self.set_tracked(Some(anchor));
        } else {
            drop(anchor);
            self.set_tracked(None);
        }

        if let Some(room_code) = room_code {
            self.mode = if retain_resolved && state.is_success() {
                HostResolveMode::Resolved { room_code }
            } else {
                HostResolveMode::None
            };
        }

        info!(
            target: TARGET,
            kind = %kind,
            handle = %handle,
            state = %state,
            mode = %self.mode.kind(),
            "promoted pending anchor"
        );
        events.push(ControllerEvent::Promoted { kind, state });
        events.push(ControllerEvent::Message {
            text: state.user_message(),
        });
        if kind == OperationKind::Resolve && self.mode.kind() == ModeKind::None {
            events.push(ControllerEvent::ButtonVisibility {
                visibility: ButtonVisibility::All,
            });
        }
        Some((kind, state))
    }
}

/// Drives one host or resolve at a time from button presses, the resolve
/// dialog, and the room code broker.
///
/// Contract violations (pressing a button the UI should have hidden) panic.
pub struct HostResolveController {
    platform: Arc<dyn Platform>,
    config: ManagerConfig,
    events: Arc<dyn ControllerEvents>,
    inner: Mutex<ControllerInner>,
}

impl HostResolveController {
    pub fn new(
        platform: Arc<dyn Platform>,
        config: ManagerConfig,
        events: Arc<dyn ControllerEvents>,
    ) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        Ok(Self::build(platform, config, events))
    }

    pub fn with_defaults(platform: Arc<dyn Platform>) -> Self {
        Self::build(platform, ManagerConfig::default(), Arc::new(NoopEvents))
    }

    fn build(
        platform: Arc<dyn Platform>,
        config: ManagerConfig,
        events: Arc<dyn ControllerEvents>,
    ) -> Self {
        Self {
            platform,
            config,
            events,
            inner: Mutex::new(ControllerInner {
                mode: HostResolveMode::None,
                tracked: None,
            }),
        }
    }

    /// Runs `step` under the lock, then reports a mode change (if any) and
    /// the collected events with the lock released.
    fn transition<R>(
        &self,
        step: impl FnOnce(&mut ControllerInner, &mut Vec<ControllerEvent>) -> R,
    ) -> R {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let from = inner.mode.kind();
            let result = step(&mut inner, &mut events);
            let to = inner.mode.kind();
            if from != to {
                debug!(target: TARGET, from = %from, to = %to, "mode changed");
                events.insert(0, ControllerEvent::ModeChanged { from, to });
            }
            result
        };
        for event in &events {
            self.events.on_event(event);
        }
        result
    }

    /// `None` starts hosting; `Hosting` cancels it.
    ///
    /// # Panics
    ///
    /// In any other mode.
    pub fn on_host_button_press(&self) {
        self.transition(|inner, events| match inner.mode.kind() {
            ModeKind::None => {
                inner.set_tracked(None);
                inner.mode = HostResolveMode::Hosting { pending: None };
                events.push(ControllerEvent::Message {
                    text: HOSTING_MESSAGE.to_string(),
                });
                events.push(ControllerEvent::ButtonVisibility {
                    visibility: ButtonVisibility::OnlyHost,
                });
                events.push(ControllerEvent::RoomCode {
                    update: RoomCodeUpdate::Allocate,
                });
            }
            ModeKind::Hosting => {
                inner.abandon();
                inner.mode = HostResolveMode::None;
                events.push(ControllerEvent::ButtonVisibility {
                    visibility: ButtonVisibility::All,
                });
                events.push(ControllerEvent::RoomCode {
                    update: RoomCodeUpdate::Clear,
                });
            }
            other => panic!("host button pressed in {other} mode"),
        })
    }

    /// `None` opens the resolve dialog; `Resolving` or `Resolved` cancels.
    ///
    /// # Panics
    ///
    /// In any other mode.
    pub fn on_resolve_button_press(&self) {
        self.transition(|inner, events| match inner.mode.kind() {
            ModeKind::None => {
                inner.mode = HostResolveMode::ResolveDialogPresenting;
                events.push(ControllerEvent::ButtonVisibility {
                    visibility: ButtonVisibility::OnlyResolve,
                });
                events.push(ControllerEvent::ShowResolveDialog);
            }
            ModeKind::Resolving | ModeKind::Resolved => {
                inner.abandon();
                inner.mode = HostResolveMode::None;
                events.push(ControllerEvent::ButtonVisibility {
                    visibility: ButtonVisibility::All,
                });
                events.push(ControllerEvent::RoomCode {
                    update: RoomCodeUpdate::Clear,
                });
            }
            other => panic!("resolve button pressed in {other} mode"),
        })
    }

    /// # Panics
    ///
    /// Unless the resolve dialog is showing.
    pub fn on_resolve_dialog_ok_press(&self, room_code: RoomCode) {
        self.transition(|inner, events| {
            let mode = inner.mode.kind();
            assert_eq!(
                mode,
                ModeKind::ResolveDialogPresenting,
                "resolve dialog confirmed in {mode} mode"
            );
            inner.mode = HostResolveMode::Resolving {
                room_code,
                pending: None,
            };
            events.push(ControllerEvent::Message {
                text: RESOLVING_MESSAGE.to_string(),
            });
            events.push(ControllerEvent::ButtonVisibility {
                visibility: ButtonVisibility::OnlyResolve,
            });
            events.push(ControllerEvent::RoomCode {
                update: RoomCodeUpdate::Show(room_code),
            });
        })
    }

    /// # Panics
    ///
    /// Unless the resolve dialog is showing.
    pub fn on_resolve_dialog_cancel_press(&self) {
        self.transition(|inner, events| {
            let mode = inner.mode.kind();
            assert_eq!(
                mode,
                ModeKind::ResolveDialogPresenting,
                "resolve dialog cancelled in {mode} mode"
            );
            inner.set_tracked(None);
            inner.mode = HostResolveMode::None;
            events.push(ControllerEvent::ButtonVisibility {
                visibility: ButtonVisibility::All,
            });
            events.push(ControllerEvent::RoomCode {
                update: RoomCodeUpdate::Clear,
            });
        })
    }

    /// The room code broker failed. Valid in every mode.
    pub fn on_communication_error(&self) {
        self.transition(|inner, events| {
            warn!(target: TARGET, mode = %inner.mode.kind(), "room code broker error; resetting");
            inner.abandon();
            inner.mode = HostResolveMode::None;
            events.push(ControllerEvent::ButtonVisibility {
                visibility: ButtonVisibility::All,
            });
            events.push(ControllerEvent::Message {
                text: COMMUNICATION_ERROR_MESSAGE.to_string(),
            });
            events.push(ControllerEvent::RoomCode {
                update: RoomCodeUpdate::Clear,
            });
        })
    }

    /// The broker published a cloud anchor id under the room code being
    /// watched. Starts a resolve and returns `Ok(true)` when in `Resolving`.
    /// Anywhere else the id is stale and is ignored.
    pub fn on_cloud_anchor_id_made_available(
        &self,
        id: &CloudAnchorId,
    ) -> Result<bool, RejectionError> {
        self.transition(|inner, _events| {
            let mode = inner.mode.kind();
            let HostResolveMode::Resolving { room_code, pending } = &mut inner.mode else {
                debug!(
                    target: TARGET,
                    mode = %mode,
                    cloud_anchor_id = %id,
                    "ignoring cloud anchor id outside resolving mode"
                );
                return Ok(false);
            };
            let handle = self.platform.resolve_anchor(id).map_err(|err| {
                warn!(target: TARGET, cloud_anchor_id = %id, error = %err, "resolve request rejected");
                err
            })?;
            info!(
                target: TARGET,
                room_code = %room_code,
                cloud_anchor_id = %id,
                handle = %handle,
                "resolving cloud anchor"
            );
            *pending = None;
            *pending = Some(OwnedAnchor::adopt(handle, self.platform.clone()));
            Ok(true)
        })
    }

    /// Starts hosting `anchor` if [`HostResolveController::allow_hosting_anchor`]
    /// holds. The check and the platform call happen under one lock.
    pub fn register_local_anchor_as_cloud_anchor(
        &self,
        anchor: AnchorHandle,
    ) -> Result<(), HostingError> {
        self.transition(|inner, _events| {
            if !inner.allows_hosting() {
                return Err(HostingError::NotAllowed {
                    mode: inner.mode.kind(),
                });
            }
            let handle = self
                .platform
                .host_anchor(anchor, self.config.host_ttl_days)
                .map_err(|err| {
                    warn!(target: TARGET, source = %anchor, error = %err, "host request rejected");
                    err
                })?;
            info!(
                target: TARGET,
                source = %anchor,
                handle = %handle,
                ttl_days = self.config.host_ttl_days,
                "hosting cloud anchor"
            );
            inner.mode = HostResolveMode::Hosting {
                pending: Some(OwnedAnchor::adopt(handle, self.platform.clone())),
            };
            Ok(())
        })
    }

    /// Per-frame update. Promotes a finished pending anchor and, for a
    /// successful host, announces the new cloud anchor id.
    pub fn on_update(&self) -> bool {
        let retain = self.config.retain_resolved_mode;
        self.transition(|inner, events| match inner.promote(retain, events) {
            Some((OperationKind::Host, CloudAnchorState::Success)) => {
                if let Some(cloud_anchor_id) =
                    inner.tracked.as_ref().and_then(OwnedAnchor::cloud_anchor_id)
                {
                    events.push(ControllerEvent::CloudAnchorAvailable { cloud_anchor_id });
                }
                true
            }
            Some(_) => true,
            None => false,
        })
    }

    /// Moves a pending anchor that has left the in-progress states into the
    /// tracked slot (on success) or releases it (on error).
    pub fn promote_pending_anchor_to_cloud_anchor(&self) -> bool {
        let retain = self.config.retain_resolved_mode;
        self.transition(|inner, events| inner.promote(retain, events).is_some())
    }

    /// True only in `Hosting` with nothing tracked and nothing pending.
    pub fn allow_hosting_anchor(&self) -> bool {
        self.inner.lock().allows_hosting()
    }

    /// The tracked anchor, or the pending one while an operation runs.
    pub fn tracked_anchor(&self) -> Option<AnchorHandle> {
        let inner = self.inner.lock();
        inner
            .tracked
            .as_ref()
            .or_else(|| inner.mode.pending())
            .map(OwnedAnchor::handle)
    }

    pub fn tracked_cloud_anchor_id(&self) -> Option<CloudAnchorId> {
        self.inner
            .lock()
            .tracked
            .as_ref()
            .and_then(OwnedAnchor::cloud_anchor_id)
    }

    pub fn mode_kind(&self) -> ModeKind {
        self.inner.lock().mode.kind()
    }

    pub fn room_code(&self) -> Option<RoomCode> {
        match self.inner.lock().mode {
            HostResolveMode::Resolving { room_code, .. }
            | HostResolveMode::Resolved { room_code } => Some(room_code),
            _ => None,
        }
    }

    /// Waits for any in-flight UI call to leave the critical section.
    pub fn on_pause(&self) {
        drop(self.inner.lock());
    }
}

impl fmt::Debug for HostResolveController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HostResolveController")
            .field("mode", &inner.mode.kind())
            .field("pending", &inner.mode.pending().map(OwnedAnchor::handle))
            .field("tracked", &inner.tracked.as_ref().map(OwnedAnchor::handle))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedPlatform;
    use anchor_core::{CloudAnchorError, TrackingState};
    use std::sync::{OnceLock, Weak};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ControllerEvent>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<ControllerEvent> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl ControllerEvents for Recorder {
        fn on_event(&self, event: &ControllerEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn setup(
        config: ManagerConfig,
    ) -> (Arc<SimulatedPlatform>, Arc<Recorder>, HostResolveController) {
        let platform = Arc::new(SimulatedPlatform::new());
        let recorder = Arc::new(Recorder::default());
        let controller =
            HostResolveController::new(platform.clone(), config, recorder.clone()).unwrap();
        (platform, recorder, controller)
    }

    fn room(code: u64) -> RoomCode {
        RoomCode::new(code).unwrap()
    }

    #[test]
    fn host_button_twice_is_a_pure_ui_cancel() {
        let (platform, recorder, controller) = setup(ManagerConfig::default());
        controller.on_host_button_press();
        assert_eq!(controller.mode_kind(), ModeKind::Hosting);
        assert_eq!(
            recorder.take(),
            vec![
                ControllerEvent::ModeChanged {
                    from: ModeKind::None,
                    to: ModeKind::Hosting
                },
                ControllerEvent::Message {
                    text: HOSTING_MESSAGE.to_string()
                },
                ControllerEvent::ButtonVisibility {
                    visibility: ButtonVisibility::OnlyHost
                },
                ControllerEvent::RoomCode {
                    update: RoomCodeUpdate::Allocate
                },
            ]
        );

        controller.on_host_button_press();
        assert_eq!(controller.mode_kind(), ModeKind::None);
        assert_eq!(controller.tracked_anchor(), None);
        assert_eq!(platform.live_cloud_anchor_count(), 0);
        let events = recorder.take();
        assert!(events
            .iter()
            .all(|event| !matches!(event, ControllerEvent::Promoted { .. })));
    }

    #[test]
    fn hosting_cancel_releases_pending_anchor() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        controller.on_host_button_press();
        controller.register_local_anchor_as_cloud_anchor(local).unwrap();
        let hosted = platform.hosted_from(local).unwrap();
        assert_eq!(controller.tracked_anchor(), Some(hosted));

        controller.on_host_button_press();
        assert!(platform.was_detached(hosted));
        assert_eq!(platform.release_count(hosted), 1);
        assert_eq!(controller.tracked_anchor(), None);
    }

    #[test]
    fn hosting_is_allowed_only_with_empty_slots() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        assert!(!controller.allow_hosting_anchor());
        assert_eq!(
            controller.register_local_anchor_as_cloud_anchor(local),
            Err(HostingError::NotAllowed {
                mode: ModeKind::None
            })
        );

        controller.on_host_button_press();
        assert!(controller.allow_hosting_anchor());
        controller.register_local_anchor_as_cloud_anchor(local).unwrap();
        assert!(!controller.allow_hosting_anchor());
        assert!(matches!(
            controller.register_local_anchor_as_cloud_anchor(local),
            Err(HostingError::NotAllowed {
                mode: ModeKind::Hosting
            })
        ));
    }

    #[test]
    fn host_rejection_is_passed_through() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        let local = platform.create_local_anchor(TrackingState::Paused);
        controller.on_host_button_press();
        assert_eq!(
            controller.register_local_anchor_as_cloud_anchor(local),
            Err(HostingError::Rejected(RejectionError::NotTracking))
        );
        assert!(controller.allow_hosting_anchor());
    }

    #[test]
    fn successful_host_is_tracked_and_announced() {
        let (platform, recorder, controller) = setup(ManagerConfig::default());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        controller.on_host_button_press();
        controller.register_local_anchor_as_cloud_anchor(local).unwrap();
        let hosted = platform.hosted_from(local).unwrap();
        recorder.take();

        platform.advance_tick();
        assert!(!controller.on_update());

        platform.complete_with(hosted, CloudAnchorState::Success);
        platform.advance_tick();
        assert!(controller.on_update());

        assert_eq!(controller.mode_kind(), ModeKind::Hosting);
        assert_eq!(controller.tracked_anchor(), Some(hosted));
        let id = controller.tracked_cloud_anchor_id().expect("hosted id");
        let events = recorder.take();
        assert!(events.contains(&ControllerEvent::Promoted {
            kind: OperationKind::Host,
            state: CloudAnchorState::Success
        }));
        assert!(events.contains(&ControllerEvent::CloudAnchorAvailable {
            cloud_anchor_id: id
        }));
        assert!(!controller.allow_hosting_anchor());
    }

    #[test]
    fn failed_host_leaves_slot_empty_for_retry() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        let local = platform.create_local_anchor(TrackingState::Tracking);
        controller.on_host_button_press();
        controller.register_local_anchor_as_cloud_anchor(local).unwrap();
        let hosted = platform.hosted_from(local).unwrap();
        platform.complete_with(
            hosted,
            CloudAnchorState::Error(CloudAnchorError::HostingDatasetProcessingFailed),
        );
        platform.advance_tick();

        assert!(controller.promote_pending_anchor_to_cloud_anchor());
        assert_eq!(controller.tracked_anchor(), None);
        assert!(!platform.is_live(hosted));
        assert!(controller.allow_hosting_anchor());
    }

    fn start_resolving(controller: &HostResolveController, code: u64) {
        controller.on_resolve_button_press();
        assert_eq!(controller.mode_kind(), ModeKind::ResolveDialogPresenting);
        controller.on_resolve_dialog_ok_press(room(code));
        assert_eq!(controller.mode_kind(), ModeKind::Resolving);
        assert_eq!(controller.room_code(), Some(room(code)));
    }

    #[test]
    fn successful_resolve_returns_to_none_with_tracked_anchor() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        start_resolving(&controller, 7);
        let id = CloudAnchorId::new("ua-remote").unwrap();
        assert_eq!(controller.on_cloud_anchor_id_made_available(&id), Ok(true));
        let handle = platform.last_created().unwrap();
        assert_eq!(controller.tracked_anchor(), Some(handle));
        assert_eq!(controller.tracked_cloud_anchor_id(), None);

        platform.complete_with(handle, CloudAnchorState::Success);
        platform.advance_tick();
        assert!(controller.on_update());
        assert_eq!(controller.mode_kind(), ModeKind::None);
        assert_eq!(controller.tracked_anchor(), Some(handle));
        assert_eq!(controller.tracked_cloud_anchor_id(), Some(id));
    }

    #[test]
    fn resolve_error_keeps_tracked_slot_empty() {
        let (platform, recorder, controller) = setup(ManagerConfig::default());
        start_resolving(&controller, 9);
        let id = CloudAnchorId::new("ua-missing").unwrap();
        controller.on_cloud_anchor_id_made_available(&id).unwrap();
        let handle = platform.last_created().unwrap();
        recorder.take();

        platform.complete_with(
            handle,
            CloudAnchorState::Error(CloudAnchorError::CloudIdNotFound),
        );
        platform.advance_tick();
        assert!(controller.on_update());

        assert_eq!(controller.tracked_anchor(), None);
        assert!(!platform.is_live(handle));
        assert_eq!(controller.mode_kind(), ModeKind::None);
        let events = recorder.take();
        assert!(events.contains(&ControllerEvent::Promoted {
            kind: OperationKind::Resolve,
            state: CloudAnchorState::Error(CloudAnchorError::CloudIdNotFound)
        }));
        assert!(events.contains(&ControllerEvent::Message {
            text: CloudAnchorError::CloudIdNotFound.user_message()
        }));
    }

    #[test]
    fn retained_resolve_parks_in_resolved_until_cancel() {
        let config = ManagerConfig::default().with_retain_resolved_mode(true);
        let (platform, _recorder, controller) = setup(config);
        start_resolving(&controller, 3);
        let id = CloudAnchorId::new("ua-keep").unwrap();
        controller.on_cloud_anchor_id_made_available(&id).unwrap();
        let handle = platform.last_created().unwrap();
        platform.complete_with(handle, CloudAnchorState::Success);
        platform.advance_tick();
        controller.on_update();

        assert_eq!(controller.mode_kind(), ModeKind::Resolved);
        assert_eq!(controller.room_code(), Some(room(3)));

        controller.on_resolve_button_press();
        assert_eq!(controller.mode_kind(), ModeKind::None);
        assert_eq!(controller.tracked_anchor(), None);
        assert!(platform.was_detached(handle));
        assert!(!platform.is_live(handle));
    }

    #[test]
    fn late_cloud_anchor_id_is_ignored() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        let id = CloudAnchorId::new("ua-late").unwrap();
        assert_eq!(controller.on_cloud_anchor_id_made_available(&id), Ok(false));
        assert_eq!(platform.last_created(), None);
    }

    #[test]
    fn newer_cloud_anchor_id_replaces_pending_resolve() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        start_resolving(&controller, 11);
        controller
            .on_cloud_anchor_id_made_available(&CloudAnchorId::new("ua-old").unwrap())
            .unwrap();
        let first = platform.last_created().unwrap();
        controller
            .on_cloud_anchor_id_made_available(&CloudAnchorId::new("ua-new").unwrap())
            .unwrap();
        let second = platform.last_created().unwrap();

        assert!(!platform.is_live(first));
        assert_eq!(controller.tracked_anchor(), Some(second));
    }

    #[test]
    fn resolve_rejection_is_returned() {
        let (platform, _recorder, controller) = setup(ManagerConfig::default());
        start_resolving(&controller, 5);
        platform.reject_next(RejectionError::SessionPaused);
        let id = CloudAnchorId::new("ua-1").unwrap();
        assert_eq!(
            controller.on_cloud_anchor_id_made_available(&id),
            Err(RejectionError::SessionPaused)
        );
        assert_eq!(controller.tracked_anchor(), None);
        assert_eq!(controller.mode_kind(), ModeKind::Resolving);
    }

    #[test]
    fn dialog_cancel_returns_to_none() {
        let (_platform, recorder, controller) = setup(ManagerConfig::default());
        controller.on_resolve_button_press();
        controller.on_resolve_dialog_cancel_press();
        assert_eq!(controller.mode_kind(), ModeKind::None);
        assert!(recorder.take().contains(&ControllerEvent::RoomCode {
            update: RoomCodeUpdate::Clear
        }));
    }

    #[test]
    fn communication_error_resets_from_any_mode() {
        let (platform, recorder, controller) = setup(ManagerConfig::default());
        start_resolving(&controller, 13);
        controller
            .on_cloud_anchor_id_made_available(&CloudAnchorId::new("ua-x").unwrap())
            .unwrap();
        let handle = platform.last_created().unwrap();
        recorder.take();

        controller.on_communication_error();
        assert_eq!(controller.mode_kind(), ModeKind::None);
        assert!(!platform.is_live(handle));
        assert!(recorder.take().contains(&ControllerEvent::Message {
            text: COMMUNICATION_ERROR_MESSAGE.to_string()
        }));

        controller.on_communication_error();
        assert_eq!(controller.mode_kind(), ModeKind::None);
    }

    #[test]
    #[should_panic(expected = "host button pressed in resolve_dialog_presenting mode")]
    fn host_button_during_dialog_panics() {
        let (_platform, _recorder, controller) = setup(ManagerConfig::default());
        controller.on_resolve_button_press();
        controller.on_host_button_press();
    }

    #[test]
    #[should_panic(expected = "resolve button pressed in hosting mode")]
    fn resolve_button_while_hosting_panics() {
        let (_platform, _recorder, controller) = setup(ManagerConfig::default());
        controller.on_host_button_press();
        controller.on_resolve_button_press();
    }

    #[test]
    #[should_panic(expected = "resolve dialog confirmed in none mode")]
    fn dialog_ok_without_dialog_panics() {
        let (_platform, _recorder, controller) = setup(ManagerConfig::default());
        controller.on_resolve_dialog_ok_press(room(1));
    }

    #[test]
    fn events_serialize_with_flat_tags() {
        let event = ControllerEvent::RoomCode {
            update: RoomCodeUpdate::Show(room(4)),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "event": "room_code",
                "update": { "action": "show", "room_code": 4 }
            })
        );
        let promoted = ControllerEvent::Promoted {
            kind: OperationKind::Resolve,
            state: CloudAnchorState::Error(CloudAnchorError::CloudIdNotFound),
        };
        assert_eq!(
            serde_json::to_value(&promoted).unwrap(),
            serde_json::json!({
                "event": "promoted",
                "kind": "resolve",
                "state": { "error": "cloud_id_not_found" }
            })
        );
    }

    struct Reentrant {
        controller: OnceLock<Weak<HostResolveController>>,
        seen: Mutex<Vec<ModeKind>>,
    }

    impl ControllerEvents for Reentrant {
        fn on_event(&self, event: &ControllerEvent) {
            if let ControllerEvent::ModeChanged { .. } = event {
                if let Some(controller) = self.controller.get().and_then(Weak::upgrade) {
                    self.seen.lock().push(controller.mode_kind());
                }
            }
        }
    }

    #[test]
    fn events_are_dispatched_outside_the_lock() {
        let platform = Arc::new(SimulatedPlatform::new());
        let events = Arc::new(Reentrant {
            controller: OnceLock::new(),
            seen: Mutex::new(Vec::new()),
        });
        let controller = Arc::new(
            HostResolveController::new(platform, ManagerConfig::default(), events.clone()).unwrap(),
        );
        let _ = events.controller.set(Arc::downgrade(&controller));

        controller.on_host_button_press();
        controller.on_host_button_press();
        assert_eq!(
            *events.seen.lock(),
            vec![ModeKind::Hosting, ModeKind::None]
        );
    }

    #[test]
    fn new_rejects_invalid_config() {
        let err = HostResolveController::new(
            Arc::new(SimulatedPlatform::new()),
            ManagerConfig::default().with_host_ttl_days(0),
            Arc::new(NoopEvents),
        )
        .err()
        .expect("zero ttl rejected");
        assert_eq!(err, ConfigError::TtlOutOfRange(0));
    }

    #[test]
    fn hosting_errors_report_transience() {
        assert!(HostingError::Rejected(RejectionError::NotTracking).is_transient());
        assert!(!HostingError::NotAllowed {
            mode: ModeKind::None
        }
        .is_transient());
    }
}
