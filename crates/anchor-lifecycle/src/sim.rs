//! In-process stand-in for the AR platform.
//!
//! Cloud states only move inside [`SimulatedPlatform::advance_tick`], which
//! plays the role of the platform's per-frame update. Tests script outcomes
//! with [`SimulatedPlatform::complete_with`]; the demo app uses
//! [`SimulatedPlatform::with_auto_complete`] instead.

use std::collections::{BTreeMap, HashSet, VecDeque};

use anchor_core::{
    AnchorHandle, CloudAnchorError, CloudAnchorId, CloudAnchorState, RejectionError, TrackingState,
};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{MAX_TTL_DAYS, MIN_TTL_DAYS};
use crate::platform::Platform;

const TARGET: &str = "anchor::sim";

// Native status codes the simulated session answers requests with.
const STATUS_SESSION_PAUSED: i32 = -3;
const STATUS_NOT_TRACKING: i32 = -5;

fn status(code: i32) -> Result<(), RejectionError> {
    match RejectionError::from_status(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    tick: u64,
    anchors: BTreeMap<AnchorHandle, SimAnchor>,
    hosted_ids: HashSet<CloudAnchorId>,
    rejections: VecDeque<RejectionError>,
    paused: bool,
    auto: Option<AutoComplete>,
    last_created: Option<AnchorHandle>,
}

#[derive(Debug, Clone, Copy)]
struct AutoComplete {
    latency_ticks: u64,
    host_outcome: CloudAnchorState,
}

#[derive(Debug, Clone)]
enum Origin {
    Local,
    Hosted { source: AnchorHandle, ttl_days: u32 },
    Resolved { id: CloudAnchorId },
}

#[derive(Debug)]
struct SimAnchor {
    origin: Origin,
    cloud_state: CloudAnchorState,
    tracking: TrackingState,
    cloud_id: Option<CloudAnchorId>,
    scheduled: Option<(u64, CloudAnchorState)>,
    detached: bool,
    released: bool,
    release_calls: u32,
}

impl SimAnchor {
    fn new(origin: Origin, cloud_state: CloudAnchorState, tracking: TrackingState) -> Self {
        Self {
            origin,
            cloud_state,
            tracking,
            cloud_id: None,
            scheduled: None,
            detached: false,
            released: false,
            release_calls: 0,
        }
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every accepted task finishes `latency_ticks` refreshes after it starts.
    /// Hosts succeed; resolves succeed for ids this platform hosted (or that
    /// were registered with [`SimulatedPlatform::register_cloud_anchor`]) and
    /// fail with `CloudIdNotFound` otherwise.
    pub fn with_auto_complete(latency_ticks: u64) -> Self {
        let platform = Self::new();
        platform.state.lock().auto = Some(AutoComplete {
            latency_ticks,
            host_outcome: CloudAnchorState::Success,
        });
        platform
    }

    /// Outcome used for auto-completed hosts.
    pub fn set_host_outcome(&self, outcome: CloudAnchorState) {
        assert!(outcome.is_returnable(), "host outcome must be terminal");
        if let Some(auto) = self.state.lock().auto.as_mut() {
            auto.host_outcome = outcome;
        }
    }

    /// Creates a plain (non-cloud) anchor, as a hit test would.
    pub fn create_local_anchor(&self, tracking: TrackingState) -> AnchorHandle {
        let mut state = self.state.lock();
        state.create(SimAnchor::new(Origin::Local, CloudAnchorState::None, tracking))
    }

    pub fn set_tracking(&self, handle: AnchorHandle, tracking: TrackingState) {
        if let Some(anchor) = self.state.lock().anchors.get_mut(&handle) {
            anchor.tracking = tracking;
        }
    }

    /// Makes `id` resolvable, as if another device had hosted it.
    pub fn register_cloud_anchor(&self, id: CloudAnchorId) {
        self.state.lock().hosted_ids.insert(id);
    }

    /// Queues a synchronous rejection for the next host or resolve request.
    pub fn reject_next(&self, err: RejectionError) {
        self.state.lock().rejections.push_back(err);
    }

    /// Queues a rejection given as a native status code. `0` queues nothing.
    pub fn reject_next_status(&self, code: i32) {
        if let Some(err) = RejectionError::from_status(code) {
            self.reject_next(err);
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Schedules `outcome` for the next refresh.
    ///
    /// # Panics
    ///
    /// If `outcome` is not terminal or `handle` is unknown.
    pub fn complete_with(&self, handle: AnchorHandle, outcome: CloudAnchorState) {
        self.complete_after(handle, 0, outcome);
    }

    /// Like [`SimulatedPlatform::complete_with`], with the outcome given as the
    /// platform's numeric cloud state code.
    pub fn complete_with_code(&self, handle: AnchorHandle, code: i32) {
        self.complete_with(handle, CloudAnchorState::from_raw(code));
    }

    /// Schedules `outcome` to land `ticks` refreshes after the next one.
    pub fn complete_after(&self, handle: AnchorHandle, ticks: u64, outcome: CloudAnchorState) {
        assert!(outcome.is_returnable(), "scripted outcome must be terminal");
        let mut state = self.state.lock();
        let due = state.tick + 1 + ticks;
        let anchor = state
            .anchors
            .get_mut(&handle)
            .unwrap_or_else(|| panic!("{handle} is not known to the simulated platform"));
        anchor.scheduled = Some((due, outcome));
    }

    /// The platform's per-frame update: applies every outcome that is due.
    pub fn advance_tick(&self) -> u64 {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let SimState {
            anchors,
            hosted_ids,
            ..
        } = &mut *state;

        for (handle, anchor) in anchors.iter_mut() {
            let Some((due, outcome)) = anchor.scheduled else {
                continue;
            };
            if due > tick {
                continue;
            }
            anchor.scheduled = None;
            if !anchor.cloud_state.can_transition_to(outcome) {
                debug!(
                    target: TARGET,
                    handle = %handle,
                    current = %anchor.cloud_state,
                    ignored = %outcome,
                    "terminal cloud state is final"
                );
                continue;
            }
            anchor.cloud_state = outcome;
            if outcome.is_success() {
                match &anchor.origin {
                    Origin::Hosted { .. } => {
                        if let Ok(id) = CloudAnchorId::new(format!("ua-{}", Uuid::new_v4().simple())) {
                            hosted_ids.insert(id.clone());
                            anchor.cloud_id = Some(id);
                        }
                    }
                    Origin::Resolved { id } => {
                        anchor.cloud_id = Some(id.clone());
                        if !anchor.detached && !anchor.released {
                            anchor.tracking = TrackingState::Tracking;
                        }
                    }
                    Origin::Local => {}
                }
            }
            trace!(target: TARGET, handle = %handle, state = %outcome, tick, "cloud state advanced");
        }
        tick
    }

    pub fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    pub fn last_created(&self) -> Option<AnchorHandle> {
        self.state.lock().last_created
    }

    /// Most recent hosting anchor created from `source`.
    pub fn hosted_from(&self, source: AnchorHandle) -> Option<AnchorHandle> {
        self.state
            .lock()
            .anchors
            .iter()
            .rev()
            .find_map(|(handle, anchor)| match anchor.origin {
                Origin::Hosted { source: s, .. } if s == source => Some(*handle),
                _ => None,
            })
    }

    pub fn host_ttl(&self, handle: AnchorHandle) -> Option<u32> {
        match self.state.lock().anchors.get(&handle)?.origin {
            Origin::Hosted { ttl_days, .. } => Some(ttl_days),
            _ => None,
        }
    }

    pub fn is_live(&self, handle: AnchorHandle) -> bool {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| !anchor.released)
            .unwrap_or(false)
    }

    pub fn was_detached(&self, handle: AnchorHandle) -> bool {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| anchor.detached)
            .unwrap_or(false)
    }

    /// Releases that actually freed the anchor: 0 or 1.
    pub fn release_count(&self, handle: AnchorHandle) -> u32 {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| u32::from(anchor.released))
            .unwrap_or(0)
    }

    /// Every call to [`Platform::release`] for `handle`, including no-ops.
    pub fn release_calls(&self, handle: AnchorHandle) -> u32 {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| anchor.release_calls)
            .unwrap_or(0)
    }

    /// Hosting and resolving anchors that have not been released.
    pub fn live_cloud_anchor_count(&self) -> usize {
        self.state
            .lock()
            .anchors
            .values()
            .filter(|anchor| !anchor.released && !matches!(anchor.origin, Origin::Local))
            .count()
    }
}

impl SimState {
    fn create(&mut self, anchor: SimAnchor) -> AnchorHandle {
        self.next_handle += 1;
        let handle = AnchorHandle::from_raw(self.next_handle);
        self.anchors.insert(handle, anchor);
        self.last_created = Some(handle);
        handle
    }

    fn check_request(&mut self) -> Result<(), RejectionError> {
        if let Some(err) = self.rejections.pop_front() {
            return Err(err);
        }
        if self.paused {
            status(STATUS_SESSION_PAUSED)?;
        }
        Ok(())
    }

    fn schedule_auto<F>(&mut self, handle: AnchorHandle, outcome: F)
    where
        F: FnOnce(&SimState, AutoComplete) -> CloudAnchorState,
    {
        let Some(auto) = self.auto else {
            return;
        };
        let outcome = outcome(self, auto);
        let due = self.tick + auto.latency_ticks.max(1);
        if let Some(anchor) = self.anchors.get_mut(&handle) {
            anchor.scheduled = Some((due, outcome));
        }
    }
}

impl Platform for SimulatedPlatform {
    fn host_anchor(
        &self,
        anchor: AnchorHandle,
        ttl_days: u32,
    ) -> Result<AnchorHandle, RejectionError> {
        let mut state = self.state.lock();
        state.check_request()?;
        if !(MIN_TTL_DAYS..=MAX_TTL_DAYS).contains(&ttl_days) {
            return Err(RejectionError::InvalidArgument(format!(
                "ttl_days {ttl_days} outside {MIN_TTL_DAYS}..={MAX_TTL_DAYS}"
            )));
        }
        let source = state
            .anchors
            .get(&anchor)
            .filter(|source| !source.released)
            .ok_or_else(|| RejectionError::InvalidArgument(format!("{anchor} is not a live anchor")))?;
        if source.tracking != TrackingState::Tracking {
            status(STATUS_NOT_TRACKING)?;
        }

        let handle = state.create(SimAnchor::new(
            Origin::Hosted {
                source: anchor,
                ttl_days,
            },
            CloudAnchorState::TaskInProgress,
            TrackingState::Tracking,
        ));
        state.schedule_auto(handle, |_, auto| auto.host_outcome);
        debug!(target: TARGET, source = %anchor, handle = %handle, ttl_days, "host task started");
        Ok(handle)
    }

    fn resolve_anchor(&self, id: &CloudAnchorId) -> Result<AnchorHandle, RejectionError> {
        let mut state = self.state.lock();
        state.check_request()?;
        let handle = state.create(SimAnchor::new(
            Origin::Resolved { id: id.clone() },
            CloudAnchorState::TaskInProgress,
            TrackingState::Paused,
        ));
        let id = id.clone();
        state.schedule_auto(handle, move |state, _| {
            if state.hosted_ids.contains(&id) {
                CloudAnchorState::Success
            } else {
                CloudAnchorState::Error(CloudAnchorError::CloudIdNotFound)
            }
        });
        debug!(target: TARGET, handle = %handle, "resolve task started");
        Ok(handle)
    }

    fn cloud_state(&self, handle: AnchorHandle) -> CloudAnchorState {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| anchor.cloud_state)
            .unwrap_or(CloudAnchorState::None)
    }

    fn cloud_anchor_id(&self, handle: AnchorHandle) -> Option<CloudAnchorId> {
        let state = self.state.lock();
        let anchor = state.anchors.get(&handle)?;
        if anchor.cloud_state.is_success() {
            anchor.cloud_id.clone()
        } else {
            None
        }
    }

    fn tracking_state(&self, handle: AnchorHandle) -> TrackingState {
        self.state
            .lock()
            .anchors
            .get(&handle)
            .map(|anchor| {
                if anchor.released {
                    TrackingState::Stopped
                } else {
                    anchor.tracking
                }
            })
            .unwrap_or(TrackingState::Stopped)
    }

    fn detach(&self, handle: AnchorHandle) {
        if let Some(anchor) = self.state.lock().anchors.get_mut(&handle) {
            anchor.detached = true;
            anchor.tracking = TrackingState::Stopped;
        }
    }

    fn release(&self, handle: AnchorHandle) {
        if let Some(anchor) = self.state.lock().anchors.get_mut(&handle) {
            anchor.release_calls += 1;
            anchor.released = true;
        }
    }
}
