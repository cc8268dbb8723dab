//! Frame loop that replays an intent script against the simulated platform
//! and writes one JSON line per observable event.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anchor_core::{AnchorHandle, CloudAnchorId, RoomCode, TrackingState};
use anchor_lifecycle::{
    CloudAnchorManager, CompletionRecord, ConfigError, ControllerEvent, ControllerEvents,
    HostResolveController, ManagerConfig, ModeKind, OperationKind, OperationToken, RoomCodeUpdate, SimulatedPlatform,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::script::{Intent, Script};

const TARGET: &str = "anchor_sim::app";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("room {0} does not exist")]
    UnknownRoom(RoomCode),
}

/// In-memory stand-in for the service that maps room codes to cloud anchor
/// ids between devices.
#[derive(Debug, Default)]
pub struct RoomBroker {
    next_code: u64,
    rooms: HashMap<RoomCode, Option<CloudAnchorId>>,
}

impl RoomBroker {
    pub fn allocate(&mut self) -> RoomCode {
        loop {
            self.next_code += 1;
            if let Some(code) = RoomCode::new(self.next_code) {
                self.rooms.insert(code, None);
                return code;
            }
        }
    }

    pub fn publish(&mut self, code: RoomCode, id: CloudAnchorId) -> Result<(), BrokerError> {
        let slot = self.rooms.get_mut(&code).ok_or(BrokerError::UnknownRoom(code))?;
        *slot = Some(id);
        Ok(())
    }

    pub fn lookup(&self, code: RoomCode) -> Result<Option<&CloudAnchorId>, BrokerError> {
        self.rooms
            .get(&code)
            .map(Option::as_ref)
            .ok_or(BrokerError::UnknownRoom(code))
    }
}

struct ChannelEvents(UnboundedSender<ControllerEvent>);

impl ControllerEvents for ChannelEvents {
    fn on_event(&self, event: &ControllerEvent) {
        let _ = self.0.send(event.clone());
    }
}

#[derive(Serialize)]
struct Line<'a> {
    frame: u64,
    #[serde(flatten)]
    entry: Entry<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
enum Entry<'a> {
    Intent(&'a Intent),
    Controller(&'a ControllerEvent),
    Completion(&'a CompletionRecord),
    Rejected {
        error: String,
        transient: bool,
    },
    Cancelled {
        token: OperationToken,
    },
    Summary {
        mode: ModeKind,
        pending: usize,
        tracked: Option<AnchorHandle>,
        completions: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub frames: u64,
    pub completions: usize,
    pub mode: ModeKind,
    pub tracked: Option<AnchorHandle>,
}

pub struct Simulation<W: Write> {
    config: SimConfig,
    platform: Arc<SimulatedPlatform>,
    controller: HostResolveController,
    manager: CloudAnchorManager,
    events: UnboundedReceiver<ControllerEvent>,
    completion_tx: UnboundedSender<CompletionRecord>,
    completions: UnboundedReceiver<CompletionRecord>,
    broker: RoomBroker,
    hosting_room: Option<RoomCode>,
    watching: Option<RoomCode>,
    delivered: bool,
    tokens: Vec<OperationToken>,
    hosted_ids: Vec<CloudAnchorId>,
    completed: usize,
    script: Script,
    frame: u64,
    out: W,
}

impl<W: Write> Simulation<W> {
    pub fn new(
        config: SimConfig,
        manager_config: ManagerConfig,
        out: W,
    ) -> Result<Self, ConfigError> {
        let platform = Arc::new(SimulatedPlatform::with_auto_complete(config.latency_ticks));
        platform.set_host_outcome(config.host_outcome);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let controller = HostResolveController::new(
            platform.clone(),
            manager_config.clone(),
            Arc::new(ChannelEvents(event_tx)),
        )?;
        let manager = CloudAnchorManager::new(platform.clone(), manager_config)?;
        let script = Script::new(config.steps.clone());
        Ok(Self {
            config,
            platform,
            controller,
            manager,
            events,
            completion_tx,
            completions,
            broker: RoomBroker::default(),
            hosting_room: None,
            watching: None,
            delivered: false,
            tokens: Vec::new(),
            hosted_ids: Vec::new(),
            completed: 0,
            script,
            frame: 0,
            out,
        })
    }

    pub async fn run(mut self) -> anyhow::Result<Summary> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.frame_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.frame < self.config.max_frames {
            interval.tick().await;
            self.frame += 1;
            self.step()?;
            if self.script.is_finished() && self.is_idle() {
                debug!(target: TARGET, frame = self.frame, "script finished and nothing pending");
                break;
            }
        }

        let summary = Summary {
            frames: self.frame,
            completions: self.completed,
            mode: self.controller.mode_kind(),
            tracked: self.controller.tracked_anchor(),
        };
        self.emit(Entry::Summary {
            mode: summary.mode,
            pending: self.manager.pending_count(),
            tracked: summary.tracked,
            completions: summary.completions,
        })?;
        self.out.flush()?;
        Ok(summary)
    }

    fn is_idle(&self) -> bool {
        self.controller.mode_kind() == ModeKind::None && self.manager.pending_count() == 0
    }

    /// One world update: intents, platform refresh, polls, then UI plumbing.
    fn step(&mut self) -> anyhow::Result<()> {
        for intent in self.script.due(self.frame) {
            self.emit(Entry::Intent(&intent))?;
            self.apply(intent)?;
        }

        self.platform.advance_tick();
        self.controller.on_update();
        self.manager.poll_completions();
        self.deliver_watched_room()?;

        while let Ok(event) = self.events.try_recv() {
            self.emit(Entry::Controller(&event))?;
            self.react(event);
        }
        while let Ok(record) = self.completions.try_recv() {
            self.emit(Entry::Completion(&record))?;
            self.completed += 1;
            if record.kind == OperationKind::Host {
                self.hosted_ids.extend(record.cloud_anchor_id.clone());
            }
        }
        Ok(())
    }

    fn apply(&mut self, intent: Intent) -> anyhow::Result<()> {
        let mode = self.controller.mode_kind();
        if !intent_allowed(&intent, mode) {
            warn!(target: TARGET, ?intent, mode = %mode, "intent not available in this mode; skipped");
            return Ok(());
        }
        match intent {
            Intent::HostButton => self.controller.on_host_button_press(),
            Intent::ResolveButton => self.controller.on_resolve_button_press(),
            Intent::DialogOk { room_code } => self.controller.on_resolve_dialog_ok_press(room_code),
            Intent::DialogCancel => self.controller.on_resolve_dialog_cancel_press(),
            Intent::CommunicationError => self.controller.on_communication_error(),
            Intent::PlaceAnchor => {
                let local = self.platform.create_local_anchor(TrackingState::Tracking);
                if let Err(err) = self.controller.register_local_anchor_as_cloud_anchor(local) {
                    self.emit(Entry::Rejected {
                        error: err.to_string(),
                        transient: err.is_transient(),
                    })?;
                }
            }
            Intent::HostMany { count } => {
                for _ in 0..count {
                    let local = self.platform.create_local_anchor(TrackingState::Tracking);
                    let listener = self.forwarding_listener();
                    match self.manager.host(local, listener) {
                        Ok(token) => self.tokens.push(token),
                        Err(err) => self.emit(Entry::Rejected {
                            error: err.to_string(),
                            transient: err.is_transient(),
                        })?,
                    }
                }
            }
            Intent::Resolve { cloud_anchor_id } => {
                let ids = match cloud_anchor_id {
                    Some(id) => vec![id],
                    None => self.hosted_ids.clone(),
                };
                for id in ids {
                    let listener = self.forwarding_listener();
                    match self.manager.resolve(&id, listener) {
                        Ok(token) => self.tokens.push(token),
                        Err(err) => self.emit(Entry::Rejected {
                            error: err.to_string(),
                            transient: err.is_transient(),
                        })?,
                    }
                }
            }
            Intent::CancelLast => {
                let last = self
                    .tokens
                    .iter()
                    .rev()
                    .copied()
                    .find(|token| self.manager.is_pending(*token));
                if let Some(token) = last {
                    if self.manager.cancel(token) {
                        self.emit(Entry::Cancelled { token })?;
                    }
                }
            }
        }
        Ok(())
    }

    fn forwarding_listener(&self) -> impl FnOnce(anchor_lifecycle::Completion) + Send + 'static {
        let tx = self.completion_tx.clone();
        move |completion| {
            let _ = tx.send(completion.record());
        }
    }

    /// Hands the id published under the watched room to the controller once.
    fn deliver_watched_room(&mut self) -> anyhow::Result<()> {
        let Some(code) = self.watching else {
            return Ok(());
        };
        if self.delivered {
            return Ok(());
        }
        match self.broker.lookup(code) {
            Ok(Some(id)) => {
                let id = id.clone();
                self.delivered = true;
                info!(target: TARGET, room_code = %code, cloud_anchor_id = %id, "room published an anchor");
                if let Err(err) = self.controller.on_cloud_anchor_id_made_available(&id) {
                    self.emit(Entry::Rejected {
                        error: err.to_string(),
                        transient: err.is_transient(),
                    })?;
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(target: TARGET, error = %err, "room lookup failed");
                self.watching = None;
                self.controller.on_communication_error();
            }
        }
        Ok(())
    }

    fn react(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::RoomCode { update } => match update {
                RoomCodeUpdate::Allocate => {
                    let code = self.broker.allocate();
                    info!(target: TARGET, room_code = %code, "allocated room for hosting");
                    self.hosting_room = Some(code);
                }
                RoomCodeUpdate::Show(code) => {
                    self.watching = Some(code);
                    self.delivered = false;
                }
                RoomCodeUpdate::Clear => {
                    self.hosting_room = None;
                    self.watching = None;
                }
            },
            ControllerEvent::CloudAnchorAvailable { cloud_anchor_id } => {
                let Some(code) = self.hosting_room else {
                    warn!(target: TARGET, "hosted anchor has no room to publish into");
                    return;
                };
                if let Err(err) = self.broker.publish(code, cloud_anchor_id) {
                    warn!(target: TARGET, error = %err, "publishing hosted anchor failed");
                    self.controller.on_communication_error();
                }
            }
            _ => {}
        }
    }

    fn emit(&mut self, entry: Entry<'_>) -> anyhow::Result<()> {
        let line = Line {
            frame: self.frame,
            entry,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        writeln!(self.out)?;
        Ok(())
    }
}

/// Mirrors which buttons the UI would be showing, so a script cannot trip
/// the controller's contract checks.
fn intent_allowed(intent: &Intent, mode: ModeKind) -> bool {
    match intent {
        Intent::HostButton => matches!(mode, ModeKind::None | ModeKind::Hosting),
        Intent::ResolveButton => {
            matches!(mode, ModeKind::None | ModeKind::Resolving | ModeKind::Resolved)
        }
        Intent::DialogOk { .. } | Intent::DialogCancel => mode == ModeKind::ResolveDialogPresenting,
        Intent::PlaceAnchor
        | Intent::CommunicationError
        | Intent::HostMany { .. }
        | Intent::Resolve { .. }
        | Intent::CancelLast => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script;
    use serde_json::Value;

    fn config(steps: Vec<crate::script::Step>) -> SimConfig {
        SimConfig {
            frame_ms: 1,
            latency_ticks: 2,
            max_frames: 60,
            steps,
            ..SimConfig::default()
        }
    }

    fn lines(out: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn broker_round_trips_published_ids() {
        let mut broker = RoomBroker::default();
        let code = broker.allocate();
        assert_eq!(code.get(), 1);
        assert_eq!(broker.lookup(code), Ok(None));
        let id = CloudAnchorId::new("ua-9").unwrap();
        broker.publish(code, id.clone()).unwrap();
        assert_eq!(broker.lookup(code), Ok(Some(&id)));

        let missing = RoomCode::new(77).unwrap();
        assert_eq!(broker.lookup(missing), Err(BrokerError::UnknownRoom(missing)));
    }

    #[tokio::test]
    async fn single_flow_hosts_then_resolves_through_the_room() {
        let mut out = Vec::new();
        let summary = Simulation::new(
            config(script::default_single_script()),
            ManagerConfig::default(),
            &mut out,
        )
        .unwrap()
        .run()
        .await
        .unwrap();

        assert_eq!(summary.mode, ModeKind::None);
        assert!(summary.tracked.is_some());
        assert!(summary.frames < 60);

        let lines = lines(&out);
        assert!(lines
            .iter()
            .any(|line| line["event"] == "cloud_anchor_available"));
        let promotions: Vec<&Value> = lines
            .iter()
            .filter(|line| line["event"] == "promoted")
            .collect();
        assert_eq!(promotions.len(), 2);
        assert_eq!(promotions[1]["kind"], "resolve");
        assert_eq!(promotions[1]["state"], "success");
        assert_eq!(lines.last().unwrap()["source"], "summary");
    }

    #[tokio::test]
    async fn multi_flow_reports_every_uncancelled_operation() {
        let mut out = Vec::new();
        let summary = Simulation::new(
            config(script::default_multi_script()),
            ManagerConfig::default(),
            &mut out,
        )
        .unwrap()
        .run()
        .await
        .unwrap();

        // Three hosts, their three resolves, and one unknown id.
        assert_eq!(summary.completions, 7);
        let lines = lines(&out);
        assert_eq!(
            lines
                .iter()
                .filter(|line| line["source"] == "cancelled")
                .count(),
            1
        );
        assert!(lines.iter().any(|line| line["source"] == "completion"
            && line["state"]["error"] == "cloud_id_not_found"));
    }

    #[test]
    fn hidden_buttons_are_not_pressed() {
        assert!(!intent_allowed(&Intent::HostButton, ModeKind::Resolving));
        assert!(!intent_allowed(&Intent::DialogCancel, ModeKind::None));
        assert!(intent_allowed(&Intent::ResolveButton, ModeKind::Resolved));
    }
}
