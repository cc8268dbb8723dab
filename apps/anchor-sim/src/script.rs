use anchor_core::{CloudAnchorId, RoomCode};
use serde::{Deserialize, Serialize};

/// Something the user (or the other device) does at a given frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "intent")]
pub enum Intent {
    HostButton,
    /// Tap on a plane: creates a local anchor and offers it for hosting.
    PlaceAnchor,
    ResolveButton,
    DialogOk { room_code: RoomCode },
    DialogCancel,
    /// The room code broker dropped the connection.
    CommunicationError,
    /// Multi flow: host `count` fresh local anchors at once.
    HostMany { count: usize },
    /// Multi flow: resolve an explicit id, or every id hosted so far.
    Resolve {
        #[serde(default)]
        cloud_anchor_id: Option<CloudAnchorId>,
    },
    /// Multi flow: cancel the most recent operation that is still pending.
    CancelLast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub at_frame: u64,
    #[serde(flatten)]
    pub intent: Intent,
}

/// Host an anchor, publish it under room 1, then resolve it back.
pub fn default_single_script() -> Vec<Step> {
    let mut steps = vec![
        step(1, Intent::HostButton),
        step(2, Intent::PlaceAnchor),
        step(12, Intent::HostButton),
        step(14, Intent::ResolveButton),
    ];
    if let Some(room_code) = RoomCode::new(1) {
        steps.push(step(15, Intent::DialogOk { room_code }));
    }
    steps
}

pub fn default_multi_script() -> Vec<Step> {
    vec![
        step(1, Intent::HostMany { count: 3 }),
        step(2, Intent::HostMany { count: 1 }),
        step(3, Intent::CancelLast),
        step(10, Intent::Resolve { cloud_anchor_id: None }),
        step(11, Intent::Resolve {
            cloud_anchor_id: CloudAnchorId::new("ua-unknown").ok(),
        }),
    ]
}

fn step(at_frame: u64, intent: Intent) -> Step {
    Step { at_frame, intent }
}

/// Steps sorted by frame, consumed as frames pass.
#[derive(Debug)]
pub struct Script {
    steps: std::collections::VecDeque<Step>,
}

impl Script {
    pub fn new(mut steps: Vec<Step>) -> Self {
        steps.sort_by_key(|step| step.at_frame);
        Self {
            steps: steps.into(),
        }
    }

    /// Removes and returns every step due at or before `frame`.
    pub fn due(&mut self, frame: u64) -> Vec<Intent> {
        let mut due = Vec::new();
        while self.steps.front().is_some_and(|step| step.at_frame <= frame) {
            if let Some(step) = self.steps.pop_front() {
                due.push(step.intent);
            }
        }
        due
    }

    pub fn is_finished(&self) -> bool {
        self.steps.is_empty()
    }
}
