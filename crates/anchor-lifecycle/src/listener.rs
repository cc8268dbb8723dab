use anchor_core::{AnchorHandle, CloudAnchorId, CloudAnchorState};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::handle::OwnedAnchor;

/// Identifies one registered host or resolve operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationToken(u64);

impl OperationToken {
    pub(crate) fn new(raw: u64) -> Self {
        OperationToken(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Host,
    Resolve,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Host => f.write_str("host"),
            OperationKind::Resolve => f.write_str("resolve"),
        }
    }
}

/// Terminal result of an operation, handed to its listener.
///
/// The completion owns the platform anchor. Keep it via
/// [`Completion::into_anchor`]; dropping the completion releases it.
#[derive(Debug)]
pub struct Completion {
    pub token: OperationToken,
    pub kind: OperationKind,
    pub state: CloudAnchorState,
    /// Set when `state` is success.
    pub cloud_anchor_id: Option<CloudAnchorId>,
    /// The id passed to resolve; `None` for host.
    pub requested_id: Option<CloudAnchorId>,
    anchor: OwnedAnchor,
}

impl Completion {
    pub(crate) fn new(
        token: OperationToken,
        kind: OperationKind,
        state: CloudAnchorState,
        requested_id: Option<CloudAnchorId>,
        anchor: OwnedAnchor,
    ) -> Self {
        let cloud_anchor_id = if state.is_success() {
            anchor.cloud_anchor_id()
        } else {
            None
        };
        Self {
            token,
            kind,
            state,
            cloud_anchor_id,
            requested_id,
            anchor,
        }
    }

    pub fn handle(&self) -> AnchorHandle {
        self.anchor.handle()
    }

    pub fn anchor(&self) -> &OwnedAnchor {
        &self.anchor
    }

    pub fn into_anchor(self) -> OwnedAnchor {
        self.anchor
    }

    pub fn record(&self) -> CompletionRecord {
        CompletionRecord {
            token: self.token,
            kind: self.kind,
            handle: self.handle(),
            state: self.state,
            cloud_anchor_id: self.cloud_anchor_id.clone(),
            requested_id: self.requested_id.clone(),
        }
    }
}

/// Serializable summary of a [`Completion`], without anchor ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub token: OperationToken,
    pub kind: OperationKind,
    pub handle: AnchorHandle,
    pub state: CloudAnchorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_anchor_id: Option<CloudAnchorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_id: Option<CloudAnchorId>,
}

/// Called once with the terminal result of an operation.
pub type Listener = Box<dyn FnOnce(Completion) + Send + 'static>;

/// Listener that forwards the completion to an awaitable receiver.
///
/// If the receiver has gone away the completion is dropped, which releases
/// the anchor.
pub fn oneshot() -> (Listener, oneshot::Receiver<Completion>) {
    let (tx, rx) = oneshot::channel();
    let listener: Listener = Box::new(move |completion| {
        if tx.send(completion).is_err() {
            tracing::debug!(
                target: "anchor::lifecycle",
                "completion receiver dropped; releasing anchor"
            );
        }
    });
    (listener, rx)
}
