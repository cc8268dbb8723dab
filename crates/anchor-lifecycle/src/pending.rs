use std::collections::{BTreeMap, HashMap};

use anchor_core::{AnchorHandle, CloudAnchorId, CloudAnchorState};

use crate::handle::OwnedAnchor;
use crate::listener::{Listener, OperationKind, OperationToken};

/// An in-flight host or resolve task.
pub struct PendingOperation {
    pub token: OperationToken,
    pub kind: OperationKind,
    pub anchor: OwnedAnchor,
    /// `None` for operations submitted without a listener; their completions
    /// are collected through the drain API instead.
    pub listener: Option<Listener>,
    pub requested_id: Option<CloudAnchorId>,
    pub registered_tick: u64,
}

impl std::fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("anchor", &self.anchor)
            .field("has_listener", &self.listener.is_some())
            .field("requested_id", &self.requested_id)
            .field("registered_tick", &self.registered_tick)
            .finish()
    }
}

/// Pending operations keyed by token, with a reverse index on the anchor
/// handle so that a handle can never be registered twice.
///
/// Iteration is in token order, which is registration order.
#[derive(Debug, Default)]
pub struct PendingTable {
    by_token: BTreeMap<OperationToken, PendingOperation>,
    by_handle: HashMap<AnchorHandle, OperationToken>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// If the operation's anchor or token is already in the table.
    pub fn insert(&mut self, op: PendingOperation) {
        let handle = op.anchor.handle();
        assert!(
            !self.by_handle.contains_key(&handle),
            "{handle} is already registered as a pending operation"
        );
        assert!(
            !self.by_token.contains_key(&op.token),
            "{} is already registered",
            op.token
        );
        self.by_handle.insert(handle, op.token);
        self.by_token.insert(op.token, op);
    }

    pub fn remove(&mut self, token: OperationToken) -> Option<PendingOperation> {
        let op = self.by_token.remove(&token)?;
        self.by_handle.remove(&op.anchor.handle());
        Some(op)
    }

    pub fn contains(&self, token: OperationToken) -> bool {
        self.by_token.contains_key(&token)
    }

    pub fn contains_handle(&self, handle: AnchorHandle) -> bool {
        self.by_handle.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Removes every operation whose state (as read by `state_of`) is
    /// returnable. Tokens are gathered first and removed second, so the
    /// table is never mutated while being walked.
    pub fn take_returnable<F>(&mut self, mut state_of: F) -> Vec<(PendingOperation, CloudAnchorState)>
    where
        F: FnMut(AnchorHandle) -> CloudAnchorState,
    {
        let ready: Vec<(OperationToken, CloudAnchorState)> = self
            .by_token
            .values()
            .filter_map(|op| {
                let state = state_of(op.anchor.handle());
                state.is_returnable().then_some((op.token, state))
            })
            .collect();

        ready
            .into_iter()
            .filter_map(|(token, state)| self.remove(token).map(|op| (op, state)))
            .collect()
    }

    /// Operations registered at or before `tick - threshold`.
    pub fn stalled(&self, tick: u64, threshold: u64) -> impl Iterator<Item = &PendingOperation> {
        self.by_token
            .values()
            .filter(move |op| tick.saturating_sub(op.registered_tick) >= threshold)
    }

    pub fn drain(&mut self) -> Vec<PendingOperation> {
        self.by_handle.clear();
        std::mem::take(&mut self.by_token).into_values().collect()
    }
}
