//! Relay Lifecycle State

use std::fmt;
use tokio::sync::watch;

/// Lifecycle of a [`Relay`](super::Relay)
///
/// `Created → Listening → ShuttingDown → Stopped`, with `Failed` reached
/// from `Created` when setup does not complete. `Stopped` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    Created,
    Listening,
    ShuttingDown,
    Stopped,
    Failed,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RelayState::Stopped | RelayState::Failed)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Created => "created",
            RelayState::Listening => "listening",
            RelayState::ShuttingDown => "shutting down",
            RelayState::Stopped => "stopped",
            RelayState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared state cell. Every transition is a compare-and-set under the
/// watch channel's lock, so racing callers cannot both win.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<RelayState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(RelayState::Created);
        Self { tx }
    }

    pub(crate) fn get(&self) -> RelayState {
        *self.tx.borrow()
    }

    /// Move `from → to`. Returns false and leaves the state alone when the
    /// current state is not `from`.
    pub(crate) fn transition(&self, from: RelayState, to: RelayState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Apply `f` to the current state atomically. Returns the new state.
    pub(crate) fn update<F>(&self, f: F) -> RelayState
    where
        F: FnOnce(RelayState) -> RelayState,
    {
        let mut next = RelayState::Created;
        self.tx.send_if_modified(|state| {
            next = f(*state);
            let changed = next != *state;
            *state = next;
            changed
        });
        next
    }

    pub(crate) async fn wait_for<F>(&self, mut pred: F) -> RelayState
    where
        F: FnMut(RelayState) -> bool,
    {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| pred(*state)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`
            Err(_) => self.get(),
        };
        state
    }
}
