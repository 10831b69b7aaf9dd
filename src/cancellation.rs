//! Per-slot request sequencing: monotonic sequence number + CancellationToken.
//! Every request that will write into a DOM slot takes a guard first. A newer
//! request on the same slot advances the sequence and cancels the older
//! token, so stale responses are discarded and superseded streams stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dom::NodeId;

struct SlotState {
    latest: Arc<AtomicU64>,
    token: CancellationToken,
}

#[derive(Default)]
pub struct SlotSequencer {
    slots: Mutex<HashMap<NodeId, SlotState>>,
}

impl SlotSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request on `slot`: cancels the previous one, advances the
    /// sequence, and returns the guard the new request must check.
    pub fn begin(&self, slot: NodeId) -> SequenceGuard {
        let mut slots = self.slots.lock();
        let state = slots.entry(slot).or_insert_with(|| SlotState {
            latest: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
        });
        state.token.cancel();
        state.token = CancellationToken::new();
        let seq = state.latest.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(?slot, seq, "slot request started");
        SequenceGuard {
            latest: Arc::clone(&state.latest),
            mine: seq,
            token: state.token.child_token(),
        }
    }

    /// Latest sequence issued for `slot` (0 if none).
    pub fn current(&self, slot: NodeId) -> u64 {
        self.slots
            .lock()
            .get(&slot)
            .map(|s| s.latest.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Cancel whatever is in flight for `slot` and forget it.
    pub fn release(&self, slot: NodeId) {
        if let Some(state) = self.slots.lock().remove(&slot) {
            state.token.cancel();
            // outstanding guards must see themselves as stale
            state.latest.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Checked by a request before each write into its slot.
#[derive(Clone)]
pub struct SequenceGuard {
    latest: Arc<AtomicU64>,
    mine: u64,
    token: CancellationToken,
}

impl SequenceGuard {
    /// True while no newer request has started on the slot.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.latest.load(Ordering::SeqCst) == self.mine
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn sequence(&self) -> u64 {
        self.mine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_makes_older_stale() {
        let seq = SlotSequencer::new();
        let first = seq.begin(NodeId(1));
        assert!(first.should_continue());

        let second = seq.begin(NodeId(1));
        assert!(!first.is_current());
        assert!(first.is_cancelled());
        assert!(second.should_continue());
        assert_eq!(second.sequence(), 2);
        assert_eq!(seq.current(NodeId(1)), 2);
    }

    #[test]
    fn slots_are_independent() {
        let seq = SlotSequencer::new();
        let a = seq.begin(NodeId(1));
        let _b = seq.begin(NodeId(2));
        assert!(a.should_continue());
        assert_eq!(seq.current(NodeId(3)), 0);
    }

    #[test]
    fn release_invalidates_outstanding_guards() {
        let seq = SlotSequencer::new();
        let guard = seq.begin(NodeId(7));
        seq.release(NodeId(7));
        assert!(!guard.should_continue());
        assert_eq!(seq.current(NodeId(7)), 0);
    }

    #[tokio::test]
    async fn cancelled_token_wakes_waiters() {
        let seq = SlotSequencer::new();
        let guard = seq.begin(NodeId(1));
        let waiter = tokio::spawn({
            let token = guard.token().clone();
            async move { token.cancelled().await }
        });
        seq.begin(NodeId(1));
        waiter.await.unwrap();
    }
}
