//! Publisher-confirm bookkeeping.
//!
//! Every publish draws a fresh sequence number which stays in the
//! unconfirmed set until the broker reports ack or nack. Nacks are counted,
//! never retried; the ledger exists for observability only.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Snapshot of delivery-confirmation statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Total messages published on the current process.
    pub published: u64,
    /// Confirms received as ack.
    pub acked: u64,
    /// Confirms received as nack.
    pub nacked: u64,
    /// Sequence numbers still awaiting a confirm.
    pub unconfirmed: u64,
}

/// Tracks published sequence numbers awaiting broker confirmation.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    sequence: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    pending: Mutex<BTreeSet<u64>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw the next sequence number and mark it unconfirmed.
    pub fn begin_delivery(&self) -> u64 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().expect("ledger lock").insert(seq);
        seq
    }

    /// Record a broker ack for a sequence number.
    pub fn record_ack(&self, seq: u64) {
        self.settle(seq);
        self.acked.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a broker nack for a sequence number. Counted, not retried.
    pub fn record_nack(&self, seq: u64) {
        self.settle(seq);
        self.nacked.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop confirm state after a channel dies; pending confirms will never
    /// arrive on the next channel.
    pub fn reset_pending(&self) {
        self.pending.lock().expect("ledger lock").clear();
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            published: self.sequence.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            nacked: self.nacked.load(Ordering::SeqCst),
            unconfirmed: self.pending.lock().expect("ledger lock").len() as u64,
        }
    }

    fn settle(&self, seq: u64) {
        self.pending.lock().expect("ledger lock").remove(&seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let ledger = DeliveryLedger::new();
        assert_eq!(ledger.begin_delivery(), 1);
        assert_eq!(ledger.begin_delivery(), 2);
        assert_eq!(ledger.begin_delivery(), 3);
        assert_eq!(ledger.stats().unconfirmed, 3);
    }

    #[test]
    fn test_ack_and_nack_settle_pending() {
        let ledger = DeliveryLedger::new();
        let a = ledger.begin_delivery();
        let b = ledger.begin_delivery();
        ledger.record_ack(a);
        ledger.record_nack(b);

        let stats = ledger.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.nacked, 1);
        assert_eq!(stats.unconfirmed, 0);
    }

    #[test]
    fn test_reset_clears_pending_but_keeps_counters() {
        let ledger = DeliveryLedger::new();
        let a = ledger.begin_delivery();
        ledger.record_ack(a);
        ledger.begin_delivery();
        ledger.reset_pending();

        let stats = ledger.stats();
        assert_eq!(stats.unconfirmed, 0);
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.published, 2);
    }
}
