//! Reliable-ordered channel bookkeeping
//!
//! The sender keeps every payload until it is acked and hands back whatever
//! is due for (re)transmission. The receiver reorders by sequence number and
//! drops duplicates, so payloads come out exactly once and in send order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How far ahead of the next expected sequence a packet may be buffered
pub(super) const REORDER_WINDOW: u32 = 1024;

struct Pending {
    payload: Vec<u8>,
    last_sent: Option<Instant>,
}

/// Outgoing half: sequence assignment and retransmission
#[derive(Default)]
pub(super) struct ReliableSender {
    next_sequence: u32,
    unacked: BTreeMap<u32, Pending>,
}

impl ReliableSender {
    /// Queue a payload, returning its sequence number
    pub(super) fn push(&mut self, payload: Vec<u8>) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.unacked.insert(
            sequence,
            Pending {
                payload,
                last_sent: None,
            },
        );
        sequence
    }

    pub(super) fn ack(&mut self, sequence: u32) {
        self.unacked.remove(&sequence);
    }

    /// Payloads never sent, or not acked within `resend_interval`
    ///
    /// Marks each returned payload as sent at `now`.
    pub(super) fn due(&mut self, now: Instant, resend_interval: Duration) -> Vec<(u32, Vec<u8>)> {
        self.unacked
            .iter_mut()
            .filter(|(_, pending)| {
                pending
                    .last_sent
                    .is_none_or(|sent| now.duration_since(sent) >= resend_interval)
            })
            .map(|(&sequence, pending)| {
                pending.last_sent = Some(now);
                (sequence, pending.payload.clone())
            })
            .collect()
    }

    /// Payloads not acked yet
    pub(super) fn in_flight(&self) -> usize {
        self.unacked.len()
    }
}

/// Incoming half: in-order delivery
#[derive(Default)]
pub(super) struct ReliableReceiver {
    next_expected: u32,
    buffered: BTreeMap<u32, Vec<u8>>,
}

impl ReliableReceiver {
    /// Accept a packet, returning every payload that is now deliverable
    pub(super) fn accept(&mut self, sequence: u32, payload: Vec<u8>) -> Vec<Vec<u8>> {
        let ahead = sequence.wrapping_sub(self.next_expected);
        if ahead >= REORDER_WINDOW {
            // Already delivered (duplicate) or absurdly far ahead
            return Vec::new();
        }
        self.buffered.entry(sequence).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(payload) = self.buffered.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    #[cfg(test)]
    pub(super) fn buffered(&self) -> usize {
        self.buffered.len()
    }
}
