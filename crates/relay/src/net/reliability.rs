use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Wrap-aware comparison for 32-bit sequence numbers.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    s1 != s2 && s1.wrapping_sub(s2) < u32::MAX / 2
}

#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub sequence: u32,
    pub payload: Bytes,
    pub first_sent: Instant,
    pub last_sent: Instant,
    pub resends: u32,
}

/// Outgoing half of a reliable-ordered channel. Frames stay queued until a
/// cumulative ack covers them and are resent once `resend_interval` passes
/// without one.
#[derive(Debug)]
pub struct ReliableSender {
    pending: VecDeque<PendingFrame>,
    next_sequence: u32,
    srtt: f32,
    rtt_var: f32,
}

impl Default for ReliableSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableSender {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_sequence: 0,
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    /// Queues `payload` and returns the sequence it must be sent with.
    pub fn push(&mut self, payload: Bytes, now: Instant) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending.push_back(PendingFrame {
            sequence,
            payload,
            first_sent: now,
            last_sent: now,
            resends: 0,
        });
        sequence
    }

    /// Drops every frame up to and including `ack`.
    pub fn acknowledge(&mut self, ack: u32, now: Instant) -> usize {
        let mut acked = 0;
        while let Some(front) = self.pending.front() {
            if sequence_greater_than(front.sequence, ack) {
                break;
            }
            if front.resends == 0 {
                let rtt = now.duration_since(front.first_sent).as_secs_f32() * 1000.0;
                self.update_rtt(rtt);
            }
            self.pending.pop_front();
            acked += 1;
        }
        acked
    }

    /// Frames whose last transmission is older than `resend_interval`; their
    /// send time is bumped as they are returned.
    pub fn due(&mut self, now: Instant, resend_interval: Duration) -> Vec<(u32, Bytes)> {
        let mut due = Vec::new();
        for frame in &mut self.pending {
            if now.duration_since(frame.last_sent) >= resend_interval {
                frame.last_sent = now;
                frame.resends += 1;
                due.push((frame.sequence, frame.payload.clone()));
            }
        }
        due
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.len()
    }
}

/// Incoming half of a reliable-ordered channel. Out-of-order frames are held
/// back until the gap before them fills.
#[derive(Debug)]
pub struct ReliableReceiver {
    next_expected: u32,
    delivered_any: bool,
    buffered: BTreeMap<u32, Bytes>,
    max_buffered: usize,
}

impl Default for ReliableReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self {
            next_expected: 0,
            delivered_any: false,
            buffered: BTreeMap::new(),
            max_buffered: 256,
        }
    }

    /// Accepts one frame and returns the payloads now deliverable in order.
    /// Duplicates and frames too far ahead are dropped.
    pub fn accept(&mut self, sequence: u32, payload: Bytes) -> Vec<Bytes> {
        if sequence != self.next_expected {
            let ahead = sequence.wrapping_sub(self.next_expected) as usize;
            if sequence_greater_than(sequence, self.next_expected) && ahead <= self.max_buffered {
                self.buffered.entry(sequence).or_insert(payload);
            }
            return Vec::new();
        }

        let mut ready = vec![payload];
        self.delivered_any = true;
        self.next_expected = self.next_expected.wrapping_add(1);
        while let Some(next) = self.buffered.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    /// Cumulative ack: the last sequence delivered in order. `None` before
    /// anything arrived.
    pub fn ack(&self) -> Option<u32> {
        self.delivered_any.then(|| self.next_expected.wrapping_sub(1))
    }
}
