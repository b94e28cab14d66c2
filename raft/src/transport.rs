use tracing::trace;

use crate::msg::{Message, Millis};

/// In-flight protocol messages and their transit progress.
#[derive(Clone, Debug)]
pub struct MessageTransport {
    in_flight: Vec<Message>,
    transit_ms: Millis,
    total_sent: u64,
}

impl MessageTransport {
    pub fn new(transit_ms: Millis) -> Self {
        Self {
            in_flight: Vec::new(),
            transit_ms,
            total_sent: 0,
        }
    }

    pub fn send(&mut self, mut msg: Message) {
        trace!(from = msg.from, to = msg.to, term = msg.term, kind = ?msg.kind(), "send");
        msg.progress = 0.0;
        self.in_flight.push(msg);
        self.total_sent += 1;
    }

    /// Advance every message by `delta` and hand back, in send order, the
    /// ones whose transit completed.
    pub fn advance(&mut self, delta: Millis) -> Vec<Message> {
        let step = delta / self.transit_ms;
        for msg in &mut self.in_flight {
            msg.progress += step;
        }
        let (arrived, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|msg| msg.progress >= 1.0);
        self.in_flight = pending;
        arrived
    }

    pub fn in_flight(&self) -> &[Message] {
        &self.in_flight
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }
}
