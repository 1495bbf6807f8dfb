//! Priority queue of candidate pairs awaiting debate.

use crate::debate::DebateRequest;
use crate::entities::CandidatePair;

/// One queued pair.
#[derive(Debug, Clone)]
pub struct QueuedPair {
    pub request: DebateRequest,
    pub priority: f64,
    seq: u64,
}

impl QueuedPair {
    pub fn key(&self) -> String {
        self.request.pair.key()
    }
}

/// Pairs collected for one `process` call.
///
/// Dispatch order is priority descending; equal priorities keep enqueue
/// order.
#[derive(Debug, Clone, Default)]
pub struct BatchQueue {
    items: Vec<QueuedPair>,
    next_seq: u64,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue with `priority` also serving as the escalation value score.
    pub fn enqueue(&mut self, pair: CandidatePair, priority: f64) {
        self.enqueue_request(
            DebateRequest {
                pair,
                preliminary_score: priority,
                value_score: priority,
            },
            priority,
        );
    }

    pub fn enqueue_request(&mut self, request: DebateRequest, priority: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(QueuedPair {
            request,
            priority,
            seq,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain in dispatch order.
    pub fn into_dispatch_order(mut self) -> Vec<QueuedPair> {
        self.items.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.seq.cmp(&b.seq))
        });
        self.items
    }
}

impl Extend<(CandidatePair, f64)> for BatchQueue {
    fn extend<I: IntoIterator<Item = (CandidatePair, f64)>>(&mut self, iter: I) {
        for (pair, priority) in iter {
            self.enqueue(pair, priority);
        }
    }
}
