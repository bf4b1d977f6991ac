//! Virtual-time event scheduling for simulated nodes

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use arqsim_core::NodeId;

use crate::audit::AuditEvent;
use crate::transceiver::{PipelineStage, TransmissionId};

/// Virtual time elapsed since the start of the run.
pub type SimTime = Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Everything a node can be woken up for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Coordinator trigger: become the sender.
    Start,
    /// Wire bytes delivered by the peer.
    Inbound(Vec<u8>),
    /// Retransmission timer of a window slot.
    Timeout { slot: usize },
    /// Deferred step of an in-flight transmission.
    Pipeline {
        stage: PipelineStage,
        id: TransmissionId,
    },
}

/// Schedule-after / cancel contract the protocol engine runs on.
pub trait Scheduler {
    fn now(&self) -> SimTime;

    /// Fires `event` once after `delay` unless cancelled first.
    fn schedule_after(&mut self, delay: Duration, event: NodeEvent) -> TimerHandle;

    /// Idempotent; cancelling a fired or cancelled handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Node-scoped view of the simulation handed to protocol code.
pub trait Host: Scheduler {
    fn node_id(&self) -> NodeId;

    /// Puts `wire` on the link; it reaches the peer after `delay`.
    fn transmit_after(&mut self, delay: Duration, wire: Vec<u8>);

    fn audit(&mut self, event: AuditEvent);

    /// Ends the run once the current event has been handled.
    fn finish(&mut self);
}

struct Scheduled<E> {
    at: SimTime,
    seq: u64,
    event: E,
}

// min-heap on (time, scheduling order)
impl<E> Ord for Scheduled<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl<E> Eq for Scheduled<E> {}

/// Discrete-event queue ordered by virtual time, ties broken FIFO.
pub struct EventQueue<E> {
    heap: BinaryHeap<Scheduled<E>>,
    pending: HashSet<u64>,
    next_seq: u64,
    now: SimTime,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventQueue<E> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            next_seq: 0,
            now: SimTime::ZERO,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn schedule_at(&mut self, at: SimTime, event: E) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            at: at.max(self.now),
            seq,
            event,
        });
        self.pending.insert(seq);
        TimerHandle(seq)
    }

    pub fn schedule_after(&mut self, delay: Duration, event: E) -> TimerHandle {
        self.schedule_at(self.now + delay, event)
    }

    /// Returns whether the handle was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Number of events that will still fire.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time of the next live event, discarding cancelled ones on top.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(top) = self.heap.peek() {
            if self.pending.contains(&top.seq) {
                return Some(top.at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the next live event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(SimTime, E)> {
        while let Some(next) = self.heap.pop() {
            if self.pending.remove(&next.seq) {
                self.now = next.at;
                return Some((next.at, next.event));
            }
        }
        None
    }
}
