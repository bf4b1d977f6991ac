//! In-memory host used by the unit tests.

use std::time::Duration;

use arqsim_core::{Frame, NodeId};

use crate::audit::{AuditEvent, AuditRecord, AuditSink, MemoryAudit};
use crate::scheduler::{EventQueue, Host, NodeEvent, Scheduler, SimTime, TimerHandle};

pub(crate) struct TestHost {
    pub node: NodeId,
    pub queue: EventQueue<NodeEvent>,
    /// Wire bytes with their absolute arrival time at the peer.
    pub wire: Vec<(SimTime, Vec<u8>)>,
    pub audit: MemoryAudit,
    pub finished: bool,
}

impl TestHost {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            queue: EventQueue::new(),
            wire: Vec::new(),
            audit: MemoryAudit::new(),
            finished: false,
        }
    }

    pub fn pop(&mut self) -> Option<(SimTime, NodeEvent)> {
        self.queue.pop()
    }

    /// Pops the next event unless it fires after `limit`.
    pub fn pop_until(&mut self, limit: SimTime) -> Option<NodeEvent> {
        match self.queue.peek_time() {
            Some(at) if at <= limit => self.queue.pop().map(|(_, event)| event),
            _ => None,
        }
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.wire
            .iter()
            .map(|(_, bytes)| Frame::from_bytes(bytes).expect("valid frame on the wire"))
            .collect()
    }

    pub fn take_frames(&mut self) -> Vec<Frame> {
        let frames = self.frames();
        self.wire.clear();
        frames
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.audit.records().iter().map(|r| r.event.clone()).collect()
    }
}

impl Scheduler for TestHost {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule_after(&mut self, delay: Duration, event: NodeEvent) -> TimerHandle {
        self.queue.schedule_after(delay, event)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel(handle);
    }
}

impl Host for TestHost {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn transmit_after(&mut self, delay: Duration, wire: Vec<u8>) {
        let at = self.queue.now() + delay;
        self.wire.push((at, wire));
    }

    fn audit(&mut self, event: AuditEvent) {
        let record = AuditRecord {
            at: self.queue.now(),
            node: self.node,
            event,
        };
        self.audit.record(record);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
