//! Two-node discrete-event kernel
//!
//! Owns the event queue and both endpoints. Events are popped in virtual
//! time order and handed to the node they target. A node reaches its peer
//! only through [`Host::transmit_after`], which schedules an inbound event
//! on the other side. The run ends when the sender reports completion, the
//! queue drains, or an optional time limit is reached.

use std::time::Duration;

use arqsim_core::NodeId;
use log::{debug, info, trace};

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::endpoint::Endpoint;
use crate::scheduler::{EventQueue, Host, NodeEvent, Scheduler, SimTime, TimerHandle};
use crate::LinkError;

#[derive(Debug)]
struct Envelope {
    node: NodeId,
    event: NodeEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationReport {
    /// Events handed to endpoints.
    pub events: u64,
    /// Virtual time of the last handled event.
    pub ended_at: SimTime,
    /// When a node asked to end the run, if one did.
    pub finished_at: Option<SimTime>,
}

impl SimulationReport {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

pub struct Simulation<S: AuditSink> {
    nodes: Vec<Endpoint>,
    queue: EventQueue<Envelope>,
    sink: S,
    finished_at: Option<SimTime>,
    events: u64,
}

impl<S: AuditSink> Simulation<S> {
    pub fn new(mut nodes: Vec<Endpoint>, sink: S) -> Result<Self, LinkError> {
        nodes.sort_by_key(Endpoint::id);
        let ids: Vec<_> = nodes.iter().map(Endpoint::id).collect();
        if ids != [0, 1] {
            return Err(LinkError::InvalidTopology);
        }
        Ok(Self {
            nodes,
            queue: EventQueue::new(),
            sink,
            finished_at: None,
            events: 0,
        })
    }

    /// Queues the coordinator trigger that makes `node` the sender.
    pub fn schedule_start(&mut self, node: NodeId, at: SimTime) -> Result<(), LinkError> {
        if node >= self.nodes.len() {
            return Err(LinkError::UnknownNode(node));
        }
        debug!("Scheduling start of node {} at {:?}", node, at);
        self.queue.schedule_at(
            at,
            Envelope {
                node,
                event: NodeEvent::Start,
            },
        );
        Ok(())
    }

    pub fn run(&mut self) -> SimulationReport {
        self.drive(None)
    }

    /// Like [`Simulation::run`] but never handles events past `limit`.
    pub fn run_until(&mut self, limit: SimTime) -> SimulationReport {
        self.drive(Some(limit))
    }

    fn drive(&mut self, limit: Option<SimTime>) -> SimulationReport {
        while self.finished_at.is_none() {
            let Some(at) = self.queue.peek_time() else {
                debug!("Event queue drained at {:?}", self.queue.now());
                break;
            };
            if limit.is_some_and(|limit| at > limit) {
                info!("Stopping at time limit {:?}", limit);
                break;
            }
            let Some((at, envelope)) = self.queue.pop() else {
                break;
            };
            trace!("{:?} node {} <- {:?}", at, envelope.node, envelope.event);
            self.events += 1;

            let Simulation {
                nodes,
                queue,
                sink,
                finished_at,
                ..
            } = self;
            let Some(endpoint) = nodes.get_mut(envelope.node) else {
                continue;
            };
            let mut host = NodeHost {
                node: envelope.node,
                queue,
                sink,
                finished: false,
            };
            endpoint.handle(&mut host, envelope.event);
            if host.finished {
                info!("Node {} ended the run at {:?}", envelope.node, at);
                *finished_at = Some(at);
            }
        }

        SimulationReport {
            events: self.events,
            ended_at: self.queue.now(),
            finished_at: self.finished_at,
        }
    }

    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    pub fn endpoint(&self, id: NodeId) -> Option<&Endpoint> {
        self.nodes.get(id)
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.nodes
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// One node's view of the kernel while it handles an event.
struct NodeHost<'a, S: AuditSink> {
    node: NodeId,
    queue: &'a mut EventQueue<Envelope>,
    sink: &'a mut S,
    finished: bool,
}

impl<S: AuditSink> Scheduler for NodeHost<'_, S> {
    fn now(&self) -> SimTime {
        self.queue.now()
    }

    fn schedule_after(&mut self, delay: Duration, event: NodeEvent) -> TimerHandle {
        self.queue.schedule_after(
            delay,
            Envelope {
                node: self.node,
                event,
            },
        )
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel(handle);
    }
}

impl<S: AuditSink> Host for NodeHost<'_, S> {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn transmit_after(&mut self, delay: Duration, wire: Vec<u8>) {
        let peer = 1 - self.node;
        self.queue.schedule_after(
            delay,
            Envelope {
                node: peer,
                event: NodeEvent::Inbound(wire),
            },
        );
    }

    fn audit(&mut self, event: AuditEvent) {
        self.sink.record(AuditRecord {
            at: self.queue.now(),
            node: self.node,
            event,
        });
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
