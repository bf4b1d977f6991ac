//! A simulated node: picks its role from the first event it sees and
//! routes every later event to that role.

use std::sync::Arc;

use arqsim_core::{Frame, Message, NodeId};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::receiver::Receiver;
use crate::scheduler::{Host, NodeEvent};
use crate::sender::Sender;
use crate::{LinkError, LinkParams};

pub enum Role {
    Unassigned,
    Sender(Sender),
    Receiver(Receiver),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Unassigned => "unassigned",
            Role::Sender(_) => "sender",
            Role::Receiver(_) => "receiver",
        }
    }
}

pub struct Endpoint {
    id: NodeId,
    params: LinkParams,
    messages: Vec<Arc<Message>>,
    seed: Option<u64>,
    role: Role,
}

impl Endpoint {
    pub fn new(id: NodeId, params: LinkParams, messages: Vec<Message>) -> Result<Self, LinkError> {
        params.validate()?;
        Ok(Self {
            id,
            params,
            messages: messages.into_iter().map(Arc::new).collect(),
            seed: None,
            role: Role::Unassigned,
        })
    }

    /// Makes the node's random draws reproducible. Each node derives its
    /// own stream from `seed` and its id.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn as_sender(&self) -> Option<&Sender> {
        match &self.role {
            Role::Sender(sender) => Some(sender),
            _ => None,
        }
    }

    pub fn as_receiver(&self) -> Option<&Receiver> {
        match &self.role {
            Role::Receiver(receiver) => Some(receiver),
            _ => None,
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.id as u64)),
            None => StdRng::from_os_rng(),
        }
    }

    pub fn handle(&mut self, host: &mut dyn Host, event: NodeEvent) {
        match event {
            NodeEvent::Start => self.on_start(host),
            NodeEvent::Inbound(wire) => self.on_inbound(host, &wire),
            NodeEvent::Timeout { slot } => match &mut self.role {
                Role::Sender(sender) => sender.on_timeout(host, slot),
                _ => debug!("Node {} ignoring timeout for slot {}", self.id, slot),
            },
            NodeEvent::Pipeline { stage, id } => match &mut self.role {
                Role::Sender(sender) => sender.on_pipeline(host, stage, id),
                Role::Receiver(receiver) => receiver.on_pipeline(host, stage, id),
                Role::Unassigned => warn!("Node {} has no role for pipeline event", self.id),
            },
        }
    }

    fn on_start(&mut self, host: &mut dyn Host) {
        if !matches!(self.role, Role::Unassigned) {
            warn!(
                "Node {} got a start trigger but is already a {}",
                self.id,
                self.role.name()
            );
            return;
        }
        info!("Node {} becomes sender", self.id);
        let mut sender = Sender::new(self.params.clone(), &self.messages, self.rng());
        sender.start(host);
        self.role = Role::Sender(sender);
    }

    fn on_inbound(&mut self, host: &mut dyn Host, wire: &[u8]) {
        let frame = match Frame::from_bytes(wire) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Node {} dropped undecodable frame: {}", self.id, e);
                return;
            }
        };

        if matches!(self.role, Role::Unassigned) {
            if !frame.is_data() {
                warn!(
                    "Node {} has no role yet, dropping {} seq {}",
                    self.id, frame.kind, frame.seq_num
                );
                return;
            }
            info!("Node {} becomes receiver", self.id);
            self.role = Role::Receiver(Receiver::new(self.params.clone(), self.rng()));
        }

        match &mut self.role {
            Role::Sender(sender) => sender.on_frame(host, frame),
            Role::Receiver(receiver) => receiver.on_frame(host, frame),
            Role::Unassigned => {}
        }
    }
}
