//! Parity-checking receiver answering every DATA frame with ACK or NACK

use arqsim_core::{Frame, FrameKind, SeqNum};
use log::{debug, info, warn};
use rand::rngs::StdRng;

use crate::audit::AuditEvent;
use crate::scheduler::Host;
use crate::transceiver::{PipelineStage, Transceiver, Transmission, TransmissionHooks, TransmissionId};
use crate::{LinkParams, MAX_WINDOW_SIZE};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames: u64,
    pub accepted: u64,
    pub corrupted: u64,
    pub acks: u64,
    pub nacks: u64,
}

struct ReplyLog;

impl TransmissionHooks for ReplyLog {
    fn after_serialize(&mut self, host: &mut dyn Host, tx: &mut Transmission) {
        host.audit(AuditEvent::ReplySent {
            kind: tx.frame.kind,
            seq_num: tx.frame.seq_num,
            lost: tx.reply_lost,
        });
    }
}

pub struct Receiver {
    link: Transceiver,
    window_size: SeqNum,
    last_accepted: Option<SeqNum>,
    delivered: Vec<Vec<u8>>,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(params: LinkParams, rng: StdRng) -> Self {
        let window_size = params.window_size.clamp(1, MAX_WINDOW_SIZE) as SeqNum;
        Self {
            link: Transceiver::new(params, rng),
            window_size,
            last_accepted: None,
            delivered: Vec::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn last_accepted(&self) -> Option<SeqNum> {
        self.last_accepted
    }

    /// Payloads accepted in order, as the application would see them.
    pub fn delivered(&self) -> &[Vec<u8>] {
        &self.delivered
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    fn expected_previous(&self, seq_num: SeqNum) -> SeqNum {
        (seq_num % self.window_size + self.window_size - 1) % self.window_size
    }

    fn in_order(&self, seq_num: SeqNum) -> bool {
        match self.last_accepted {
            None => true,
            Some(last) => last == self.expected_previous(seq_num),
        }
    }

    pub fn on_frame(&mut self, host: &mut dyn Host, mut frame: Frame) {
        if !frame.is_data() {
            warn!(
                "Node {} is a receiver and dropped {} seq {}",
                host.node_id(),
                frame.kind,
                frame.seq_num
            );
            return;
        }

        let corrupted = self.link.receive(&mut frame);
        self.stats.frames += 1;
        debug!(
            "Node {} received seq {} payload={} parity={:?}",
            host.node_id(),
            frame.seq_num,
            String::from_utf8_lossy(&frame.payload),
            frame.parity
        );
        host.audit(AuditEvent::FrameReceived {
            seq_num: frame.seq_num,
            payload: frame.payload.clone(),
            corrupted,
        });

        let lost = self.link.roll_reply_loss();

        if corrupted {
            self.stats.corrupted += 1;
            debug!("Node {} parity check failed for seq {}", host.node_id(), frame.seq_num);
        } else if self.in_order(frame.seq_num) {
            self.last_accepted = Some(frame.seq_num);
            self.stats.accepted += 1;
            info!("Node {} accepted seq {}", host.node_id(), frame.seq_num);
            self.delivered.push(frame.payload.clone());
        } else {
            debug!(
                "Node {} seq {} does not follow {:?}, not accepted",
                host.node_id(),
                frame.seq_num,
                self.last_accepted
            );
        }

        let kind = if corrupted {
            self.stats.nacks += 1;
            FrameKind::Nack
        } else {
            self.stats.acks += 1;
            FrameKind::Ack
        };
        let reply = Frame::reply(kind, frame.seq_num, frame.ack_num);
        self.link.send(host, Transmission::reply(reply, lost));
    }

    pub fn on_pipeline(&mut self, host: &mut dyn Host, stage: PipelineStage, id: TransmissionId) {
        self.link.advance(host, stage, id, &mut ReplyLog);
    }
}
