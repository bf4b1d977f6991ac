//! Sliding-window sender with per-slot retransmission timers

use std::sync::Arc;

use arqsim_core::{FaultFlags, Frame, FrameKind, Message, SeqNum};
use log::{debug, info, warn};
use rand::rngs::StdRng;

use crate::audit::AuditEvent;
use crate::scheduler::{Host, NodeEvent, TimerHandle};
use crate::transceiver::{PipelineStage, Transceiver, Transmission, TransmissionHooks, TransmissionId};
use crate::{LinkParams, MAX_WINDOW_SIZE};

#[derive(Debug, Clone)]
pub struct WindowSlot {
    pub seq_num: SeqNum,
    pub message: Arc<Message>,
    /// Faults still to be applied; cleared once the slot times out.
    pub faults: FaultFlags,
    /// Whether the channel-error entry has been logged for this slot.
    pub read: bool,
    pub sent: bool,
    pub acked: bool,
    pub timer: Option<TimerHandle>,
    pub transmissions: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub transmissions: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub acks: u64,
    pub nacks: u64,
}

/// Window bookkeeping, kept apart from the transceiver so it can serve as
/// the pipeline hooks.
struct Window {
    slots: Vec<WindowSlot>,
    base: usize,
    size: usize,
    stats: SenderStats,
}

impl Window {
    fn new(messages: &[Arc<Message>], size: usize) -> Self {
        let slots = messages
            .iter()
            .enumerate()
            .map(|(index, message)| WindowSlot {
                seq_num: (index % size) as SeqNum,
                faults: message.faults,
                message: Arc::clone(message),
                read: false,
                sent: false,
                acked: false,
                timer: None,
                transmissions: 0,
            })
            .collect();

        Self {
            slots,
            base: 0,
            size,
            stats: SenderStats::default(),
        }
    }

    fn end(&self) -> usize {
        (self.base + self.size).min(self.slots.len())
    }

    fn contains(&self, index: usize) -> bool {
        index >= self.base && index < self.base + self.size
    }

    fn all_acked(&self) -> bool {
        self.slots.iter().all(|slot| slot.acked)
    }

    fn start_timer(&mut self, host: &mut dyn Host, index: usize, timeout: std::time::Duration) {
        self.cancel_timer(host, index);
        let handle = host.schedule_after(timeout, NodeEvent::Timeout { slot: index });
        debug!("Node {} started timer for slot {} at {:?}", host.node_id(), index, host.now());
        self.slots[index].timer = Some(handle);
    }

    fn cancel_timer(&mut self, host: &mut dyn Host, index: usize) {
        if let Some(handle) = self.slots[index].timer.take() {
            debug!("Node {} cancelled timer for slot {}", host.node_id(), index);
            host.cancel(handle);
        }
    }

    fn log_window(&self, node: usize) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        debug!("Node {} window state (base {}):", node, self.base);
        for (index, slot) in self.slots.iter().enumerate() {
            debug!(
                "[{}] seq={} acked={} msg={}",
                if self.contains(index) { '*' } else { ' ' },
                slot.seq_num,
                slot.acked,
                String::from_utf8_lossy(&slot.message.text)
            );
        }
    }
}

struct SenderHooks<'a> {
    window: &'a mut Window,
    params: &'a LinkParams,
}

impl TransmissionHooks for SenderHooks<'_> {
    fn before_serialize(&mut self, host: &mut dyn Host, tx: &mut Transmission) {
        let Some(index) = tx.slot else { return };
        let slot = &mut self.window.slots[index];
        if !slot.read {
            slot.read = true;
            host.audit(AuditEvent::ChannelError { faults: tx.faults });
        }
    }

    fn after_serialize(&mut self, host: &mut dyn Host, tx: &mut Transmission) {
        let Some(index) = tx.slot else { return };
        self.window.start_timer(host, index, self.params.timeout);
        host.audit(sent_event(self.params, tx));
    }

    fn duplicate_sent(&mut self, host: &mut dyn Host, tx: &mut Transmission) {
        host.audit(sent_event(self.params, tx));
    }
}

fn sent_event(params: &LinkParams, tx: &mut Transmission) -> AuditEvent {
    AuditEvent::FrameSent {
        seq_num: tx.frame.seq_num,
        payload: tx.frame.payload.clone(),
        parity: tx.frame.parity,
        modified_bit: tx.injected_bit,
        lost: tx.faults.loss,
        duplicate: tx.take_duplicate_ordinal(),
        extra_delay: if tx.faults.delay {
            params.error_delay
        } else {
            std::time::Duration::ZERO
        },
    }
}

pub struct Sender {
    params: LinkParams,
    link: Transceiver,
    window: Window,
}

impl Sender {
    pub fn new(params: LinkParams, messages: &[Arc<Message>], rng: StdRng) -> Self {
        let window = Window::new(messages, params.window_size.clamp(1, MAX_WINDOW_SIZE));
        Self {
            link: Transceiver::new(params.clone(), rng),
            params,
            window,
        }
    }

    /// Sends the first window, or terminates right away with nothing to send.
    pub fn start(&mut self, host: &mut dyn Host) {
        info!(
            "Node {} starting as sender with {} messages",
            host.node_id(),
            self.window.slots.len()
        );
        if self.window.slots.is_empty() {
            info!("Node {} has no messages, terminating", host.node_id());
            host.audit(AuditEvent::Terminated);
            host.finish();
            return;
        }
        self.window.log_window(host.node_id());
        self.send_window(host, false);
    }

    pub fn window_base(&self) -> usize {
        self.window.base
    }

    pub fn slots(&self) -> &[WindowSlot] {
        &self.window.slots
    }

    pub fn stats(&self) -> SenderStats {
        self.window.stats
    }

    pub fn is_complete(&self) -> bool {
        self.window.all_acked()
    }

    fn send_window(&mut self, host: &mut dyn Host, force: bool) {
        let end = self.window.end();
        debug!(
            "Node {} sending window, WS={} WB={} END={} force={}",
            host.node_id(),
            self.window.size,
            self.window.base,
            end,
            force
        );

        for index in self.window.base..end {
            if !force && self.window.slots[index].sent {
                continue;
            }

            self.window.cancel_timer(host, index);

            let slot = &mut self.window.slots[index];
            slot.sent = true;
            slot.acked = false;
            if slot.transmissions > 0 {
                self.window.stats.retransmissions += 1;
            }
            slot.transmissions += 1;
            self.window.stats.transmissions += 1;

            let frame = Frame::data(slot.seq_num, index as u32, slot.message.text.clone());
            let tx = Transmission::data(frame, index, slot.faults);
            self.link.send(host, tx);
        }
    }

    pub fn on_pipeline(&mut self, host: &mut dyn Host, stage: PipelineStage, id: TransmissionId) {
        let Sender {
            params,
            link,
            window,
        } = self;
        let mut hooks = SenderHooks { window, params };
        link.advance(host, stage, id, &mut hooks);
    }

    pub fn on_frame(&mut self, host: &mut dyn Host, mut frame: Frame) {
        self.link.receive(&mut frame);

        match frame.kind {
            FrameKind::Ack => self.on_ack(host, frame),
            FrameKind::Nack => {
                self.window.stats.nacks += 1;
                debug!("Node {} received NACK for seq {}", host.node_id(), frame.seq_num);
                host.audit(AuditEvent::ReplyReceived {
                    kind: frame.kind,
                    seq_num: frame.seq_num,
                    ack_num: frame.ack_num,
                });
            }
            FrameKind::Data => {
                warn!(
                    "Node {} is a sender and dropped DATA frame seq {}",
                    host.node_id(),
                    frame.seq_num
                );
            }
        }
    }

    fn on_ack(&mut self, host: &mut dyn Host, frame: Frame) {
        let index = frame.ack_num as usize;
        if index >= self.window.slots.len() {
            warn!("Node {} received ACK for unknown slot {}", host.node_id(), index);
            return;
        }

        self.window.stats.acks += 1;
        host.audit(AuditEvent::ReplyReceived {
            kind: frame.kind,
            seq_num: frame.seq_num,
            ack_num: frame.ack_num,
        });

        self.window.slots[index].acked = true;
        self.window.cancel_timer(host, index);

        if index != self.window.base {
            return;
        }

        if self.window.all_acked() {
            info!("Node {} all messages acked, terminating", host.node_id());
            host.audit(AuditEvent::Terminated);
            host.finish();
            return;
        }

        let last = self.window.slots.len() - 1;
        let mut base = index + 1;
        // slots acked out of order are already done
        while base < last && self.window.slots[base].acked {
            base += 1;
        }
        self.window.base = base.min(last);
        debug!("Node {} advanced window base to {}", host.node_id(), self.window.base);
        self.window.log_window(host.node_id());
        self.send_window(host, false);
    }

    pub fn on_timeout(&mut self, host: &mut dyn Host, index: usize) {
        if index >= self.window.slots.len() {
            warn!("Node {} timer fired for unknown slot {}", host.node_id(), index);
            return;
        }
        self.window.cancel_timer(host, index);

        let in_window = self.window.contains(index);
        let slot = &mut self.window.slots[index];
        if slot.acked || !in_window {
            debug!(
                "Node {} ignoring timer for slot {}: already acked or out of window",
                host.node_id(),
                index
            );
            return;
        }

        self.window.stats.timeouts += 1;
        host.audit(AuditEvent::Timeout {
            seq_num: slot.seq_num,
        });
        slot.faults = FaultFlags::NONE;

        self.send_window(host, true);
    }
}
