//! Shared send/receive pipeline used by both protocol roles

use std::collections::HashMap;
use std::time::Duration;

use arqsim_core::{codec, FaultFlags, Frame};
use log::{debug, error, trace, warn};
use rand::rngs::StdRng;

use crate::impairment;
use crate::scheduler::{Host, NodeEvent, SimTime};
use crate::LinkParams;

/// How long before the end of serialization the pre-serialize hook runs.
const PRE_SERIALIZE_LEAD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransmissionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    BeforeSerialize,
    AfterSerialize,
    DuplicateSent,
}

/// Context of one send attempt, alive until its pipeline completes.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub frame: Frame,
    /// Window slot the frame was built from; `None` for ACK/NACK.
    pub slot: Option<usize>,
    /// Faults in force when the send was issued.
    pub faults: FaultFlags,
    pub injected_bit: Option<usize>,
    pub duplicate_ordinal: u8,
    pub reply_lost: bool,
}

impl Transmission {
    pub fn data(frame: Frame, slot: usize, faults: FaultFlags) -> Self {
        Self {
            frame,
            slot: Some(slot),
            faults,
            injected_bit: None,
            duplicate_ordinal: u8::from(faults.duplication),
            reply_lost: false,
        }
    }

    pub fn reply(frame: Frame, lost: bool) -> Self {
        Self {
            frame,
            slot: None,
            faults: FaultFlags::NONE,
            injected_bit: None,
            duplicate_ordinal: 0,
            reply_lost: lost,
        }
    }

    pub fn is_lost(&self) -> bool {
        self.faults.loss || self.reply_lost
    }

    /// Ordinal for the next sent-log entry of this transmission.
    pub fn take_duplicate_ordinal(&mut self) -> u8 {
        let ordinal = self.duplicate_ordinal;
        self.duplicate_ordinal = ordinal.saturating_add(1);
        ordinal
    }
}

/// Role-specific steps of the send pipeline.
pub trait TransmissionHooks {
    fn before_serialize(&mut self, _host: &mut dyn Host, _tx: &mut Transmission) {}

    /// Runs once serialization is done, before the channel decides delivery.
    fn after_serialize(&mut self, host: &mut dyn Host, tx: &mut Transmission);

    fn duplicate_sent(&mut self, _host: &mut dyn Host, _tx: &mut Transmission) {}
}

pub struct Transceiver {
    params: LinkParams,
    rng: StdRng,
    next_available: SimTime,
    next_id: u64,
    in_flight: HashMap<TransmissionId, Transmission>,
}

impl Transceiver {
    pub fn new(params: LinkParams, rng: StdRng) -> Self {
        Self {
            params,
            rng,
            next_available: SimTime::ZERO,
            next_id: 0,
            in_flight: HashMap::new(),
        }
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    /// Draws whether the next ACK/NACK is dropped by the channel.
    pub fn roll_reply_loss(&mut self) -> bool {
        impairment::reply_lost(&self.params, &mut self.rng)
    }

    /// Transmissions whose pipeline has not completed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Frames DATA payloads, applies modification and queues the frame
    /// behind earlier sends from this transceiver.
    pub fn send(&mut self, host: &mut dyn Host, mut tx: Transmission) -> TransmissionId {
        if tx.frame.is_data() {
            let mut encoded = codec::encode(&tx.frame.payload);
            debug!(
                "Node {} sending seq {} with faults {}",
                host.node_id(),
                tx.frame.seq_num,
                tx.faults
            );

            if tx.faults.modification {
                if let Some(corruption) = impairment::corrupt(&encoded, &mut self.rng) {
                    debug!(
                        "Node {} modified bit {} of seq {}",
                        host.node_id(),
                        corruption.bit_index,
                        tx.frame.seq_num
                    );
                    tx.injected_bit = Some(corruption.bit_index);
                    encoded = corruption.payload;
                }
            }

            tx.frame.parity = Some(codec::checksum(&encoded));
            tx.frame.payload = encoded;
        }

        let delay = self.reserve_slot(host.now());
        let id = TransmissionId(self.next_id);
        self.next_id += 1;

        host.schedule_after(
            delay.saturating_sub(PRE_SERIALIZE_LEAD),
            NodeEvent::Pipeline {
                stage: PipelineStage::BeforeSerialize,
                id,
            },
        );
        host.schedule_after(
            delay,
            NodeEvent::Pipeline {
                stage: PipelineStage::AfterSerialize,
                id,
            },
        );
        trace!(
            "Node {} queued {} seq {} for serialization in {:?}",
            host.node_id(),
            tx.frame.kind,
            tx.frame.seq_num,
            delay
        );

        self.in_flight.insert(id, tx);
        id
    }

    /// Claims the next processing slot and returns the wait until it ends.
    fn reserve_slot(&mut self, now: SimTime) -> Duration {
        if self.next_available <= now {
            self.next_available = now;
        }
        self.next_available += self.params.processing_time;
        self.next_available - now
    }

    pub fn advance<H: TransmissionHooks + ?Sized>(
        &mut self,
        host: &mut dyn Host,
        stage: PipelineStage,
        id: TransmissionId,
        hooks: &mut H,
    ) {
        match stage {
            PipelineStage::BeforeSerialize => {
                if let Some(tx) = self.in_flight.get_mut(&id) {
                    hooks.before_serialize(host, tx);
                }
            }
            PipelineStage::AfterSerialize => self.dispatch(host, id, hooks),
            PipelineStage::DuplicateSent => {
                if let Some(mut tx) = self.in_flight.remove(&id) {
                    hooks.duplicate_sent(host, &mut tx);
                }
            }
        }
    }

    fn dispatch<H: TransmissionHooks + ?Sized>(
        &mut self,
        host: &mut dyn Host,
        id: TransmissionId,
        hooks: &mut H,
    ) {
        let Some(mut tx) = self.in_flight.remove(&id) else {
            warn!("Node {} has no transmission {:?} to dispatch", host.node_id(), id);
            return;
        };

        hooks.after_serialize(host, &mut tx);

        if tx.is_lost() {
            debug!("Node {} lost {} seq {}", host.node_id(), tx.frame.kind, tx.frame.seq_num);
            return;
        }

        let wire = match tx.frame.to_bytes() {
            Ok(wire) => wire,
            Err(e) => {
                error!("Node {} failed to serialize frame: {}", host.node_id(), e);
                return;
            }
        };

        let plan = impairment::plan(&self.params, &tx.faults);
        debug!(
            "Node {} dispatching {} seq {} with channel delay {:?}",
            host.node_id(),
            tx.frame.kind,
            tx.frame.seq_num,
            plan.delay
        );

        match plan.duplicate_after {
            Some(duplicate_after) => {
                host.transmit_after(plan.delay, wire.clone());
                host.transmit_after(duplicate_after, wire);
                host.schedule_after(
                    self.params.duplication_delay,
                    NodeEvent::Pipeline {
                        stage: PipelineStage::DuplicateSent,
                        id,
                    },
                );
                self.in_flight.insert(id, tx);
            }
            None => host.transmit_after(plan.delay, wire),
        }
    }

    /// Checks parity over the still-encoded payload, then decodes DATA in
    /// place. Returns whether corruption was detected.
    pub fn receive(&self, frame: &mut Frame) -> bool {
        let corrupted = frame
            .parity
            .is_some_and(|parity| parity != codec::checksum(&frame.payload));
        if frame.is_data() {
            frame.payload = codec::decode(&frame.payload);
        }
        corrupted
    }
}
