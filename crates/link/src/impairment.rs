//! Channel impairment model: scripted faults and reply loss

use std::time::Duration;

use arqsim_core::{codec, FaultFlags};
use rand::Rng;

use crate::LinkParams;

/// Result of a single-bit corruption of an encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub payload: Vec<u8>,
    /// Absolute index: `byte * 8 + bit`.
    pub bit_index: usize,
}

/// How the channel treats one dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPlan {
    pub delay: Duration,
    /// Delay of the second copy, when the frame is duplicated.
    pub duplicate_after: Option<Duration>,
}

/// Flips one bit at a random byte of `encoded`; bit 0 is never picked.
pub fn corrupt<R: Rng + ?Sized>(encoded: &[u8], rng: &mut R) -> Option<Corruption> {
    if encoded.is_empty() {
        return None;
    }
    let byte = rng.random_range(0..encoded.len());
    let bit = rng.random_range(1..8u8);
    Some(Corruption {
        payload: codec::flip_bit(encoded, byte, bit),
        bit_index: byte * 8 + bit as usize,
    })
}

pub fn channel_delay(params: &LinkParams, faults: &FaultFlags) -> Duration {
    let mut delay = params.transmission_delay;
    if faults.delay {
        delay += params.error_delay;
    }
    delay
}

pub fn plan(params: &LinkParams, faults: &FaultFlags) -> ChannelPlan {
    let delay = channel_delay(params, faults);
    ChannelPlan {
        delay,
        duplicate_after: faults.duplication.then(|| delay + params.duplication_delay),
    }
}

/// Independent draw deciding whether an ACK/NACK is dropped.
pub fn reply_lost<R: Rng + ?Sized>(params: &LinkParams, rng: &mut R) -> bool {
    let draw = rng.random_range(0.0..100.0f64).floor();
    draw < params.loss_rate.floor()
}
