//! Seal-path timing: computing the sealing delay and modeling the
//! "schedule emit after delay, observable via stop channel" pattern without
//! committing to a particular async runtime.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use rand::Rng;

/// Absolute floor on the gap between adjacent blocks.
pub const MIN_DELAY_SECS: u64 = 1;

/// Computes the natural seal delay: `header.time - now`, scaled by the
/// current adaptive block time relative to the base, floored at
/// `MIN_DELAY_SECS`, with uniform wiggle added for out-of-turn sealers.
pub fn compute_delay(header_time: u64, now: u64, current_block_time_secs: u64, base_block_time_secs: u64, in_turn: bool, signer_count: usize) -> Duration {
    let natural = header_time.saturating_sub(now) as f64;
    let scale = if base_block_time_secs == 0 { 1.0 } else { current_block_time_secs as f64 / base_block_time_secs as f64 };
    let mut delay_secs = (natural * scale).max(MIN_DELAY_SECS as f64);

    if !in_turn {
        let wiggle_ms = (signer_count as u64 / 2 + 1) * 500;
        let extra_ms = if wiggle_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=wiggle_ms) };
        delay_secs += extra_ms as f64 / 1000.0;
    }

    Duration::from_secs_f64(delay_secs.max(MIN_DELAY_SECS as f64))
}

/// Outcome of waiting out a seal delay.
pub enum SealOutcome {
    Ready,
    Cancelled,
}

/// Blocks for `delay`, unless `stop` fires first.
pub fn wait_for_seal(stop: &Receiver<()>, delay: Duration) -> SealOutcome {
    match stop.recv_timeout(delay) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => SealOutcome::Cancelled,
        Err(RecvTimeoutError::Timeout) => SealOutcome::Ready,
    }
}

/// Abstracts the "wait out the seal delay, or bail if told to stop" step so
/// the engine doesn't commit to a particular async runtime, and tests can
/// swap in a scheduler that never actually sleeps.
pub trait SealScheduler: Send + Sync {
    fn wait(&self, stop: &Receiver<()>, delay: Duration) -> SealOutcome;
}

/// Production scheduler: blocks the calling thread for `delay`.
pub struct RealTimeScheduler;

impl SealScheduler for RealTimeScheduler {
    fn wait(&self, stop: &Receiver<()>, delay: Duration) -> SealOutcome {
        wait_for_seal(stop, delay)
    }
}

/// Test double that only checks for a pending stop signal, never sleeping.
pub struct ImmediateScheduler;

impl SealScheduler for ImmediateScheduler {
    fn wait(&self, stop: &Receiver<()>, _delay: Duration) -> SealOutcome {
        wait_for_seal(stop, Duration::from_secs(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_drops_below_minimum() {
        let d = compute_delay(100, 100, 15, 15, true, 3);
        assert!(d.as_secs_f64() >= MIN_DELAY_SECS as f64);
    }

    #[test]
    fn stop_channel_cancels_wait() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.send(()).unwrap();
        match wait_for_seal(&rx, Duration::from_secs(5)) {
            SealOutcome::Cancelled => {}
            SealOutcome::Ready => panic!("expected cancellation"),
        }
    }
}
