//! # Edge capture
//!
//! The interrupt-context stage of a line: every electrical edge on the
//! monitored pin is timestamped with the free-running cycle counter and
//! pushed into the pulse queue. On a bridging line the same handler also
//! mirrors the input to the proxy output and, when an override is armed,
//! watches for the inter-packet idle gap that releases it.
//!
//! Platforms with a raw pin-change interrupt call [`EdgeCapture::on_edge`]
//! from the ISR. Platforms that only expose edge waits can spawn
//! [`EdgeCapture::run`] instead and accept the executor-bounded jitter.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embedded_hal::digital::v2::InputPin;
use embedded_hal_async::digital::Wait;

use crate::{LineConfig, LineMode, LineQueues, LineStats, PULSE_QUEUE_DEPTH};

/// A single timestamped edge
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PulseSample {
    /// Line level after the edge, input inversion already applied
    pub level: bool,
    /// Free-running cycle counter at capture, wraps
    pub cycles: u32,
}

/// Interrupt-side front-end of one line
pub struct EdgeCapture<'d, M: LineMode> {
    pulses: Sender<'d, CriticalSectionRawMutex, PulseSample, PULSE_QUEUE_DEPTH>,
    stats: &'d LineStats,
    mode: M,
    invert_in: bool,
    cycles_per_us: u32,
    last_edge_cycles: u32,
}

impl<'d, M: LineMode> EdgeCapture<'d, M> {
    pub(crate) fn new(
        queues: &'d LineQueues,
        stats: &'d LineStats,
        cfg: LineConfig,
        mode: M,
    ) -> Self {
        Self {
            pulses: queues.pulses.sender(),
            stats,
            mode,
            invert_in: cfg.invert_in,
            cycles_per_us: cfg.cycles_per_us,
            last_edge_cycles: 0,
        }
    }

    /// Record one edge. Call from the pin-change ISR with the raw sampled
    /// level and the current cycle count. Never blocks and never
    /// allocates; a full queue costs the sample and bumps a counter.
    pub fn on_edge(&mut self, raw_level: bool, cycles: u32) {
        let level = raw_level != self.invert_in;
        let gap_us = cycles.wrapping_sub(self.last_edge_cycles) / self.cycles_per_us;
        // release before mirroring so the edge that opens the override
        // window is not forwarded; from here the driver owns the pin
        self.mode.check_release(level, gap_us);
        self.mode.forward(level);
        self.last_edge_cycles = cycles;
        if self.pulses.try_send(PulseSample { level, cycles }).is_err() {
            self.stats.note_pulse_error();
        }
    }

    /// Async front-end for pins exposing edge waits instead of a raw ISR
    /// hook. `now_cycles` reads the platform cycle counter.
    pub async fn run<P>(mut self, mut pin: P, now_cycles: fn() -> u32) -> !
    where
        P: InputPin + Wait,
    {
        loop {
            if pin.wait_for_any_edge().await.is_err() {
                self.stats.note_pulse_error();
                continue;
            }
            let level = pin.is_high().unwrap_or(false);
            self.on_edge(level, now_cycles());
        }
    }
}
