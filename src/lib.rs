#![cfg_attr(not(test), no_std)]

pub mod pulse;
pub mod bits;
pub mod frame;
pub mod protocol;
pub mod proxy;
pub mod gateway;

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use bits::{BitDecoder, BitSymbol};
use frame::PacketFramer;
use proxy::{OverrideDriver, OverrideSlot, ProxyOut};
use pulse::{EdgeCapture, PulseSample};

pub use frame::Frame;
pub use protocol::{DecodedPacket, Packet}; // Re-export the packet types as every consumer needs them

/// Number of bytes in a Rinnai packet
pub const BYTES_IN_PACKET: usize = 6;
/// Number of bit symbols in a Rinnai packet
pub const BITS_IN_PACKET: usize = BYTES_IN_PACKET * 8;
/// Number of packets buffered between pipeline stages and the application
pub const MAX_PACKETS_IN_QUEUE: usize = 3;

const PULSES_IN_BIT: usize = 2;

/// Capacity of the edge queue (every bit is two pulses, preamble overhead excluded)
pub const PULSE_QUEUE_DEPTH: usize = MAX_PACKETS_IN_QUEUE * BITS_IN_PACKET * PULSES_IN_BIT;
/// Capacity of the symbol queue
pub const BIT_QUEUE_DEPTH: usize = MAX_PACKETS_IN_QUEUE * BITS_IN_PACKET;
/// Capacity of the packet queue
pub const PACKET_QUEUE_DEPTH: usize = MAX_PACKETS_IN_QUEUE;

/// Error using the bridge
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RinnaiError {
    /// Payload is not exactly one packet (6 bytes)
    InvalidLength,
    /// An override is already armed and waiting for its window
    OverridePending,
    /// A previous override emission was still on the wire
    OverrideBusy,
    /// Temperature code or target outside the known range
    TemperatureRange,
    /// No local panel packet observed yet to base an override on
    NoPanelPacket,
}

/// Per-line tunables. Timing of the waveform itself is compile-time, the
/// inter-packet window is empirical and left adjustable.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LineConfig {
    /// Invert the sampled input level (inverting level shifter on the input)
    pub invert_in: bool,
    /// Cycles per microsecond of the counter feeding edge timestamps
    pub cycles_per_us: u32,
    /// Lower bound of the inter-packet idle window in µs (exclusive)
    pub gap_min_us: u32,
    /// Upper bound of the inter-packet idle window in µs (exclusive)
    pub gap_max_us: u32,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            invert_in: false,
            cycles_per_us: 240,
            gap_min_us: 160_000,
            gap_max_us: 180_000,
        }
    }
}

type Queue<T, const N: usize> = Channel<CriticalSectionRawMutex, T, N>;

/// Receiving end of a line's packet queue, for the application to drain
pub type PacketRx<'d> = Receiver<'d, CriticalSectionRawMutex, Frame, PACKET_QUEUE_DEPTH>;

/// The bounded queues linking the pipeline stages of one line.
/// Each queue has a single producer and a single consumer by construction
/// of the parts returned from [`monitor_line`]/[`bridge_line`].
pub struct LineQueues {
    pub(crate) pulses: Queue<PulseSample, PULSE_QUEUE_DEPTH>,
    pub(crate) symbols: Queue<BitSymbol, BIT_QUEUE_DEPTH>,
    pub(crate) packets: Queue<Frame, PACKET_QUEUE_DEPTH>,
}

impl LineQueues {
    /// Create the queue set, typically in a static
    pub const fn new() -> Self {
        Self {
            pulses: Channel::new(),
            symbols: Channel::new(),
            packets: Channel::new(),
        }
    }

    /// Receiver for the validated-frame end of the pipeline
    pub fn packets(&self) -> PacketRx<'_> {
        self.packets.receiver()
    }
}

/// Error counters of one line. Producers drop and count, they never block,
/// so a burst only costs samples. Readable at any time for telemetry.
pub struct LineStats {
    pulse_errors: AtomicU32,
    bit_errors: AtomicU32,
    packet_errors: AtomicU32,
}

impl LineStats {
    pub const fn new() -> Self {
        Self {
            pulse_errors: AtomicU32::new(0),
            bit_errors: AtomicU32::new(0),
            packet_errors: AtomicU32::new(0),
        }
    }

    /// Samples dropped by the edge handler (queue full)
    pub fn pulse_errors(&self) -> u32 {
        self.pulse_errors.load(Ordering::Relaxed)
    }

    /// Polarity mismatches and symbols dropped by the bit stage
    pub fn bit_errors(&self) -> u32 {
        self.bit_errors.load(Ordering::Relaxed)
    }

    /// Out-of-range symbols and frames dropped by the packet stage
    pub fn packet_errors(&self) -> u32 {
        self.packet_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn note_pulse_error(&self) {
        self.pulse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_bit_error(&self) {
        self.bit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_packet_error(&self) {
        self.packet_errors.fetch_add(1, Ordering::Relaxed);
    }
}

trait Sealed {}
#[allow(private_bounds)]
/// Sealed trait implementing the two flavors of a decoded line: input-only
/// monitoring, or bridging where the input is mirrored to an output pin
/// that can also carry a substituted packet
pub trait LineMode: Sealed {
    /// Mirror an input level to the proxy output, where one exists
    fn forward(&mut self, level: bool);
    /// Release a pending override if this edge ends a qualifying idle gap
    fn check_release(&mut self, level: bool, gap_us: u32);
}

/// Input-only line (the heater side). Cannot override.
pub struct Monitor;

/// Output-capable line (the local panel side): proxies the input to the
/// output pin and can substitute one packet on request
pub struct Bridge<'d, O> {
    out: &'d ProxyOut<O>,
    slot: &'d OverrideSlot,
    gap_min_us: u32,
    gap_max_us: u32,
}

impl Sealed for Monitor {}
impl<O> Sealed for Bridge<'_, O> {}

impl LineMode for Monitor {
    fn forward(&mut self, _level: bool) {}
    fn check_release(&mut self, _level: bool, _gap_us: u32) {}
}

impl<O: OutputPin> LineMode for Bridge<'_, O> {
    fn forward(&mut self, level: bool) {
        // while an override is in flight the driver owns the pin exclusively
        if !self.slot.is_in_flight() {
            self.out.drive(level);
        }
    }

    fn check_release(&mut self, level: bool, gap_us: u32) {
        // a rising edge after an inter-packet idle is the start of the next
        // packet, the only moment a substitution can be aligned to
        if level
            && self.slot.is_armed()
            && !self.slot.is_in_flight()
            && gap_us > self.gap_min_us
            && gap_us < self.gap_max_us
        {
            self.slot.release();
        }
    }
}

/// Assemble the decode pipeline of an input-only line.
///
/// Returns the edge front-end to feed from the pin ISR, the two pipeline
/// stages to spawn as tasks, and the receiver of validated frames.
pub fn monitor_line<'d>(
    queues: &'d LineQueues,
    stats: &'d LineStats,
    cfg: LineConfig,
) -> (
    EdgeCapture<'d, Monitor>,
    BitDecoder<'d>,
    PacketFramer<'d>,
    PacketRx<'d>,
) {
    (
        EdgeCapture::new(queues, stats, cfg, Monitor),
        BitDecoder::new(queues, stats, cfg),
        PacketFramer::new(queues, stats),
        queues.packets.receiver(),
    )
}

/// Assemble the decode pipeline of the output-capable line.
///
/// Same parts as [`monitor_line`] plus the override driver, which must run
/// at a strictly higher priority than the two pipeline stages. `delay`
/// provides the µs-accurate blocking waits of the bit-banged waveform.
pub fn bridge_line<'d, O, D>(
    queues: &'d LineQueues,
    stats: &'d LineStats,
    out: &'d ProxyOut<O>,
    slot: &'d OverrideSlot,
    delay: D,
    cfg: LineConfig,
) -> (
    EdgeCapture<'d, Bridge<'d, O>>,
    BitDecoder<'d>,
    PacketFramer<'d>,
    OverrideDriver<'d, O, D>,
    PacketRx<'d>,
)
where
    O: OutputPin,
    D: DelayUs<u16>,
{
    let mode = Bridge {
        out,
        slot,
        gap_min_us: cfg.gap_min_us,
        gap_max_us: cfg.gap_max_us,
    };
    (
        EdgeCapture::new(queues, stats, cfg, mode),
        BitDecoder::new(queues, stats, cfg),
        PacketFramer::new(queues, stats),
        OverrideDriver::new(slot, out, delay, cfg.gap_max_us - cfg.gap_min_us),
        queues.packets.receiver(),
    )
}
