//! # Frame assembly
//!
//! A preamble opens a frame, 48 data symbols fill it least-significant bit
//! first, and the result is validated on three independent axes: preamble
//! seen, odd parity on each of the first 5 bytes, XOR checksum over all 6
//! bytes. Partial frames are never published; a frame completed without a
//! preamble is published with `valid_preamble` false so the consumer can
//! see noise as noise.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::Instant;

use crate::bits::{BitSymbol, SymbolKind};
use crate::protocol::odd_parity;
use crate::{
    BIT_QUEUE_DEPTH, BITS_IN_PACKET, BYTES_IN_PACKET, LineQueues, LineStats, PACKET_QUEUE_DEPTH,
};

/// One assembled 6-byte frame with its framing verdicts.
///
/// Consumers must require all three validation flags before trusting
/// `data`; the flags are independent.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub data: [u8; BYTES_IN_PACKET],
    /// Cycle counter at frame start
    pub start_cycles: u32,
    /// Monotonic µs at frame start
    pub start_micros: u64,
    /// Monotonic ms at frame start
    pub start_millis: u64,
    /// Always 48 on published frames
    pub bits_present: u8,
    /// Frame was opened by a preamble
    pub valid_preamble: bool,
    /// Each of the first 5 bytes has odd parity
    pub valid_parity: bool,
    /// XOR over all 6 bytes is zero
    pub valid_checksum: bool,
}

impl Frame {
    const fn empty() -> Self {
        Frame {
            data: [0; BYTES_IN_PACKET],
            start_cycles: 0,
            start_micros: 0,
            start_millis: 0,
            bits_present: 0,
            valid_preamble: false,
            valid_parity: false,
            valid_checksum: false,
        }
    }

    /// True when preamble, parity and checksum all passed
    pub fn is_valid(&self) -> bool {
        self.valid_preamble && self.valid_parity && self.valid_checksum
    }
}

/// Bit-to-packet stage of one line
pub struct PacketFramer<'d> {
    symbols: Receiver<'d, CriticalSectionRawMutex, BitSymbol, BIT_QUEUE_DEPTH>,
    packets: Sender<'d, CriticalSectionRawMutex, Frame, PACKET_QUEUE_DEPTH>,
    stats: &'d LineStats,
    current: Frame,
}

impl<'d> PacketFramer<'d> {
    pub(crate) fn new(queues: &'d LineQueues, stats: &'d LineStats) -> Self {
        Self {
            symbols: queues.symbols.receiver(),
            packets: queues.packets.sender(),
            stats,
            current: Frame::empty(),
        }
    }

    /// Accumulate symbols into frames forever
    pub async fn run(mut self) -> ! {
        loop {
            let symbol = self.symbols.receive().await;
            if let Some(done) = self.push(symbol) {
                if self.packets.try_send(done).is_err() {
                    self.stats.note_packet_error();
                }
            }
        }
    }

    /// Fold one symbol into the accumulator; returns the finished frame
    /// once 48 bits are present
    fn push(&mut self, symbol: BitSymbol) -> Option<Frame> {
        match symbol.kind {
            SymbolKind::Zero => {
                // data is pre-zeroed, only advance
                self.current.bits_present += 1;
            }
            SymbolKind::One => {
                let bit = self.current.bits_present as usize;
                if bit < BITS_IN_PACKET {
                    self.current.data[bit / 8] |= 1 << (bit % 8);
                }
                self.current.bits_present += 1;
            }
            SymbolKind::Preamble => self.restart(symbol.start_cycles, true),
            SymbolKind::Error => {
                self.stats.note_packet_error();
                self.restart(symbol.start_cycles, false);
            }
        }
        if self.current.bits_present as usize == BITS_IN_PACKET {
            let mut done = self.current;
            done.valid_parity = done.data[..BYTES_IN_PACKET - 1].iter().all(|&b| odd_parity(b));
            done.valid_checksum = done.data.iter().fold(0, |acc, &b| acc ^ b) == 0;
            // back to an observably-invalid accumulator: bits arriving
            // without a fresh preamble produce frames that fail validation
            self.current.bits_present = 0;
            self.current.valid_preamble = false;
            self.current.valid_parity = false;
            self.current.valid_checksum = false;
            self.current.data = [0; BYTES_IN_PACKET];
            Some(done)
        } else {
            None
        }
    }

    fn restart(&mut self, start_cycles: u32, valid_preamble: bool) {
        let now = Instant::now();
        self.current.bits_present = 0;
        self.current.start_cycles = start_cycles;
        self.current.start_micros = now.as_micros();
        self.current.start_millis = now.as_millis();
        self.current.valid_preamble = valid_preamble;
        self.current.valid_parity = false;
        self.current.valid_checksum = false;
        self.current.data = [0; BYTES_IN_PACKET];
    }
}
