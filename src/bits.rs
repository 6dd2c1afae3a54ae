//! # Pulse pairing and symbol classification
//!
//! Each bit on the wire is one ~600 µs symbol: a low phase followed by a
//! high phase whose duty cycle carries the value (~75% low / ~25% high is
//! a `0`, ~25% low / ~75% high is a `1`). A high assertion longer than a
//! symbol period is the preamble that opens a frame.
//!
//! This stage consumes timestamped edges in pairs, converts the cycle
//! deltas to durations and publishes one classified symbol per pair:
//!
//! | Kind | Low µs | High µs |
//! |------|--------|---------|
//! | `Zero` | (390, 510) | (90, 210) |
//! | `One` | (90, 210) | (390, 510) |
//! | `Preamble` | any | (600, 1200) |
//! | `Error` | otherwise | otherwise |

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};

use crate::pulse::PulseSample;
use crate::{BIT_QUEUE_DEPTH, LineConfig, LineQueues, LineStats, PULSE_QUEUE_DEPTH};

/// Nominal duration of one bit symbol
pub const SYMBOL_DURATION_US: u32 = 600;

const SHORT_MIN_US: u32 = SYMBOL_DURATION_US * 15 / 100;
const SHORT_MAX_US: u32 = SYMBOL_DURATION_US * 35 / 100;
const LONG_MIN_US: u32 = SYMBOL_DURATION_US * 65 / 100;
const LONG_MAX_US: u32 = SYMBOL_DURATION_US * 85 / 100;

/// Classification of one low/high pulse pair
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SymbolKind {
    /// Long low, short high
    Zero,
    /// Short low, long high
    One,
    /// Oversized high assertion opening a frame
    Preamble,
    /// Durations outside every window
    Error,
}

/// One classified symbol
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitSymbol {
    pub kind: SymbolKind,
    /// Cycle counter at symbol start: the rising edge for a preamble, the
    /// end of the previous symbol otherwise
    pub start_cycles: u32,
    /// Diagnostic duration: the high phase for a preamble, the low phase otherwise
    pub pulse_us: u32,
}

/// Classify one low/high duration pair in µs
pub fn classify_pair(low_us: u32, high_us: u32) -> SymbolKind {
    if high_us > SYMBOL_DURATION_US && high_us < SYMBOL_DURATION_US * 2 {
        SymbolKind::Preamble
    } else if low_us > SHORT_MIN_US
        && low_us < SHORT_MAX_US
        && high_us > LONG_MIN_US
        && high_us < LONG_MAX_US
    {
        SymbolKind::One
    } else if low_us > LONG_MIN_US
        && low_us < LONG_MAX_US
        && high_us > SHORT_MIN_US
        && high_us < SHORT_MAX_US
    {
        SymbolKind::Zero
    } else {
        SymbolKind::Error
    }
}

/// Pulse-to-bit stage of one line
pub struct BitDecoder<'d> {
    pulses: Receiver<'d, CriticalSectionRawMutex, PulseSample, PULSE_QUEUE_DEPTH>,
    symbols: Sender<'d, CriticalSectionRawMutex, BitSymbol, BIT_QUEUE_DEPTH>,
    stats: &'d LineStats,
    cycles_per_us: u32,
    last_end_cycle: u32,
}

impl<'d> BitDecoder<'d> {
    pub(crate) fn new(queues: &'d LineQueues, stats: &'d LineStats, cfg: LineConfig) -> Self {
        Self {
            pulses: queues.pulses.receiver(),
            symbols: queues.symbols.sender(),
            stats,
            cycles_per_us: cfg.cycles_per_us,
            last_end_cycle: 0,
        }
    }

    /// Consume edges in rise/fall pairs forever, publishing one symbol per
    /// pair. Unexpected polarity is counted and realigns on the next rise.
    pub async fn run(mut self) -> ! {
        loop {
            let rise = self.pulses.receive().await;
            if !rise.level {
                self.stats.note_bit_error();
                continue;
            }
            let fall = self.pulses.receive().await;
            if fall.level {
                self.stats.note_bit_error();
            } else {
                let symbol = self.pair(rise.cycles, fall.cycles);
                if self.symbols.try_send(symbol).is_err() {
                    self.stats.note_bit_error();
                }
            }
            self.last_end_cycle = fall.cycles;
        }
    }

    /// Build the symbol for one rise/fall pair
    fn pair(&self, rising_cycle: u32, falling_cycle: u32) -> BitSymbol {
        let low_us = rising_cycle.wrapping_sub(self.last_end_cycle) / self.cycles_per_us;
        let high_us = falling_cycle.wrapping_sub(rising_cycle) / self.cycles_per_us;
        match classify_pair(low_us, high_us) {
            SymbolKind::Preamble => BitSymbol {
                kind: SymbolKind::Preamble,
                start_cycles: rising_cycle,
                pulse_us: high_us,
            },
            kind => BitSymbol {
                kind,
                start_cycles: self.last_end_cycle,
                pulse_us: low_us,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nominal_symbols_classify() {
        assert_eq!(classify_pair(450, 150), SymbolKind::Zero);
        assert_eq!(classify_pair(150, 450), SymbolKind::One);
        assert_eq!(classify_pair(10, 650), SymbolKind::Preamble);
    }

    #[test]
    fn straddling_durations_are_errors() {
        // straddles both the short and long windows
        assert_eq!(classify_pair(290, 310), SymbolKind::Error);
        assert_eq!(classify_pair(310, 290), SymbolKind::Error);
    }

    #[test]
    fn window_bounds_are_exclusive() {
        assert_eq!(classify_pair(390, 150), SymbolKind::Error);
        assert_eq!(classify_pair(510, 150), SymbolKind::Error);
        assert_eq!(classify_pair(450, 90), SymbolKind::Error);
        assert_eq!(classify_pair(450, 210), SymbolKind::Error);
        assert_eq!(classify_pair(391, 209), SymbolKind::Zero);
        assert_eq!(classify_pair(209, 391), SymbolKind::One);
    }

    #[test]
    fn preamble_needs_an_oversized_but_bounded_high() {
        assert_eq!(classify_pair(450, 600), SymbolKind::Error);
        assert_eq!(classify_pair(450, 601), SymbolKind::Preamble);
        assert_eq!(classify_pair(450, 1_199), SymbolKind::Preamble);
        assert_eq!(classify_pair(450, 1_200), SymbolKind::Error);
    }

    #[test]
    fn preamble_outranks_symbol_windows() {
        // a valid-looking low phase does not matter once the high is oversized
        assert_eq!(classify_pair(150, 650), SymbolKind::Preamble);
        assert_eq!(classify_pair(450, 650), SymbolKind::Preamble);
    }

    #[test]
    fn pair_timestamps_by_kind() {
        let queues = crate::LineQueues::new();
        let stats = crate::LineStats::new();
        let mut decoder = BitDecoder::new(&queues, &stats, crate::LineConfig::default());
        let per_us = crate::LineConfig::default().cycles_per_us;

        decoder.last_end_cycle = 1_000;

        // data symbol starts at the end of the previous one
        let zero = decoder.pair(1_000 + 450 * per_us, 1_000 + 600 * per_us);
        assert_eq!(zero.kind, SymbolKind::Zero);
        assert_eq!(zero.start_cycles, 1_000);
        assert_eq!(zero.pulse_us, 450);

        // preamble timestamps its own rising edge
        let rise = 1_000 + 100 * per_us;
        let pre = decoder.pair(rise, rise + 800 * per_us);
        assert_eq!(pre.kind, SymbolKind::Preamble);
        assert_eq!(pre.start_cycles, rise);
        assert_eq!(pre.pulse_us, 800);
    }
}
