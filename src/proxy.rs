//! # Proxy output and packet override
//!
//! While nothing is overriding, the bridging line's output mirrors its
//! input edge by edge, so the downstream device sees the unmodified
//! traffic. Arming the override slot stages one replacement packet; the
//! edge handler releases it at the start of the first qualifying
//! inter-packet gap, and the driver then bit-bangs the replacement on the
//! output pin while the original is still arriving on the input. There is
//! no retry: a window that never comes leaves the packet armed.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;

use crate::{BYTES_IN_PACKET, RinnaiError};

/// Preamble assertion ahead of an injected packet
const INIT_PULSE_US: u16 = 850;
/// Short phase of an injected symbol
const SHORT_PULSE_US: u16 = 150;
/// Long phase of an injected symbol
const LONG_PULSE_US: u16 = 450;

/// Bound on waiting out a previous emission in [`OverrideSlot::arm`];
/// one packet on the wire plus its masking delay is well under this
const ARM_TIMEOUT: Duration = Duration::from_millis(100);

/// The proxy output pin, shared between the edge handler (mirroring) and
/// the override driver (bit-banging). `invert_out` accommodates an
/// inverting level shifter on the output side.
pub struct ProxyOut<O> {
    pin: Mutex<CriticalSectionRawMutex, RefCell<O>>,
    invert_out: bool,
}

impl<O: OutputPin> ProxyOut<O> {
    pub fn new(pin: O, invert_out: bool) -> Self {
        Self {
            pin: Mutex::new(RefCell::new(pin)),
            invert_out,
        }
    }

    /// Drive the output to a logical level, applying output inversion
    pub(crate) fn drive(&self, level: bool) {
        self.pin.lock(|pin| {
            let mut pin = pin.borrow_mut();
            if level != self.invert_out {
                pin.set_high().ok();
            } else {
                pin.set_low().ok();
            }
        });
    }
}

/// One pending packet substitution.
///
/// State walks idle → armed → in flight → idle and nothing else: the
/// arming side only sets `armed` while the line is idle, the edge handler
/// only sets `in_flight`, the driver clears both after emission.
pub struct OverrideSlot {
    packet: Mutex<CriticalSectionRawMutex, RefCell<[u8; BYTES_IN_PACKET]>>,
    armed: AtomicBool,
    in_flight: AtomicBool,
    release: Signal<CriticalSectionRawMutex, ()>,
}

impl OverrideSlot {
    pub const fn new() -> Self {
        Self {
            packet: Mutex::new(RefCell::new([0; BYTES_IN_PACKET])),
            armed: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            release: Signal::new(),
        }
    }

    /// Stage one replacement packet for emission on the next qualifying
    /// inter-packet gap.
    ///
    /// Waits out a still-running emission up to 100 ms and then fails with
    /// [`RinnaiError::OverrideBusy`]. A packet armed but not yet emitted
    /// fails with [`RinnaiError::OverridePending`] rather than being
    /// silently replaced.
    pub async fn arm(&self, data: &[u8]) -> Result<(), RinnaiError> {
        if data.len() != BYTES_IN_PACKET {
            return Err(RinnaiError::InvalidLength);
        }
        let start = Instant::now();
        while self.in_flight.load(Ordering::Acquire) {
            if start.elapsed() >= ARM_TIMEOUT {
                return Err(RinnaiError::OverrideBusy);
            }
            Timer::after_millis(1).await;
        }
        if self.armed.load(Ordering::Acquire) {
            return Err(RinnaiError::OverridePending);
        }
        self.packet.lock(|p| p.borrow_mut().copy_from_slice(data));
        self.armed.store(true, Ordering::Release);
        Ok(())
    }

    /// A replacement packet is staged and waiting for its window
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// The driver currently owns the output pin
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Edge-handler side: take the pin from the mirror and wake the driver.
    /// Called at most once per armed packet.
    pub(crate) fn release(&self) {
        self.in_flight.store(true, Ordering::Release);
        self.release.signal(());
    }

    pub(crate) async fn wait_released(&self) {
        self.release.wait().await;
    }

    pub(crate) fn packet(&self) -> [u8; BYTES_IN_PACKET] {
        self.packet.lock(|p| *p.borrow())
    }

    /// Driver side: emission finished, hand the pin back to the mirror
    pub(crate) fn finish(&self) {
        self.armed.store(false, Ordering::Release);
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Packet override actor of the bridging line.
///
/// Must run at a strictly higher priority than the pipeline stages so the
/// waveform is not preempted mid-symbol; `delay` has to be µs-accurate.
pub struct OverrideDriver<'d, O, D> {
    slot: &'d OverrideSlot,
    out: &'d ProxyOut<O>,
    delay: D,
    mask_us: u32,
}

impl<'d, O, D> OverrideDriver<'d, O, D>
where
    O: OutputPin,
    D: DelayUs<u16>,
{
    pub(crate) fn new(slot: &'d OverrideSlot, out: &'d ProxyOut<O>, delay: D, mask_us: u32) -> Self {
        Self {
            slot,
            out,
            delay,
            mask_us,
        }
    }

    /// Wait for release and emit, forever
    pub async fn run(mut self) -> ! {
        loop {
            self.slot.wait_released().await;
            let packet = self.slot.packet();
            self.write_packet(&packet);
            // the original packet may still be arriving on the input; hold
            // the output quiet until its trailing bits must be over
            Timer::after_micros(self.mask_us as u64).await;
            self.slot.finish();
        }
    }

    /// Bit-bang one packet, least-significant bit first per byte
    fn write_packet(&mut self, data: &[u8; BYTES_IN_PACKET]) {
        self.out.drive(true);
        self.delay.delay_us(INIT_PULSE_US);
        self.out.drive(false);
        for byte in data {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    self.delay.delay_us(SHORT_PULSE_US);
                    self.out.drive(true);
                    self.delay.delay_us(LONG_PULSE_US);
                } else {
                    self.delay.delay_us(LONG_PULSE_US);
                    self.out.drive(true);
                    self.delay.delay_us(SHORT_PULSE_US);
                }
                self.out.drive(false);
            }
        }
    }
}
