//! # Line triage and panel emulation
//!
//! The thin layer between the two decoded lines and a home-automation
//! application: validate and classify incoming frames, remember the latest
//! heater report and panel packets, build button-press override frames and
//! step the heater toward a target temperature. Transport of the resulting
//! state (MQTT or otherwise) stays with the application.
//!
//! ## Typical loop
//!
//! ```rust,no_run
//! loop {
//!     let frame = remote_packets.receive().await;
//!     if let Some(decoded) = gateway.handle_frame(Line::Remote, &frame) {
//!         report_state(decoded);
//!     }
//!     if let Some(button) = gateway.sync_button() {
//!         let packet = gateway.press(button)?;
//!         override_slot.arm(packet.as_bytes()).await?;
//!     }
//! }
//! ```

use crate::RinnaiError;
use crate::frame::Frame;
use crate::protocol::{ControlPacket, DecodedPacket, HeaterPacket, Packet, TEMP_C_MAX, TEMP_C_MIN};

/// Which physical line a frame was captured on
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    /// Heater-facing line: traffic from the heater and the other panels
    Remote,
    /// Local panel line, observed in pass-through
    Local,
}

/// Panel buttons that can be injected
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    OnOff,
    Priority,
    TemperatureUp,
    TemperatureDown,
}

/// Packet counters per classified source
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GatewayCounters {
    pub heater: u32,
    pub local_control: u32,
    pub remote_control: u32,
    pub unknown: u32,
}

/// Translation state between the decoded lines and the application
#[derive(Default)]
pub struct Gateway {
    last_heater: Option<HeaterPacket>,
    last_local_panel: Option<Packet>,
    last_local_control: Option<ControlPacket>,
    last_remote_control: Option<ControlPacket>,
    counters: GatewayCounters,
    target_temperature: Option<u8>,
}

impl Gateway {
    pub const fn new() -> Self {
        Self {
            last_heater: None,
            last_local_panel: None,
            last_local_control: None,
            last_remote_control: None,
            counters: GatewayCounters {
                heater: 0,
                local_control: 0,
                remote_control: 0,
                unknown: 0,
            },
            target_temperature: None,
        }
    }

    /// Triage one frame: drop it unless all validation flags pass, then
    /// classify, track the latest state per source and hand back
    /// heater/panel packets. Unknown senders are counted and swallowed.
    pub fn handle_frame(&mut self, line: Line, frame: &Frame) -> Option<DecodedPacket> {
        if !frame.is_valid() {
            return None;
        }
        let packet = Packet::from_bytes(frame.data);
        match DecodedPacket::from_packet(&packet) {
            DecodedPacket::Heater(heater) => {
                // heater state comes from the heater-facing line; a heater
                // frame on the panel line is delivered but not recorded
                if line == Line::Remote {
                    self.last_heater = Some(heater);
                    self.counters.heater += 1;
                }
                Some(DecodedPacket::Heater(heater))
            }
            DecodedPacket::Control(control) => {
                match line {
                    Line::Local => {
                        self.last_local_panel = Some(packet);
                        self.last_local_control = Some(control);
                        self.counters.local_control += 1;
                    }
                    Line::Remote => {
                        self.last_remote_control = Some(control);
                        self.counters.remote_control += 1;
                    }
                }
                Some(DecodedPacket::Control(control))
            }
            DecodedPacket::Unknown | DecodedPacket::Invalid => {
                self.counters.unknown += 1;
                None
            }
        }
    }

    /// Build the override frame for one simulated button press, based on
    /// the latest packet the local panel sent
    pub fn press(&self, button: Button) -> Result<Packet, RinnaiError> {
        let mut packet = self.last_local_panel.ok_or(RinnaiError::NoPanelPacket)?;
        match button {
            Button::OnOff => packet.set_on_off_pressed(),
            Button::Priority => packet.set_priority_pressed(),
            Button::TemperatureUp => packet.set_temperature_up_pressed(),
            Button::TemperatureDown => packet.set_temperature_down_pressed(),
        }
        Ok(packet)
    }

    /// Request a target temperature within the settable range
    pub fn set_target_temperature(&mut self, celsius: u8) -> Result<(), RinnaiError> {
        if !(TEMP_C_MIN..=TEMP_C_MAX).contains(&celsius) {
            return Err(RinnaiError::TemperatureRange);
        }
        self.target_temperature = Some(celsius);
        Ok(())
    }

    /// Stop steering the temperature
    pub fn clear_target_temperature(&mut self) {
        self.target_temperature = None;
    }

    pub fn target_temperature(&self) -> Option<u8> {
        self.target_temperature
    }

    /// Next button press moving the heater toward the target, if any.
    /// Inject one press per observed heater report so the loop converges
    /// on the heater's own pace.
    pub fn sync_button(&self) -> Option<Button> {
        let target = self.target_temperature?;
        let heater = self.last_heater?;
        if !heater.on {
            return None;
        }
        if heater.temperature_celsius < target {
            Some(Button::TemperatureUp)
        } else if heater.temperature_celsius > target {
            Some(Button::TemperatureDown)
        } else {
            None
        }
    }

    /// Latest heater state report
    pub fn heater(&self) -> Option<&HeaterPacket> {
        self.last_heater.as_ref()
    }

    /// Latest decoded packet from the local panel
    pub fn local_panel(&self) -> Option<&ControlPacket> {
        self.last_local_control.as_ref()
    }

    /// Latest decoded packet from a remote panel
    pub fn remote_panel(&self) -> Option<&ControlPacket> {
        self.last_remote_control.as_ref()
    }

    pub fn counters(&self) -> &GatewayCounters {
        &self.counters
    }
}
