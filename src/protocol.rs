//! # Packet decoding and construction
//!
//! Packets are 6 bytes, least-significant bit first per byte. Bit 7 of
//! each of the first 5 bytes is an odd-parity bit and byte 5 is the XOR of
//! bytes 0 to 4. The low nibble of byte 0 carries the sender id (0x7 is
//! the heater, 0 to 6 are control panels) and byte 4 discriminates the
//! direction (0x20 heater, 0xbf panel).
//!
//! Field layout is based on observation of live links; the protocol is
//! only partially known and packets that frame correctly but match no
//! known sender classify as [`PacketSource::Unknown`].

use core::fmt::Write;

use heapless::String;

use crate::{BYTES_IN_PACKET, RinnaiError};

/// Lowest temperature a panel can request
pub const TEMP_C_MIN: u8 = 37;
/// Highest temperature a panel can request (the codes above it are fixed steps)
pub const TEMP_C_MAX: u8 = 48;

const TEMP_MAX_CODE: u8 = 0xe;
const TEMP_CODE: [u8; 15] = [37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 50, 55, 60];

/// Return true if the byte has an odd number of set bits
pub fn odd_parity(mut b: u8) -> bool {
    b ^= b >> 4;
    b ^= b >> 2;
    b ^= b >> 1;
    b & 1 != 0
}

/// Sender classification of a packet
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketSource {
    /// Length, parity or checksum failed
    Invalid,
    /// Frames correctly but matches no known sender
    Unknown,
    /// The heater unit
    Heater,
    /// One of the control panels
    Control,
}

/// State report sent by the heater
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaterPacket {
    /// Id of the panel currently holding priority
    pub active_id: u8,
    pub on: bool,
    /// Water is flowing
    pub in_use: bool,
    pub temperature_celsius: u8,
    pub startup_state: u8,
}

/// Button state sent by a control panel
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlPacket {
    /// Id of the sending panel
    pub my_id: u8,
    pub on_off_pressed: bool,
    pub priority_pressed: bool,
    pub temperature_up_pressed: bool,
    pub temperature_down_pressed: bool,
}

/// A 6-byte Rinnai packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Packet([u8; BYTES_IN_PACKET]);

impl Packet {
    /// Wrap raw packet bytes
    pub const fn from_bytes(data: [u8; BYTES_IN_PACKET]) -> Self {
        Packet(data)
    }

    /// Wrap a byte slice, length checked
    pub fn from_slice(data: &[u8]) -> Result<Self, RinnaiError> {
        let bytes = data.try_into().map_err(|_| RinnaiError::InvalidLength)?;
        Ok(Packet(bytes))
    }

    /// Raw packet bytes
    pub fn as_bytes(&self) -> &[u8; BYTES_IN_PACKET] {
        &self.0
    }

    /// Classify the sender. Every byte must have odd parity and the XOR
    /// over the frame must be zero before the discriminators are consulted.
    pub fn source(&self) -> PacketSource {
        let mut checksum = 0u8;
        for &b in &self.0 {
            if !odd_parity(b) {
                return PacketSource::Invalid;
            }
            checksum ^= b;
        }
        if checksum != 0 {
            return PacketSource::Invalid;
        }
        if self.0[0] & 0x0f == 0x7 && self.0[4] == 0x20 {
            PacketSource::Heater
        } else if self.0[0] & 0x0f < 0x7 && self.0[4] == 0xbf {
            PacketSource::Control
        } else {
            PacketSource::Unknown
        }
    }

    /// Decode heater fields. Assumes [`source`](Self::source) said [`PacketSource::Heater`].
    pub fn decode_heater(&self) -> Result<HeaterPacket, RinnaiError> {
        let code = self.0[2] & 0x0f;
        if code > TEMP_MAX_CODE {
            return Err(RinnaiError::TemperatureRange);
        }
        Ok(HeaterPacket {
            active_id: (self.0[0] >> 4) & 0x7,
            on: self.0[1] & 0x40 != 0,
            in_use: self.0[2] & 0x10 != 0,
            temperature_celsius: TEMP_CODE[code as usize],
            startup_state: self.0[3] & 0x7f,
        })
    }

    /// Decode panel fields. Assumes [`source`](Self::source) said [`PacketSource::Control`].
    pub fn decode_control(&self) -> ControlPacket {
        ControlPacket {
            my_id: self.0[0] & 0x0f,
            on_off_pressed: self.0[1] & 0x01 != 0,
            priority_pressed: self.0[1] & 0x04 != 0,
            temperature_up_pressed: self.0[2] & 0x01 != 0,
            temperature_down_pressed: self.0[2] & 0x02 != 0,
        }
    }

    /// Press On/Off in a panel packet and reseal framing
    pub fn set_on_off_pressed(&mut self) {
        self.0[1] |= 0x01;
        self.seal();
    }

    /// Press Priority in a panel packet and reseal framing
    pub fn set_priority_pressed(&mut self) {
        self.0[1] |= 0x04;
        self.seal();
    }

    /// Press Temperature Up in a panel packet and reseal framing
    pub fn set_temperature_up_pressed(&mut self) {
        self.0[2] |= 0x01;
        self.seal();
    }

    /// Press Temperature Down in a panel packet and reseal framing
    pub fn set_temperature_down_pressed(&mut self) {
        self.0[2] |= 0x02;
        self.seal();
    }

    /// Recompute the parity bit of bytes 0..4 and the checksum byte so the
    /// packet classifies again
    fn seal(&mut self) {
        let mut checksum = 0u8;
        for b in &mut self.0[..BYTES_IN_PACKET - 1] {
            *b &= 0x7f;
            if !odd_parity(*b) {
                *b |= 0x80;
            }
            checksum ^= *b;
        }
        self.0[BYTES_IN_PACKET - 1] = checksum;
    }

    /// Hex rendering for log or telemetry payloads
    pub fn render(&self) -> String<12> {
        let mut out = String::new();
        for b in &self.0 {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

/// A classified and decoded packet
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodedPacket {
    /// Framing or field decode failed
    Invalid,
    /// Valid framing from an unrecognized sender
    Unknown,
    Heater(HeaterPacket),
    Control(ControlPacket),
}

impl DecodedPacket {
    /// Classify and decode in one step
    pub fn from_packet(packet: &Packet) -> Self {
        match packet.source() {
            PacketSource::Invalid => DecodedPacket::Invalid,
            PacketSource::Unknown => DecodedPacket::Unknown,
            PacketSource::Heater => match packet.decode_heater() {
                Ok(heater) => DecodedPacket::Heater(heater),
                Err(_) => DecodedPacket::Invalid,
            },
            PacketSource::Control => DecodedPacket::Control(packet.decode_control()),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Packet {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=[u8]:02x}", &self.0[..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // heater report: active id 7, on, in use, temperature code 8 (45°C)
    const HEATER_BYTES: [u8; 6] = [0xf7, 0x40, 0x98, 0x80, 0x20, 0x8f];
    // panel 1, no buttons pressed
    const PANEL_IDLE_BYTES: [u8; 6] = [0x01, 0x80, 0x80, 0x80, 0xbf, 0x3e];

    #[test]
    fn parity_helper() {
        assert!(odd_parity(0x01));
        assert!(odd_parity(0x40));
        assert!(odd_parity(0xbf));
        assert!(!odd_parity(0x00));
        assert!(!odd_parity(0x77));
        assert!(!odd_parity(0xff));
    }

    #[test]
    fn heater_report_decodes() {
        let packet = Packet::from_bytes(HEATER_BYTES);
        assert_eq!(packet.source(), PacketSource::Heater);
        let heater = packet.decode_heater().unwrap();
        assert_eq!(heater.active_id, 7);
        assert!(heater.on);
        assert!(heater.in_use);
        assert_eq!(heater.temperature_celsius, 45);
        assert_eq!(heater.startup_state, 0);
    }

    #[test]
    fn idle_panel_packet_decodes() {
        let packet = Packet::from_bytes(PANEL_IDLE_BYTES);
        assert_eq!(packet.source(), PacketSource::Control);
        let control = packet.decode_control();
        assert_eq!(control.my_id, 1);
        assert!(!control.on_off_pressed);
        assert!(!control.priority_pressed);
        assert!(!control.temperature_up_pressed);
        assert!(!control.temperature_down_pressed);
    }

    #[test]
    fn bad_parity_is_invalid() {
        let mut bytes = PANEL_IDLE_BYTES;
        bytes[1] = 0x00; // even parity
        assert_eq!(Packet::from_bytes(bytes).source(), PacketSource::Invalid);
    }

    #[test]
    fn bad_checksum_is_invalid() {
        let mut bytes = HEATER_BYTES;
        bytes[5] ^= 0x01;
        assert_eq!(Packet::from_bytes(bytes).source(), PacketSource::Invalid);
    }

    #[test]
    fn framed_but_unrecognized_is_unknown() {
        // id nibble below 0x7 but the direction byte matches neither side
        let mut packet = Packet::from_bytes([0x01, 0x80, 0x80, 0x80, 0x80, 0x00]);
        packet.seal();
        assert_eq!(packet.source(), PacketSource::Unknown);
    }

    #[test]
    fn slice_length_is_checked() {
        assert_eq!(
            Packet::from_slice(&PANEL_IDLE_BYTES[..5]),
            Err(RinnaiError::InvalidLength)
        );
        assert!(Packet::from_slice(&PANEL_IDLE_BYTES).is_ok());
    }

    #[test]
    fn temperature_codes_cover_the_table() {
        let mut bytes = HEATER_BYTES;
        bytes[2] = 0x1e; // in use, code 14
        let mut packet = Packet::from_bytes(bytes);
        packet.seal();
        assert_eq!(packet.decode_heater().unwrap().temperature_celsius, 60);

        bytes[2] = 0x1f; // code 15 is out of range
        let mut packet = Packet::from_bytes(bytes);
        packet.seal();
        assert_eq!(packet.decode_heater(), Err(RinnaiError::TemperatureRange));
    }

    #[test]
    fn each_button_round_trips() {
        let cases: [(fn(&mut Packet), fn(&ControlPacket) -> bool); 4] = [
            (Packet::set_on_off_pressed, |c| c.on_off_pressed),
            (Packet::set_priority_pressed, |c| c.priority_pressed),
            (Packet::set_temperature_up_pressed, |c| c.temperature_up_pressed),
            (Packet::set_temperature_down_pressed, |c| c.temperature_down_pressed),
        ];
        for (set, pressed) in cases {
            let mut packet = Packet::from_bytes(PANEL_IDLE_BYTES);
            set(&mut packet);
            // still frames and classifies after the mutation
            assert_eq!(packet.source(), PacketSource::Control);
            let control = packet.decode_control();
            assert!(pressed(&control));
            assert_eq!(control.my_id, 1);
        }
    }

    #[test]
    fn temperature_up_reseals_parity_and_checksum() {
        let mut packet = Packet::from_bytes(PANEL_IDLE_BYTES);
        packet.set_temperature_up_pressed();
        let bytes = packet.as_bytes();
        assert_eq!(bytes[2] & 0x01, 0x01);
        for &b in &bytes[..5] {
            assert!(odd_parity(b));
        }
        assert_eq!(bytes.iter().fold(0, |acc, &b| acc ^ b), 0);
    }

    #[test]
    fn setters_are_idempotent() {
        let mut once = Packet::from_bytes(PANEL_IDLE_BYTES);
        once.set_priority_pressed();
        let mut twice = once;
        twice.set_priority_pressed();
        assert_eq!(once, twice);
    }

    #[test]
    fn button_set_on_scratch_decodes_back() {
        let mut packet = Packet::from_bytes([0; 6]);
        packet.set_temperature_down_pressed();
        let control = packet.decode_control();
        assert!(control.temperature_down_pressed);
        assert!(!control.on_off_pressed);
        assert!(!control.priority_pressed);
        assert!(!control.temperature_up_pressed);
    }

    #[test]
    fn decoded_packet_classifies_in_one_step() {
        let heater = Packet::from_bytes(HEATER_BYTES);
        assert!(matches!(DecodedPacket::from_packet(&heater), DecodedPacket::Heater(h) if h.temperature_celsius == 45));

        let panel = Packet::from_bytes(PANEL_IDLE_BYTES);
        assert!(matches!(DecodedPacket::from_packet(&panel), DecodedPacket::Control(_)));

        let mut bad = HEATER_BYTES;
        bad[5] ^= 0x01;
        assert_eq!(DecodedPacket::from_packet(&Packet::from_bytes(bad)), DecodedPacket::Invalid);
    }

    #[test]
    fn undecodable_temperature_is_invalid_not_heater() {
        let mut bytes = HEATER_BYTES;
        bytes[2] = 0x1f;
        let mut packet = Packet::from_bytes(bytes);
        packet.seal();
        assert_eq!(packet.source(), PacketSource::Heater);
        assert_eq!(DecodedPacket::from_packet(&packet), DecodedPacket::Invalid);
    }

    #[test]
    fn render_is_contiguous_hex() {
        let packet = Packet::from_bytes(HEATER_BYTES);
        assert_eq!(packet.render().as_str(), "f7409880208f");
    }
}
