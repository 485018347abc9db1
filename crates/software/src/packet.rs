//! USB-MIDI event packet framing.
//!
//! On the wire, USB MIDI is not a byte stream: the host exchanges 32-bit event packets whose
//! header nibbles carry a virtual cable number and a Code Index Number (CIN) describing the 0–3
//! MIDI bytes that follow (USB Device Class Definition for MIDI Devices 1.0, §4). The serial side
//! of the bridge *is* a byte stream, so the USB edge needs this translation layer — the same job
//! TinyUSB's `tud_midi_stream_read`/`write` performed for the original adapter.
//!
//! This is transport framing only. The relay core never looks at these bytes; the encoder inspects
//! status bytes solely to decide packet boundaries, and the decoder only sizes payloads from the
//! CIN table.

/// A single 32-bit USB-MIDI event packet.
pub type EventPacket = [u8; 4];

/// The one virtual cable this bridge uses.
pub const VIRTUAL_CABLE: u8 = 0;

const CIN_SYSTEM_2BYTE: u8 = 0x2;
const CIN_SYSTEM_3BYTE: u8 = 0x3;
const CIN_SYSEX_CONTINUE: u8 = 0x4;
/// Single-byte system common; doubles as "SysEx ends with one byte".
const CIN_SYSTEM_1BYTE: u8 = 0x5;
const CIN_SYSEX_END_2: u8 = 0x6;
const CIN_SYSEX_END_3: u8 = 0x7;
const CIN_SINGLE_BYTE: u8 = 0xF;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Cable nibble of a packet header. Returns 0 for an empty slice.
pub fn cable_number(packet: &[u8]) -> u8 {
    match packet.first() {
        Some(header) => header >> 4,
        None => 0,
    }
}

/// The MIDI bytes carried by an event packet, sized from its CIN.
///
/// Anything shorter than a full packet decodes to nothing.
pub fn payload(packet: &[u8]) -> &[u8] {
    if packet.len() < 4 {
        return &[];
    }
    let len = match packet[0] & 0x0F {
        // reserved CINs carry no MIDI data
        0x0 | 0x1 => 0,
        0x5 | 0xF => 1,
        0x2 | 0x6 | 0xC | 0xD => 2,
        _ => 3,
    };
    &packet[1..1 + len]
}

/// Total length of the message beginning with `status`, including the status byte itself.
fn message_len(status: u8) -> usize {
    match status {
        // Program Change and Channel Pressure take a single data byte
        0xC0..=0xDF => 2,
        0x80..=0xEF => 3,
        // MTC Quarter Frame and Song Select
        0xF1 | 0xF3 => 2,
        // Song Position Pointer
        0xF2 => 3,
        _ => 1,
    }
}

/// CIN for a completed non-SysEx message beginning with `status`.
fn cin_for(status: u8) -> u8 {
    match status {
        // channel voice messages reuse the status high nibble as their CIN
        0x80..=0xEF => status >> 4,
        0xF1 | 0xF3 => CIN_SYSTEM_2BYTE,
        0xF2 => CIN_SYSTEM_3BYTE,
        _ => CIN_SYSTEM_1BYTE,
    }
}

/// Packs a raw serial MIDI byte stream into USB-MIDI event packets, one byte at a time.
///
/// Handles channel voice messages (including running status), system common messages, single-byte
/// real-time messages (emitted immediately, even when they interleave another message), and SysEx.
/// Bytes that cannot belong to any message — data with no preceding status, undefined system
/// common statuses — are discarded, which is also what the TinyUSB stream writer did.
#[derive(Debug)]
pub struct PacketEncoder {
    cable: u8,
    running_status: Option<u8>,
    /// Collected bytes of the message (or SysEx fragment) in progress.
    pending: [u8; 3],
    pending_len: usize,
    /// Total length the pending message needs before it can be emitted; 0 when idle.
    expected: usize,
    in_sysex: bool,
}

impl PacketEncoder {
    /// Create an encoder emitting packets on the given virtual cable.
    pub fn new(cable: u8) -> Self {
        Self {
            cable,
            running_status: None,
            pending: [0; 3],
            pending_len: 0,
            expected: 0,
            in_sysex: false,
        }
    }

    /// Feed one stream byte; returns a packet whenever one is completed.
    ///
    /// At most one packet can complete per input byte, since real-time bytes complete immediately
    /// without touching the message being collected.
    pub fn push(&mut self, byte: u8) -> Option<EventPacket> {
        if byte >= 0xF8 {
            // real-time: passes straight through, transparent to any message in progress
            return Some(self.packet(CIN_SINGLE_BYTE, &[byte]));
        }
        if byte >= 0x80 {
            self.push_status(byte)
        } else {
            self.push_data(byte)
        }
    }

    fn push_status(&mut self, status: u8) -> Option<EventPacket> {
        if status == SYSEX_END {
            if !self.in_sysex {
                // stray terminator
                return None;
            }
            let mut tail = [0u8; 3];
            let pending = self.pending_len;
            tail[..pending].copy_from_slice(&self.pending[..pending]);
            tail[pending] = SYSEX_END;
            let cin = match pending + 1 {
                1 => CIN_SYSTEM_1BYTE,
                2 => CIN_SYSEX_END_2,
                _ => CIN_SYSEX_END_3,
            };
            self.reset_message();
            return Some(self.packet(cin, &tail[..pending + 1]));
        }

        // any other status aborts an unterminated SysEx; the remainder can no longer form a packet
        self.reset_message();

        match status {
            SYSEX_START => {
                self.in_sysex = true;
                self.pending[0] = SYSEX_START;
                self.pending_len = 1;
                self.running_status = None;
                None
            }
            // Tune Request is complete by itself
            0xF6 => {
                self.running_status = None;
                Some(self.packet(CIN_SYSTEM_1BYTE, &[status]))
            }
            // undefined system common statuses
            0xF4 | 0xF5 => {
                self.running_status = None;
                None
            }
            0xF1..=0xF3 => {
                self.running_status = None;
                self.begin(status);
                None
            }
            _ => {
                self.running_status = Some(status);
                self.begin(status);
                None
            }
        }
    }

    fn push_data(&mut self, byte: u8) -> Option<EventPacket> {
        if self.in_sysex {
            self.pending[self.pending_len] = byte;
            self.pending_len += 1;
            if self.pending_len == 3 {
                self.pending_len = 0;
                let fragment = self.pending;
                return Some(self.packet(CIN_SYSEX_CONTINUE, &fragment));
            }
            return None;
        }

        if self.expected == 0 {
            match self.running_status {
                // running status: the omitted status byte is implied
                Some(status) => self.begin(status),
                // data with no status to attach to
                None => return None,
            }
        }

        self.pending[self.pending_len] = byte;
        self.pending_len += 1;
        if self.pending_len == self.expected {
            let status = self.pending[0];
            let packet = self.packet(cin_for(status), &self.pending[..self.pending_len]);
            if self.running_status.is_some() {
                // keep the status byte staged so further data bytes extend the running status
                self.pending_len = 1;
            } else {
                self.pending_len = 0;
                self.expected = 0;
            }
            return Some(packet);
        }
        None
    }

    fn begin(&mut self, status: u8) {
        self.pending[0] = status;
        self.pending_len = 1;
        self.expected = message_len(status);
    }

    fn reset_message(&mut self) {
        self.pending_len = 0;
        self.expected = 0;
        self.in_sysex = false;
    }

    fn packet(&self, cin: u8, bytes: &[u8]) -> EventPacket {
        let mut packet = [0u8; 4];
        packet[0] = (self.cable << 4) | (cin & 0x0F);
        packet[1..1 + bytes.len()].copy_from_slice(bytes);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs a byte stream through a fresh encoder and collects the emitted packets.
    fn encode(stream: &[u8]) -> heapless::Vec<EventPacket, 16> {
        let mut encoder = PacketEncoder::new(VIRTUAL_CABLE);
        stream.iter().filter_map(|&byte| encoder.push(byte)).collect()
    }

    #[test]
    fn encodes_note_on() {
        let packets = encode(&[0x90, 0x3C, 0x64]);
        assert_eq!(
            &[[0x09, 0x90, 0x3C, 0x64]],
            &packets[..],
            "Expected left but got right"
        );
    }

    #[test]
    fn expands_running_status() {
        let packets = encode(&[0x90, 0x3C, 0x64, 0x3E, 0x64]);
        assert_eq!(
            &[[0x09, 0x90, 0x3C, 0x64], [0x09, 0x90, 0x3E, 0x64]],
            &packets[..],
            "The omitted status byte must be restored; expected left but got right"
        );
    }

    #[test]
    fn encodes_two_byte_messages() {
        let packets = encode(&[0xC0, 0x05, 0xD1, 0x30]);
        assert_eq!(
            &[[0x0C, 0xC0, 0x05, 0x00], [0x0D, 0xD1, 0x30, 0x00]],
            &packets[..],
            "Expected left but got right"
        );
    }

    #[test]
    fn real_time_interleaves_without_corrupting_a_message() {
        let mut encoder = PacketEncoder::new(VIRTUAL_CABLE);
        assert_eq!(None, encoder.push(0x90), "Status alone completes nothing");
        assert_eq!(
            Some([0x0F, 0xF8, 0x00, 0x00]),
            encoder.push(0xF8),
            "Clock must pass through immediately; expected left but got right"
        );
        assert_eq!(None, encoder.push(0x3C), "Still collecting");
        assert_eq!(
            Some([0x09, 0x90, 0x3C, 0x64]),
            encoder.push(0x64),
            "The interrupted message must complete intact; expected left but got right"
        );
    }

    #[test]
    fn encodes_system_common() {
        let packets = encode(&[0xF2, 0x10, 0x20, 0xF1, 0x42, 0xF6]);
        assert_eq!(
            &[
                [0x03, 0xF2, 0x10, 0x20],
                [0x02, 0xF1, 0x42, 0x00],
                [0x05, 0xF6, 0x00, 0x00],
            ],
            &packets[..],
            "Expected left but got right"
        );
    }

    #[test]
    fn system_common_cancels_running_status() {
        let packets = encode(&[0x90, 0x3C, 0x64, 0xF3, 0x01, 0x3C, 0x64]);
        assert_eq!(
            &[[0x09, 0x90, 0x3C, 0x64], [0x02, 0xF3, 0x01, 0x00]],
            &packets[..],
            "Data after a system common message has no status to attach to"
        );
    }

    #[test]
    fn frames_sysex() {
        let packets = encode(&[0xF0, 0x01, 0x02, 0x03, 0x04, 0xF7]);
        assert_eq!(
            &[[0x04, 0xF0, 0x01, 0x02], [0x07, 0x03, 0x04, 0xF7]],
            &packets[..],
            "Expected left but got right"
        );

        let packets = encode(&[0xF0, 0x01, 0x02, 0x03, 0xF7]);
        assert_eq!(
            &[[0x04, 0xF0, 0x01, 0x02], [0x06, 0x03, 0xF7, 0x00]],
            &packets[..],
            "Two trailing bytes use the two-byte ending CIN; expected left but got right"
        );
    }

    #[test]
    fn aborted_sysex_discards_its_remainder() {
        let packets = encode(&[0xF0, 0x01, 0x90, 0x3C, 0x64]);
        assert_eq!(
            &[[0x09, 0x90, 0x3C, 0x64]],
            &packets[..],
            "The unterminated fragment must not leak into the new message"
        );
    }

    #[test]
    fn orphan_data_bytes_are_discarded() {
        assert!(
            encode(&[0x40, 0x41, 0x42]).is_empty(),
            "Data with no status cannot form a packet"
        );
    }

    #[test]
    fn decodes_payload_lengths_from_the_cin_table() {
        assert_eq!(
            &[0x90, 0x3C, 0x64],
            payload(&[0x09, 0x90, 0x3C, 0x64]),
            "Expected left but got right"
        );
        assert_eq!(
            &[0xC0, 0x05],
            payload(&[0x0C, 0xC0, 0x05, 0x00]),
            "Expected left but got right"
        );
        assert_eq!(
            &[0xF8],
            payload(&[0x0F, 0xF8, 0x00, 0x00]),
            "Expected left but got right"
        );
        assert_eq!(
            &[0x03, 0xF7],
            payload(&[0x06, 0x03, 0xF7, 0x00]),
            "Expected left but got right"
        );
        assert!(
            payload(&[0x00, 0x12, 0x34, 0x56]).is_empty(),
            "Reserved CINs carry no MIDI data"
        );
        assert!(payload(&[0x09, 0x90]).is_empty(), "Truncated packets decode to nothing");
    }

    #[test]
    fn reads_the_cable_nibble() {
        assert_eq!(0, cable_number(&[0x09, 0x90, 0x3C, 0x64]), "Expected left but got right");
        assert_eq!(1, cable_number(&[0x19, 0x90, 0x3C, 0x64]), "Expected left but got right");
    }

    #[test]
    fn round_trips_through_a_foreign_cable_header() {
        let mut encoder = PacketEncoder::new(2);
        let packet = encoder.push(0xF6).unwrap();
        assert_eq!(2, cable_number(&packet), "Expected left but got right");
        assert_eq!(&[0xF6], payload(&packet), "Expected left but got right");
    }
}
