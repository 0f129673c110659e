//! Frame encoding and deframing for the phx21 binary protocol.
//!
//! Frame format:
//! - 1 byte: sync (`0x5A` for commands, `0xA5` for responses)
//! - 1 byte: declared length (total frame size including sync and checksum)
//! - 1 byte: command id
//! - N bytes: packed payload
//! - 1 byte: rotating checksum over everything before it

use phxlink_types::ParseError;

/// Sync byte opening a host→device command frame.
pub const COMMAND_SYNC: u8 = 0x5A;
/// Sync byte opening a device→host response frame.
pub const RESPONSE_SYNC: u8 = 0xA5;

/// Header bytes before the payload: sync, length, command id.
pub const HEADER_LEN: usize = 3;
/// Smallest well-formed frame: header plus checksum, no payload.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// Seed for the primary checksum path.
const CHECKSUM_SEED: u8 = 0xD5;

/// Rotating checksum over a byte slice, starting from the protocol seed.
///
/// Each step rotates the accumulator left by one bit and adds the next
/// byte modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    checksum_with_seed(CHECKSUM_SEED, data)
}

/// Legacy entry point used for out-of-band byte streams: same rotation,
/// zero seed.
pub fn checksum_legacy(data: &[u8]) -> u8 {
    checksum_with_seed(0, data)
}

fn checksum_with_seed(seed: u8, data: &[u8]) -> u8 {
    let mut acc = seed;
    for &b in data {
        acc = acc.rotate_left(1);
        acc = acc.wrapping_add(b);
    }
    acc
}

/// A complete frame as received or about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a command frame around a packed payload, computing length and
    /// checksum. The returned byte vector is enqueued atomically.
    pub fn command(cmd_id: u8, payload: &[u8]) -> Frame {
        let total = HEADER_LEN + payload.len() + 1;
        let mut bytes = Vec::with_capacity(total);
        bytes.push(COMMAND_SYNC);
        bytes.push(total as u8);
        bytes.push(cmd_id);
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes));
        Frame { bytes }
    }

    /// Reassemble a frame from raw bytes already validated by the deframer.
    fn from_raw(bytes: Vec<u8>) -> Frame {
        Frame { bytes }
    }

    /// The command id this frame carries.
    pub fn cmd_id(&self) -> u8 {
        self.bytes[2]
    }

    /// The packed payload between the header and the checksum byte.
    pub fn payload(&self) -> &[u8] {
        self.bytes
            .get(HEADER_LEN..self.bytes.len().saturating_sub(1))
            .unwrap_or(&[])
    }

    /// The full wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame, yielding the wire bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Deframer state, one step per inbound byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitSync,
    WaitLen,
    WaitId,
    WaitData,
}

/// Incremental deframer for the binary protocol.
///
/// Feed bytes one at a time; a completed frame is returned as soon as the
/// accumulated count matches the declared length. No checksum verification
/// is performed on inbound frames; garbled data is filtered semantically
/// downstream.
#[derive(Debug)]
pub struct Deframer {
    sync: u8,
    state: State,
    declared_len: usize,
    buf: Vec<u8>,
}

impl Deframer {
    /// Deframer expecting the given sync byte.
    pub fn new(sync: u8) -> Self {
        Self {
            sync,
            state: State::WaitSync,
            declared_len: 0,
            buf: Vec::new(),
        }
    }

    /// Deframer for device→host responses.
    pub fn for_responses() -> Self {
        Self::new(RESPONSE_SYNC)
    }

    /// Deframer for host→device commands (used by test doubles that play
    /// the device side of the link).
    pub fn for_commands() -> Self {
        Self::new(COMMAND_SYNC)
    }

    /// Consume one byte; returns a frame when one completes.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::WaitSync => {
                if byte == self.sync {
                    self.buf.clear();
                    self.buf.push(byte);
                    self.state = State::WaitLen;
                }
                None
            }
            State::WaitLen => {
                if (byte as usize) < HEADER_LEN {
                    // Malformed declared length; hunt for the next sync
                    self.state = State::WaitSync;
                    return None;
                }
                self.declared_len = byte as usize;
                self.buf.push(byte);
                self.state = State::WaitId;
                None
            }
            State::WaitId => {
                self.buf.push(byte);
                self.state = State::WaitData;
                self.complete()
            }
            State::WaitData => {
                self.buf.push(byte);
                self.complete()
            }
        }
    }

    fn complete(&mut self) -> Option<Frame> {
        if self.buf.len() >= self.declared_len {
            self.state = State::WaitSync;
            Some(Frame::from_raw(std::mem::take(&mut self.buf)))
        } else {
            None
        }
    }
}

/// Parse a payload slice out of a frame, checking the expected length.
pub fn expect_payload(frame: &Frame, expected: usize) -> Result<&[u8], ParseError> {
    let payload = frame.payload();
    if payload.len() < expected {
        return Err(ParseError::InsufficientBytes {
            expected,
            actual: payload.len(),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty_is_seed() {
        assert_eq!(checksum(&[]), 0xD5);
        assert_eq!(checksum_legacy(&[]), 0x00);
    }

    #[test]
    fn test_checksum_rotates_then_adds() {
        // 0xD5 rotl 1 = 0xAB; 0xAB + 0x01 = 0xAC
        assert_eq!(checksum(&[0x01]), 0xAC);
    }

    #[test]
    fn test_command_frame_layout() {
        let frame = Frame::command(0x25, &[]);
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0], COMMAND_SYNC);
        assert_eq!(bytes[1], 4); // total length including checksum
        assert_eq!(bytes[2], 0x25);
        assert_eq!(bytes[3], checksum(&bytes[..3]));
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_deframe_zero_payload_response() {
        let mut deframer = Deframer::for_responses();
        let mut got = None;
        for b in [RESPONSE_SYNC, 4, 0x25, 0x11] {
            got = deframer.push(b);
        }
        let frame = got.expect("frame should complete");
        assert_eq!(frame.cmd_id(), 0x25);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn test_deframe_skips_junk_before_sync() {
        let mut deframer = Deframer::for_responses();
        let mut frames = Vec::new();
        for b in [0x00, 0xFF, 0x42, RESPONSE_SYNC, 5, 0x0A, 0x07, 0x99] {
            if let Some(f) = deframer.push(b) {
                frames.push(f);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cmd_id(), 0x0A);
        assert_eq!(frames[0].payload(), &[0x07]);
    }

    #[test]
    fn test_deframe_resets_on_short_length() {
        let mut deframer = Deframer::for_responses();
        assert!(deframer.push(RESPONSE_SYNC).is_none());
        assert!(deframer.push(2).is_none()); // malformed: below minimum
        // machine is hunting for sync again
        let mut got = None;
        for b in [RESPONSE_SYNC, 4, 0x26, 0x00] {
            got = deframer.push(b);
        }
        assert_eq!(got.unwrap().cmd_id(), 0x26);
    }

    /// Loopback invariant: any command frame, re-tagged with the response
    /// sync, deframes to identical bytes.
    #[test]
    fn test_loopback_identity() {
        let payloads: [&[u8]; 3] = [&[], &[1, 2, 3], &[0u8; 24]];
        for (i, payload) in payloads.iter().enumerate() {
            let frame = Frame::command(0x20 + i as u8, payload);
            let mut wire = frame.as_bytes().to_vec();
            wire[0] = RESPONSE_SYNC;

            let mut deframer = Deframer::for_responses();
            let mut out = None;
            for &b in &wire {
                out = deframer.push(b);
            }
            let got = out.expect("loopback frame should complete");
            assert_eq!(got.as_bytes(), &wire[..]);
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = Vec::new();
        for cmd in [0x25u8, 0x0A, 0x26] {
            let mut f = Frame::command(cmd, &[cmd]).into_bytes();
            f[0] = RESPONSE_SYNC;
            wire.extend_from_slice(&f);
        }
        let mut deframer = Deframer::for_responses();
        let cmds: Vec<u8> = wire
            .iter()
            .filter_map(|&b| deframer.push(b))
            .map(|f| f.cmd_id())
            .collect();
        assert_eq!(cmds, vec![0x25, 0x0A, 0x26]);
    }
}
