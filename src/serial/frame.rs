// Request framing on the serial link
//
// Frame format: [0xAA, 0x55, 0x1E, Length, ReturnId(2), CommandId(2), Payload..., Checksum]
// Length counts the two ids and the payload. Ids are big-endian.
// Older senders write the fixed byte 0xC6 in place of the checksum; the
// decoder accepts it unless built strict.

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Frame preamble bytes
pub const PREAMBLE: [u8; 3] = [0xAA, 0x55, 0x1E];

// Return id and command id
const ID_BYTES: usize = 4;

/// Constant trailer written by senders that predate the checksum
pub const LEGACY_CHECKSUM: u8 = 0xC6;

/// One decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Echoed back with the response so the sender can match it
    pub return_id: u16,
    pub command_id: u16,
    pub payload: Vec<u8>,
}

/// Checksum over length, ids and payload: the inverted byte sum
pub fn checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| b as u32).sum();
    (!sum & 0xFF) as u8
}

/// Build a complete frame for `request`
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let length = u8::try_from(ID_BYTES + request.payload.len()).map_err(|_| {
        Error::InvalidFrame(format!("payload of {} bytes", request.payload.len()))
    })?;
    let mut frame = Vec::with_capacity(PREAMBLE.len() + 2 + length as usize);

    frame.extend_from_slice(&PREAMBLE);
    frame.push(length);
    frame.extend_from_slice(&request.return_id.to_be_bytes());
    frame.extend_from_slice(&request.command_id.to_be_bytes());
    frame.extend_from_slice(&request.payload);

    // Checksum over everything after the preamble
    let sum = checksum(&frame[PREAMBLE.len()..]);
    frame.push(sum);
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Number of preamble bytes matched so far
    Preamble(usize),
    Length,
    Body { length: usize },
    Checksum,
}

/// Byte-at-a-time frame decoder
///
/// Garbage between frames is skipped; a frame with a bad checksum or an
/// impossible length is dropped and the decoder hunts for the next preamble.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    // Length byte followed by the body, as covered by the checksum
    buffer: Vec<u8>,
    accept_legacy: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder that also takes the legacy constant trailer
    pub fn new() -> Self {
        Self {
            state: State::Preamble(0),
            buffer: Vec::new(),
            accept_legacy: true,
        }
    }

    /// Decoder that only takes the computed checksum
    pub fn strict() -> Self {
        Self {
            accept_legacy: false,
            ..Self::new()
        }
    }

    /// Feed one byte; returns a request when it completes a valid frame
    pub fn push(&mut self, byte: u8) -> Option<Request> {
        match self.state {
            State::Preamble(matched) => {
                self.state = if byte == PREAMBLE[matched] {
                    if matched + 1 == PREAMBLE.len() {
                        State::Length
                    } else {
                        State::Preamble(matched + 1)
                    }
                } else if byte == PREAMBLE[0] {
                    State::Preamble(1)
                } else {
                    State::Preamble(0)
                };
                None
            }
            State::Length => {
                let length = byte as usize;
                if length < ID_BYTES {
                    debug!("Dropping frame with length {}", length);
                    self.state = State::Preamble(0);
                } else {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.state = State::Body { length };
                }
                None
            }
            State::Body { length } => {
                self.buffer.push(byte);
                if self.buffer.len() == length + 1 {
                    self.state = State::Checksum;
                }
                None
            }
            State::Checksum => {
                self.state = State::Preamble(0);
                let expected = checksum(&self.buffer);
                let legacy = self.accept_legacy && byte == LEGACY_CHECKSUM;
                if byte != expected && !legacy {
                    debug!(
                        "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
                        expected, byte
                    );
                    return None;
                }
                if legacy && byte != expected {
                    trace!("Accepted legacy checksum byte");
                }
                let body = &self.buffer[1..];
                let request = Request {
                    return_id: u16::from_be_bytes([body[0], body[1]]),
                    command_id: u16::from_be_bytes([body[2], body[3]]),
                    payload: body[ID_BYTES..].to_vec(),
                };
                trace!("Decoded {:?}", request);
                Some(request)
            }
        }
    }

    /// Feed a buffer, collecting every completed request
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<Request> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request {
            return_id: 0x0102,
            command_id: 45001,
            payload: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_checksum() {
        // sum = 0x06, inverted = 0xF9
        assert_eq!(checksum(&[1, 2, 3]), 0xF9);
        assert_eq!(checksum(&[]), 0xFF);
        // Overflow beyond one byte is discarded
        assert_eq!(checksum(&[0xFF, 0x02]), !0x01u8);
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_request(&request()).unwrap();
        assert_eq!(&frame[..3], &PREAMBLE);
        assert_eq!(frame[3], 7);
        assert_eq!(&frame[4..6], &[0x01, 0x02]);
        assert_eq!(&frame[6..8], &45001u16.to_be_bytes());
        assert_eq!(frame.len(), 3 + 1 + 7 + 1);
    }

    #[test]
    fn test_decodes_valid_frame() {
        let frame = encode_request(&request()).unwrap();
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.extend(&frame), vec![request()]);
    }

    #[test]
    fn test_bad_checksum_dropped() {
        let mut frame = encode_request(&request()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.extend(&frame).is_empty());

        // Decoder recovers for the next frame
        let good = encode_request(&request()).unwrap();
        assert_eq!(decoder.extend(&good).len(), 1);
    }

    #[test]
    fn test_legacy_checksum_accepted() {
        let frame = [0xAA, 0x55, 0x1E, 0x05, 0x00, 0x01, 0x00, 0x02, 0x07, LEGACY_CHECKSUM];
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.extend(&frame),
            vec![Request {
                return_id: 1,
                command_id: 2,
                payload: vec![7],
            }]
        );

        let mut strict = FrameDecoder::strict();
        assert!(strict.extend(&frame).is_empty());
        // Strict decoding still takes computed checksums
        assert_eq!(strict.extend(&encode_request(&request()).unwrap()), vec![request()]);
    }

    #[test]
    fn test_resyncs_after_garbage() {
        let mut bytes = vec![0x00, 0xAA, 0x55, 0x00, 0xAA, 0xAA];
        bytes.extend(encode_request(&request()).unwrap());
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.extend(&bytes), vec![request()]);
    }

    #[test]
    fn test_short_length_rejected() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.extend(&[0xAA, 0x55, 0x1E, 0x02, 0x00, 0x00]).is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let empty = Request {
            return_id: 1,
            command_id: 2,
            payload: Vec::new(),
        };
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.extend(&encode_request(&empty).unwrap()), vec![empty]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let big = Request {
            return_id: 1,
            command_id: 2,
            payload: vec![0; 300],
        };
        assert!(matches!(encode_request(&big), Err(Error::InvalidFrame(_))));
    }
}
