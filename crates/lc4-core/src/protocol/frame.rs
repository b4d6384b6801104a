//! Frame encoding/decoding
//!
//! Every message on the wire uses the same fixed envelope:
//!
//! ```text
//! +----------+--------+-----+-------------+----------+--------+
//! | 43 53 4F | opcode | len | payload     | checksum | 03 FF  |
//! | 3 bytes  | 1      | 1   | len bytes   | 1        | 2      |
//! +----------+--------+-----+-------------+----------+--------+
//! ```
//!
//! `checksum = (opcode + len + sum(payload)) mod 256`.

use super::FrameError;

/// Start-of-frame marker
pub const START_MARKER: [u8; 3] = [0x43, 0x53, 0x4F];

/// End-of-frame marker
pub const END_MARKER: [u8; 2] = [0x03, 0xFF];

/// Bytes before the payload: marker, opcode, length
pub const HEADER_LEN: usize = 5;

/// Bytes after the payload: checksum, end marker
pub const TRAILER_LEN: usize = 3;

/// Envelope size of a frame with an empty payload
pub const FRAME_OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

/// Largest payload a single length byte can describe
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Scanner buffer cap; anything beyond this without a frame is line noise
const MAX_SCAN_BUFFER: usize = 4096;

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Opcode byte
    pub command: u8,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads the length byte cannot describe
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command, payload })
    }

    /// Checksum byte for this frame
    pub fn checksum(&self) -> u8 {
        checksum(self.command, self.payload.len() as u8, &self.payload)
    }

    /// Encode the frame to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.extend_from_slice(&START_MARKER);
        bytes.push(self.command);
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum());
        bytes.extend_from_slice(&END_MARKER);
        bytes
    }

    /// Decode a frame from a complete byte buffer
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        decode(data)
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Checksum over opcode, length byte and payload
pub fn checksum(command: u8, length: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command.wrapping_add(length), |acc, b| acc.wrapping_add(*b))
}

/// Build the wire bytes for `command` carrying `payload`
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Ok(Frame::new(command, payload)?.to_bytes())
}

/// Validate and decode one complete frame.
///
/// Checks run in a fixed order and the first violation is returned: start
/// marker, end marker, checksum, then declared length against the payload
/// actually present. The checksum covers the declared length byte, so a
/// corrupted length byte is reported as a checksum mismatch.
pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    if !data.starts_with(&START_MARKER) {
        return Err(FrameError::BadStartMarker);
    }
    if data.len() < FRAME_OVERHEAD {
        return Err(FrameError::LengthMismatch {
            declared: data.get(4).copied().unwrap_or(0) as usize,
            actual: data.len().saturating_sub(FRAME_OVERHEAD),
        });
    }

    let end = data.len();
    if data[end - END_MARKER.len()..] != END_MARKER {
        return Err(FrameError::BadEndMarker);
    }

    let command = data[3];
    let declared = data[4];
    let payload = &data[HEADER_LEN..end - TRAILER_LEN];
    let received = data[end - TRAILER_LEN];

    let expected = checksum(command, declared, payload);
    if received != expected {
        return Err(FrameError::ChecksumMismatch {
            expected,
            actual: received,
        });
    }

    if declared as usize != payload.len() {
        return Err(FrameError::LengthMismatch {
            declared: declared as usize,
            actual: payload.len(),
        });
    }

    Ok(Frame {
        command,
        payload: payload.to_vec(),
    })
}

/// Uppercase hex dump used for wire logging
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// Incremental frame scanner for unsolicited traffic.
///
/// Accepts arbitrary chunks and yields frames as they complete. Bytes before a
/// start marker are discarded; after a framing error the scanner drops one byte
/// and resynchronises on the next marker.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buffer: Vec<u8>,
}

impl FrameScanner {
    /// Create an empty scanner
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Add received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_SCAN_BUFFER {
            let excess = self.buffer.len() - MAX_SCAN_BUFFER;
            self.buffer.drain(..excess);
        }
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to take the next frame.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        match find_marker(&self.buffer) {
            Some(0) => {}
            Some(pos) => {
                self.buffer.drain(..pos);
            }
            None => {
                // Keep a possible partial marker at the tail
                let keep = self.buffer.len().min(START_MARKER.len() - 1);
                let cut = self.buffer.len() - keep;
                self.buffer.drain(..cut);
                return None;
            }
        }

        if self.buffer.len() < HEADER_LEN {
            return None;
        }
        let total = FRAME_OVERHEAD + self.buffer[4] as usize;
        if self.buffer.len() < total {
            return None;
        }

        match decode(&self.buffer[..total]) {
            Ok(frame) => {
                self.buffer.drain(..total);
                Some(Ok(frame))
            }
            Err(e) => {
                self.buffer.drain(..1);
                Some(Err(e))
            }
        }
    }
}

fn find_marker(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(START_MARKER.len())
        .position(|w| w == START_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set_id_vector() {
        let bytes = encode(0x10, &[0x05]).expect("encode");
        assert_eq!(bytes, vec![0x43, 0x53, 0x4F, 0x10, 0x01, 0x05, 0x16, 0x03, 0xFF]);
    }

    #[test]
    fn test_frame_roundtrip() {
        for len in [0usize, 1, 6, 16, 255] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let bytes = encode(0x23, &payload).expect("encode");
            let frame = decode(&bytes).expect("decode");
            assert_eq!(frame.command, 0x23);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; 256];
        assert_eq!(encode(0x23, &payload), Err(FrameError::PayloadTooLarge(256)));
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(0xF0, 0x02, &[0x10, 0x01]), 0x03);
    }

    #[test]
    fn test_single_byte_corruption_is_checksum_mismatch() {
        let bytes = encode(0x40, &[3, 1, 2, 0, 7, 30]).expect("encode");
        // opcode, length and every payload byte
        for idx in 3..bytes.len() - TRAILER_LEN {
            for flip in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = bytes.clone();
                corrupted[idx] ^= flip;
                match decode(&corrupted) {
                    Err(FrameError::ChecksumMismatch { .. }) => {}
                    other => panic!("byte {} flip {:#04x}: got {:?}", idx, flip, other),
                }
            }
        }
    }

    #[test]
    fn test_marker_errors() {
        let mut bytes = encode(0x11, &[]).expect("encode");
        bytes[0] = 0x00;
        assert_eq!(decode(&bytes), Err(FrameError::BadStartMarker));

        let mut bytes = encode(0x11, &[]).expect("encode");
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(decode(&bytes), Err(FrameError::BadEndMarker));
    }

    #[test]
    fn test_length_mismatch_with_valid_checksum() {
        // Appending a zero byte keeps the sum but breaks the declared length
        let mut bytes = encode(0x60, &[1, 25, 12]).expect("encode");
        bytes.insert(HEADER_LEN + 3, 0x00);
        assert_eq!(
            decode(&bytes),
            Err(FrameError::LengthMismatch { declared: 3, actual: 4 })
        );
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = [0x43, 0x53, 0x4F, 0x06];
        assert!(matches!(decode(&bytes), Err(FrameError::LengthMismatch { .. })));
    }

    #[test]
    fn test_scanner_skips_noise_and_splits_chunks() {
        let frame = encode(0x82, &[1, 2, 3, 4, 5]).expect("encode");
        let mut scanner = FrameScanner::new();
        scanner.push(&[0x00, 0x43, 0x99]);
        scanner.push(&frame[..4]);
        assert!(scanner.next_frame().is_none());
        scanner.push(&frame[4..]);
        let decoded = scanner.next_frame().expect("frame").expect("valid");
        assert_eq!(decoded.command, 0x82);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
        assert!(scanner.next_frame().is_none());
    }

    #[test]
    fn test_scanner_resyncs_after_bad_frame() {
        let mut bad = encode(0x82, &[9, 9, 9, 9, 9]).expect("encode");
        let idx = bad.len() - TRAILER_LEN;
        bad[idx] ^= 0x01;
        let good = encode(0x82, &[1, 0, 0, 0, 0]).expect("encode");

        let mut scanner = FrameScanner::new();
        scanner.push(&bad);
        scanner.push(&good);

        assert!(matches!(
            scanner.next_frame(),
            Some(Err(FrameError::ChecksumMismatch { .. }))
        ));
        let frame = scanner.next_frame().expect("frame").expect("valid");
        assert_eq!(frame.payload, vec![1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x43, 0x0a, 0xff]), "43 0A FF");
    }
}
