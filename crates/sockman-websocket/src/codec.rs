//! RFC 6455 frame encoding and decoding.
//!
//! Wire format of one frame:
//! ```text
//! byte 0      : FIN(1) RSV(3) opcode(4)
//! byte 1      : MASK(1) length code(7)
//! [2 | 8 B]   : extended length, big-endian (code 126 → 16 bit, 127 → 64 bit)
//! [4 B]       : masking key, present when MASK is set
//! payload     : length bytes, XOR-masked with the key when MASK is set
//! ```
//!
//! The receive path in [`crate::units`] reads a frame piece by piece across
//! reactor ticks using [`FrameHead`] and [`decode_extended_length`].
//! [`decode_frame`] decodes a complete frame from one buffer and exists for
//! tests and benchmarks.

use thiserror::Error;

/// FIN bit of the first header byte.
pub const FIN: u8 = 0x80;
/// RSV1..RSV3 bits of the first header byte.
pub const RSV_MASK: u8 = 0x70;
/// Opcode bits of the first header byte.
pub const OPCODE_MASK: u8 = 0x0f;
/// MASK bit of the second header byte.
pub const MASK_BIT: u8 = 0x80;
/// Length-code bits of the second header byte.
pub const LENGTH_MASK: u8 = 0x7f;
/// Length code announcing a 16-bit extended length.
pub const LENGTH_CODE_16: u8 = 126;
/// Length code announcing a 64-bit extended length.
pub const LENGTH_CODE_64: u8 = 127;
/// Largest payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;
/// Default upper bound of one message payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Errors raised while decoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// Not enough bytes for the part being decoded.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// Opcode outside the set defined by RFC 6455.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// RSV bits set without a negotiated extension.
    #[error("reserved bits set in header byte 0x{0:02X}")]
    ReservedBits(u8),

    /// The MASK bit disagrees with the side that sent the frame.
    #[error("mask bit is {found} but the {role:?} role expects {expected}")]
    MaskMismatch {
        role: MaskingRole,
        expected: bool,
        found: bool,
    },

    /// The announced payload exceeds the configured maximum.
    #[error("payload of {length} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { length: u64, max: u64 },

    /// A control frame was fragmented or longer than 125 bytes.
    #[error("invalid control frame: {0}")]
    InvalidControlFrame(&'static str),

    /// A continuation frame arrived with no fragmented message in progress.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// A new data frame arrived in the middle of a fragmented message.
    #[error("data frame interleaved with a fragmented message")]
    InterleavedMessage,
}

// ── Opcode ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// # Errors
    ///
    /// [`FrameError::UnknownOpcode`] for reserved opcodes.
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

// ── Masking ───────────────────────────────────────────────────────────────────

/// Which end of the connection a protocol definition plays.
///
/// Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskingRole {
    Server,
    Client,
}

impl MaskingRole {
    pub fn masks_outbound(self) -> bool {
        self == MaskingRole::Client
    }

    pub fn expects_masked_inbound(self) -> bool {
        self == MaskingRole::Server
    }

    /// A fresh random key when this role masks, `None` otherwise.
    pub fn outbound_key(self) -> Option<[u8; 4]> {
        self.masks_outbound().then(rand::random::<[u8; 4]>)
    }
}

/// XORs `data` in place with the repeating 4-byte `key`.
///
/// Applying the same key twice restores the input.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Builds one FIN frame.  When `mask` is given the MASK bit is set, the key
/// follows the length and the payload is masked with it.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut buf = Vec::with_capacity(14 + len);
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };

    buf.push(FIN | opcode as u8);
    if len <= MAX_CONTROL_PAYLOAD {
        buf.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(mask_bit | LENGTH_CODE_16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | LENGTH_CODE_64);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(payload),
    }
    buf
}

/// Payload of a close frame: big-endian status code followed by the reason.
pub fn close_payload(code: u16, reason: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason);
    payload
}

/// Status code of a close-frame payload, if it carries one.
pub fn close_code(payload: &[u8]) -> Option<u16> {
    match payload {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// The first two header bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    /// The 7-bit length field: the length itself, or 126 / 127.
    pub length_code: u8,
}

impl FrameHead {
    /// Parses and validates the two header bytes for a receiver playing `role`.
    ///
    /// # Errors
    ///
    /// [`FrameError::ReservedBits`], [`FrameError::UnknownOpcode`],
    /// [`FrameError::MaskMismatch`] or [`FrameError::InvalidControlFrame`].
    pub fn parse(bytes: [u8; 2], role: MaskingRole) -> Result<Self, FrameError> {
        if bytes[0] & RSV_MASK != 0 {
            return Err(FrameError::ReservedBits(bytes[0]));
        }
        let head = Self {
            fin: bytes[0] & FIN != 0,
            opcode: Opcode::from_u8(bytes[0] & OPCODE_MASK)?,
            masked: bytes[1] & MASK_BIT != 0,
            length_code: bytes[1] & LENGTH_MASK,
        };

        let expected = role.expects_masked_inbound();
        if head.masked != expected {
            return Err(FrameError::MaskMismatch {
                role,
                expected,
                found: head.masked,
            });
        }
        if head.opcode.is_control() {
            if !head.fin {
                return Err(FrameError::InvalidControlFrame("fragmented"));
            }
            if usize::from(head.length_code) > MAX_CONTROL_PAYLOAD {
                return Err(FrameError::InvalidControlFrame("payload longer than 125 bytes"));
            }
        }
        Ok(head)
    }

    /// Size of the extended length field that follows: 0, 2 or 8.
    pub fn extended_length_size(&self) -> usize {
        match self.length_code {
            LENGTH_CODE_16 => 2,
            LENGTH_CODE_64 => 8,
            _ => 0,
        }
    }
}

/// Decodes a 2- or 8-byte big-endian extended length.
///
/// # Errors
///
/// [`FrameError::InsufficientData`] for any other slice size.
pub fn decode_extended_length(bytes: &[u8]) -> Result<u64, FrameError> {
    match bytes.len() {
        2 => Ok(u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))),
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(u64::from_be_bytes(raw))
        }
        n => Err(FrameError::InsufficientData {
            needed: if n < 2 { 2 } else { 8 },
            available: n,
        }),
    }
}

/// Rejects `length` above `max`.
///
/// # Errors
///
/// [`FrameError::PayloadTooLarge`].
pub fn check_length(length: u64, max: u64) -> Result<(), FrameError> {
    if length > max {
        return Err(FrameError::PayloadTooLarge { length, max });
    }
    Ok(())
}

/// A completely decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

/// Decodes one frame from the start of `bytes`.
///
/// Returns the frame and the number of bytes consumed.
///
/// # Errors
///
/// [`FrameError::InsufficientData`] when `bytes` holds less than one frame,
/// otherwise the validation errors of [`FrameHead::parse`] and
/// [`check_length`].
pub fn decode_frame(bytes: &[u8], role: MaskingRole, max_payload: u64) -> Result<(Frame, usize), FrameError> {
    let need = |needed: usize| FrameError::InsufficientData {
        needed,
        available: bytes.len(),
    };
    if bytes.len() < 2 {
        return Err(need(2));
    }
    let head = FrameHead::parse([bytes[0], bytes[1]], role)?;
    let mut pos = 2;

    let ext = head.extended_length_size();
    let length = if ext == 0 {
        u64::from(head.length_code)
    } else {
        let field = bytes.get(pos..pos + ext).ok_or_else(|| need(pos + ext))?;
        pos += ext;
        decode_extended_length(field)?
    };
    check_length(length, max_payload)?;

    let key = if head.masked {
        let field = bytes.get(pos..pos + 4).ok_or_else(|| need(pos + 4))?;
        pos += 4;
        Some([field[0], field[1], field[2], field[3]])
    } else {
        None
    };

    let length = usize::try_from(length).map_err(|_| FrameError::PayloadTooLarge {
        length,
        max: max_payload,
    })?;
    let mut payload = bytes
        .get(pos..pos + length)
        .ok_or_else(|| need(pos + length))?
        .to_vec();
    if let Some(key) = key {
        apply_mask(&mut payload, key);
    }

    Ok((
        Frame {
            fin: head.fin,
            opcode: head.opcode,
            payload,
        },
        pos + length,
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[test]
    fn test_length_classes_follow_thresholds() {
        // Arrange / Act
        let short = encode_frame(Opcode::Text, &[0u8; 125], None);
        let medium_low = encode_frame(Opcode::Text, &[0u8; 126], None);
        let medium_high = encode_frame(Opcode::Text, &vec![0u8; 65_535], None);
        let long = encode_frame(Opcode::Text, &vec![0u8; 65_536], None);

        // Assert
        assert_eq!(short[1], 125);
        assert_eq!(short.len(), 2 + 125);
        assert_eq!(medium_low[1], LENGTH_CODE_16);
        assert_eq!(&medium_low[2..4], &126u16.to_be_bytes());
        assert_eq!(medium_high[1], LENGTH_CODE_16);
        assert_eq!(&medium_high[2..4], &[0xff, 0xff]);
        assert_eq!(long[1], LENGTH_CODE_64);
        assert_eq!(&long[2..10], &65_536u64.to_be_bytes());
    }

    #[test]
    fn test_server_text_frame_matches_rfc_example() {
        // RFC 6455 §5.7: unmasked "Hello".
        let frame = encode_frame(Opcode::Text, b"Hello", None);
        assert_eq!(frame, vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]);
    }

    #[test]
    fn test_client_text_frame_matches_rfc_example() {
        // RFC 6455 §5.7: masked "Hello".
        let frame = encode_frame(Opcode::Text, b"Hello", Some(KEY));
        assert_eq!(
            frame,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_mask_is_its_own_inverse() {
        let original = b"the quick brown fox".to_vec();
        let mut data = original.clone();

        apply_mask(&mut data, KEY);
        assert_ne!(data, original);
        apply_mask(&mut data, KEY);

        assert_eq!(data, original);
    }

    #[test]
    fn test_client_frames_always_carry_mask_bit() {
        let key = MaskingRole::Client.outbound_key();
        let frame = encode_frame(Opcode::Ping, b"", key);
        assert_eq!(frame[1] & MASK_BIT, MASK_BIT);
        assert!(MaskingRole::Server.outbound_key().is_none());
    }

    #[test]
    fn test_decode_masked_frame_as_server() {
        let wire = encode_frame(Opcode::Text, b"Hello", Some(KEY));

        let (frame, used) = decode_frame(&wire, MaskingRole::Server, DEFAULT_MAX_PAYLOAD).unwrap();

        assert_eq!(frame.payload, b"Hello");
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.fin);
        assert_eq!(used, wire.len());
    }

    #[test]
    fn test_decode_64_bit_length() {
        let payload = vec![7u8; 70_000];
        let wire = encode_frame(Opcode::Binary, &payload, None);

        let (frame, used) = decode_frame(&wire, MaskingRole::Client, DEFAULT_MAX_PAYLOAD).unwrap();

        assert_eq!(frame.payload.len(), 70_000);
        assert_eq!(used, 2 + 8 + 70_000);
    }

    #[test]
    fn test_unmasked_frame_rejected_by_server() {
        let wire = encode_frame(Opcode::Text, b"x", None);

        let result = decode_frame(&wire, MaskingRole::Server, DEFAULT_MAX_PAYLOAD);

        assert_eq!(
            result,
            Err(FrameError::MaskMismatch {
                role: MaskingRole::Server,
                expected: true,
                found: false
            })
        );
    }

    #[test]
    fn test_payload_above_limit_rejected() {
        let wire = encode_frame(Opcode::Text, &[0u8; 200], None);

        let result = decode_frame(&wire, MaskingRole::Client, 100);

        assert_eq!(result, Err(FrameError::PayloadTooLarge { length: 200, max: 100 }));
    }

    #[test]
    fn test_truncated_frame_reports_missing_bytes() {
        let wire = encode_frame(Opcode::Text, b"Hello", None);

        let result = decode_frame(&wire[..4], MaskingRole::Client, DEFAULT_MAX_PAYLOAD);

        assert_eq!(
            result,
            Err(FrameError::InsufficientData {
                needed: 7,
                available: 4
            })
        );
    }

    #[test]
    fn test_head_rejects_reserved_bits_and_long_pings() {
        assert_eq!(
            FrameHead::parse([0xC1, 0x00], MaskingRole::Client),
            Err(FrameError::ReservedBits(0xC1))
        );
        assert!(matches!(
            FrameHead::parse([0x89, LENGTH_CODE_16], MaskingRole::Client),
            Err(FrameError::InvalidControlFrame(_))
        ));
        assert!(matches!(
            FrameHead::parse([0x09, 0x00], MaskingRole::Client),
            Err(FrameError::InvalidControlFrame(_))
        ));
    }

    #[test]
    fn test_close_payload_round_trips_code() {
        let payload = close_payload(1000, b"bye");
        assert_eq!(close_code(&payload), Some(1000));
        assert_eq!(&payload[2..], b"bye");
        assert_eq!(close_code(&[0x03]), None);
    }

    #[test]
    fn test_extended_length_rejects_odd_sizes() {
        assert_eq!(decode_extended_length(&[0x01, 0x00]), Ok(256));
        assert!(decode_extended_length(&[0x01, 0x00, 0x00]).is_err());
    }
}
