//! WebSocket frame codec (RFC 6455 Section 5.2-5.3).
//!
//! Frames are the smallest unit of WebSocket communication. This module holds
//! the leaf primitives (payload length tiers, XOR masking) and the two codec
//! roles built on them:
//!
//! - [`FrameEncoder`]: client role, every frame masked with a fresh key
//! - [`decode_masked`]: server role, one read in, one masked frame out
//! - [`encode_reply`]: the simplified unmasked server reply path
//!
//! Streams that split frames across reads go through
//! [`FrameBuffer`](crate::buffer::FrameBuffer) instead of [`decode_masked`].

use rand::{CryptoRng, Rng};

use crate::error::{Result, WsError};

/// FIN bit of the first header byte. Fragmentation is not supported, so
/// every frame written is final.
const FIN_BIT: u8 = 0x80;

/// MASK bit of the second header byte.
const MASK_BIT: u8 = 0x80;

/// Smallest masked frame the single-read decoder accepts:
/// 1 opcode byte + 1 length byte + 4 mask key bytes + at least 1 payload byte.
pub const MIN_MASKED_FRAME: usize = 7;

/// Payloads on the reply path must be strictly shorter than this.
pub const REPLY_PAYLOAD_LIMIT: usize = 125;

/// Default cap on a declared payload length, so a hostile 64-bit length
/// cannot make us allocate without bound.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// Frame opcodes handled by this codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
}

impl Opcode {
    /// Parse the low nibble of the first header byte.
    ///
    /// The FIN and RSV bits are not modeled and are ignored here.
    pub fn from_u8(byte: u8) -> Result<Opcode> {
        match byte & 0x0F {
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            other => Err(WsError::UnknownOpcode(other)),
        }
    }

    /// First header byte on the wire: `0x81`, `0x82` or `0x88`.
    pub fn header_byte(self) -> u8 {
        FIN_BIT | self as u8
    }
}

/// One of the three wire shapes of the payload length field.
///
/// The marker (low 7 bits of header byte 1) alone decides how many extended
/// length bytes follow; decoders never guess from the buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLen {
    /// Length below 126, stored inline in the marker.
    Short(u8),
    /// Marker 126 followed by a big-endian `u16`.
    Medium(u16),
    /// Marker 127 followed by a big-endian `u64`.
    Long(u64),
}

impl PayloadLen {
    /// Pick the narrowest tier that can carry `len`.
    pub fn for_len(len: u64) -> PayloadLen {
        if len < 126 {
            PayloadLen::Short(len as u8)
        } else if len < 65536 {
            PayloadLen::Medium(len as u16)
        } else {
            PayloadLen::Long(len)
        }
    }

    /// The 7-bit marker: the length itself, 126 or 127.
    pub fn marker(self) -> u8 {
        match self {
            PayloadLen::Short(n) => n,
            PayloadLen::Medium(_) => 126,
            PayloadLen::Long(_) => 127,
        }
    }

    /// The payload length this field describes.
    pub fn value(self) -> u64 {
        match self {
            PayloadLen::Short(n) => n as u64,
            PayloadLen::Medium(n) => n as u64,
            PayloadLen::Long(n) => n,
        }
    }

    /// Bytes written by [`write_to`](Self::write_to): marker plus extension.
    pub fn encoded_len(self) -> usize {
        1 + extension_len(self.marker())
    }

    /// Append the marker byte (with the mask bit if `masked`) and any
    /// extended length bytes.
    pub fn write_to(self, out: &mut Vec<u8>, masked: bool) {
        let mask = if masked { MASK_BIT } else { 0 };
        out.push(mask | self.marker());
        match self {
            PayloadLen::Short(_) => {}
            PayloadLen::Medium(n) => out.extend_from_slice(&n.to_be_bytes()),
            PayloadLen::Long(n) => out.extend_from_slice(&n.to_be_bytes()),
        }
    }

    /// Parse the length field from header byte 1 and the bytes after it.
    ///
    /// Returns the length and the number of extension bytes consumed from
    /// `rest`, or `Ok(None)` when `rest` is too short to hold the extension.
    pub fn parse(byte1: u8, rest: &[u8]) -> Result<Option<(PayloadLen, usize)>> {
        match byte1 & 0x7F {
            126 => {
                let Some(ext) = rest.get(..2) else {
                    return Ok(None);
                };
                let n = u16::from_be_bytes([ext[0], ext[1]]);
                Ok(Some((PayloadLen::Medium(n), 2)))
            }
            127 => {
                let Some(ext) = rest.get(..8) else {
                    return Ok(None);
                };
                let mut buf = [0u8; 8];
                buf.copy_from_slice(ext);
                let n = u64::from_be_bytes(buf);
                if n >> 63 != 0 {
                    return Err(WsError::InvalidLength);
                }
                Ok(Some((PayloadLen::Long(n), 8)))
            }
            n => Ok(Some((PayloadLen::Short(n), 0))),
        }
    }
}

/// Number of extended length bytes announced by a 7-bit marker.
fn extension_len(marker: u8) -> usize {
    match marker & 0x7F {
        126 => 2,
        127 => 8,
        _ => 0,
    }
}

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    /// Masking key as it appeared on the wire, `None` for unmasked frames.
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn masked(&self) -> bool {
        self.mask_key.is_some()
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Parsed frame header, everything before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub opcode: Opcode,
    pub mask_key: Option<[u8; 4]>,
    pub payload_len: u64,
    /// Opcode byte, length field and mask key.
    pub header_len: usize,
}

impl FrameHeader {
    /// Header plus payload.
    pub fn frame_len(&self) -> usize {
        self.header_len + self.payload_len as usize
    }
}

/// Parse a frame header from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed to finish the header.
pub(crate) fn parse_header(buf: &[u8], max_payload: u64) -> Result<Option<FrameHeader>> {
    let [byte0, byte1, rest @ ..] = buf else {
        return Ok(None);
    };
    let opcode = Opcode::from_u8(*byte0)?;
    let Some((len, ext)) = PayloadLen::parse(*byte1, rest)? else {
        return Ok(None);
    };

    let payload_len = len.value();
    if payload_len > max_payload {
        return Err(WsError::FrameTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }

    let mut header_len = 2 + ext;
    let mask_key = if byte1 & MASK_BIT != 0 {
        let Some(key) = buf.get(header_len..header_len + 4) else {
            return Ok(None);
        };
        header_len += 4;
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    Ok(Some(FrameHeader {
        opcode,
        mask_key,
        payload_len,
        header_len,
    }))
}

/// Apply or remove the 4-byte XOR mask on a payload.
///
/// Byte `i` is XORed with `mask_key[i % 4]`; applying the mask twice returns
/// the original bytes. Per RFC 6455 Section 5.3.
pub fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Encode one masked frame with the given key.
///
/// Output is opcode byte, length field with the mask bit set, mask key, then
/// the masked payload. Deterministic for a fixed key.
pub fn encode_masked(opcode: Opcode, payload: &[u8], mask_key: [u8; 4]) -> Vec<u8> {
    let len = PayloadLen::for_len(payload.len() as u64);
    let mut out = Vec::with_capacity(1 + len.encoded_len() + 4 + payload.len());
    out.push(opcode.header_byte());
    len.write_to(&mut out, true);
    out.extend_from_slice(&mask_key);
    let start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[start..], &mask_key);
    out
}

/// Encode a frame on the simplified server reply path.
///
/// Two-byte header, no mask, no extended length: payloads of
/// [`REPLY_PAYLOAD_LIMIT`] bytes or more are refused with
/// [`WsError::PayloadTooLarge`] and nothing is produced.
pub fn encode_reply(opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() >= REPLY_PAYLOAD_LIMIT {
        return Err(WsError::PayloadTooLarge {
            len: payload.len(),
            limit: REPLY_PAYLOAD_LIMIT,
        });
    }
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(opcode.header_byte());
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Client-role encoder: masks every frame with a fresh key drawn from `R`.
///
/// The random source is injected so tests can use a seeded generator; in
/// production it is `rand::rngs::ThreadRng`, an OS-seeded CSPRNG.
#[derive(Debug)]
pub struct FrameEncoder<R> {
    rng: R,
}

impl<R: CryptoRng> FrameEncoder<R> {
    pub fn new(rng: R) -> Self {
        FrameEncoder { rng }
    }

    /// Draw a new masking key. Keys are never reused across frames.
    pub fn next_mask_key(&mut self) -> [u8; 4] {
        self.rng.random()
    }

    /// Encode `payload` as one masked frame.
    pub fn encode(&mut self, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let key = self.next_mask_key();
        encode_masked(opcode, payload, key)
    }

    /// Bare masked close frame: `0x88 0x80` followed by a fresh key.
    pub fn encode_close(&mut self) -> Vec<u8> {
        self.encode(Opcode::Close, &[])
    }
}

/// Decode one masked frame from a single read (server role).
///
/// See [`decode_masked_with_limit`].
pub fn decode_masked(raw: &[u8]) -> Result<Frame> {
    decode_masked_with_limit(raw, DEFAULT_MAX_PAYLOAD_SIZE)
}

/// Decode one masked frame from a single read, capping the payload length.
///
/// The read must hold the whole frame. Fails with [`WsError::ShortFrame`]
/// when it is under [`MIN_MASKED_FRAME`] bytes or shorter than the declared
/// frame, and with [`WsError::UnmaskedFrame`] when the mask bit is clear
/// (checked first, so it wins regardless of length). All three length tiers
/// are decoded. Bytes past the declared frame are ignored.
pub fn decode_masked_with_limit(raw: &[u8], max_payload: u64) -> Result<Frame> {
    let short = |min: usize| WsError::ShortFrame {
        len: raw.len(),
        min,
    };

    if raw.len() < 2 {
        return Err(short(MIN_MASKED_FRAME));
    }
    if raw[1] & MASK_BIT == 0 {
        return Err(WsError::UnmaskedFrame);
    }
    if raw.len() < MIN_MASKED_FRAME {
        return Err(short(MIN_MASKED_FRAME));
    }

    let Some(header) = parse_header(raw, max_payload)? else {
        return Err(short(2 + extension_len(raw[1]) + 4));
    };
    let end = header.frame_len();
    if raw.len() < end {
        return Err(short(end));
    }

    let mut payload = raw[header.header_len..end].to_vec();
    if let Some(key) = &header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        opcode: header.opcode,
        mask_key: header.mask_key,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mask_roundtrip() {
        let original = b"Hello".to_vec();
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut masked = original.clone();
        apply_mask(&mut masked, &key);
        assert_ne!(masked, original, "masked should differ from original");
        apply_mask(&mut masked, &key);
        assert_eq!(masked, original, "unmasked should equal original");
    }

    #[test]
    fn test_length_tiers() {
        assert_eq!(PayloadLen::for_len(0), PayloadLen::Short(0));
        assert_eq!(PayloadLen::for_len(125), PayloadLen::Short(125));
        assert_eq!(PayloadLen::for_len(126), PayloadLen::Medium(126));
        assert_eq!(PayloadLen::for_len(65535), PayloadLen::Medium(65535));
        assert_eq!(PayloadLen::for_len(65536), PayloadLen::Long(65536));
        assert_eq!(PayloadLen::Medium(300).marker(), 126);
        assert_eq!(PayloadLen::Long(70000).encoded_len(), 9);
    }

    #[test]
    fn test_parse_length_needs_extension_bytes() {
        assert_eq!(PayloadLen::parse(0xFE, &[0x01]).unwrap(), None);
        assert_eq!(
            PayloadLen::parse(0xFE, &[0x01, 0x00]).unwrap(),
            Some((PayloadLen::Medium(256), 2))
        );
        assert_eq!(PayloadLen::parse(0xFF, &[0; 7]).unwrap(), None);
    }

    #[test]
    fn test_parse_length_rejects_msb() {
        let mut ext = [0u8; 8];
        ext[0] = 0x80;
        assert!(matches!(
            PayloadLen::parse(0xFF, &ext),
            Err(WsError::InvalidLength)
        ));
    }

    #[test]
    fn test_encode_small_text_frame() {
        let key = [0, 0, 0, 0];
        let buf = encode_masked(Opcode::Text, b"Hi", key);
        assert_eq!(buf, vec![0x81, 0x82, 0, 0, 0, 0, b'H', b'i']);
    }

    #[test]
    fn test_encode_empty_payload_keeps_length_byte() {
        let buf = encode_masked(Opcode::Binary, b"", [1, 2, 3, 4]);
        assert_eq!(buf, vec![0x82, 0x80, 1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_medium_frame() {
        let payload = vec![0x42u8; 200];
        let buf = encode_masked(Opcode::Binary, &payload, [9, 8, 7, 6]);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1], 0x80 | 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 200);
        assert_eq!(&buf[4..8], &[9, 8, 7, 6]);
        assert_eq!(buf.len(), 8 + 200);
    }

    #[test]
    fn test_encode_long_frame() {
        let payload = vec![0x11u8; 70000];
        let buf = encode_masked(Opcode::Binary, &payload, [1, 1, 1, 1]);
        assert_eq!(buf[1], 0x80 | 127);
        let mut len = [0u8; 8];
        len.copy_from_slice(&buf[2..10]);
        assert_eq!(u64::from_be_bytes(len), 70000);
        assert_eq!(buf.len(), 14 + 70000);
    }

    #[test]
    fn test_decode_roundtrip_all_tiers() {
        let mut encoder = FrameEncoder::new(StdRng::seed_from_u64(7));
        for len in [1usize, 125, 200, 70000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let wire = encoder.encode(Opcode::Binary, &payload);
            let frame = decode_masked_with_limit(&wire, u64::MAX >> 1).unwrap();
            assert_eq!(frame.opcode, Opcode::Binary);
            assert!(frame.masked());
            assert_eq!(frame.payload_len(), len as u64);
            assert_eq!(frame.payload, payload, "length {}", len);
        }
    }

    #[test]
    fn test_fresh_key_per_frame() {
        let mut encoder = FrameEncoder::new(StdRng::seed_from_u64(42));
        let a = encoder.encode(Opcode::Text, b"same payload");
        let b = encoder.encode(Opcode::Text, b"same payload");
        assert_ne!(a, b, "two encodings should use different masking keys");
        assert_eq!(decode_masked(&a).unwrap().payload, b"same payload");
        assert_eq!(decode_masked(&b).unwrap().payload, b"same payload");
    }

    #[test]
    fn test_encode_close() {
        let mut encoder = FrameEncoder::new(StdRng::seed_from_u64(1));
        let buf = encoder.encode_close();
        assert_eq!(buf.len(), 6);
        assert_eq!(&buf[..2], &[0x88, 0x80]);
    }

    #[test]
    fn test_decode_six_bytes_is_short() {
        let raw = [0x81, 0x80, 1, 2, 3, 4];
        assert!(matches!(
            decode_masked(&raw),
            Err(WsError::ShortFrame { len: 6, min: 7 })
        ));
    }

    #[test]
    fn test_decode_unmasked_rejected_regardless_of_length() {
        assert!(matches!(
            decode_masked(&[0x81, 0x02]),
            Err(WsError::UnmaskedFrame)
        ));
        let mut long = vec![0x81, 0x05];
        long.extend_from_slice(b"Hello");
        assert!(matches!(decode_masked(&long), Err(WsError::UnmaskedFrame)));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let wire = encode_masked(Opcode::Text, b"Hello, world", [5, 6, 7, 8]);
        let result = decode_masked(&wire[..10]);
        assert!(matches!(
            result,
            Err(WsError::ShortFrame { len: 10, min: 18 })
        ));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let raw = [0x89, 0x81, 0, 0, 0, 0, b'x'];
        assert!(matches!(
            decode_masked(&raw),
            Err(WsError::UnknownOpcode(0x9))
        ));
    }

    #[test]
    fn test_decode_respects_payload_cap() {
        let wire = encode_masked(Opcode::Binary, &[0u8; 300], [0; 4]);
        assert!(matches!(
            decode_masked_with_limit(&wire, 256),
            Err(WsError::FrameTooLarge { len: 300, max: 256 })
        ));
    }

    #[test]
    fn test_reply_small_frame() {
        let buf = encode_reply(Opcode::Text, b"Hello").unwrap();
        assert_eq!(buf, vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_reply_limit() {
        assert!(encode_reply(Opcode::Text, &[b'a'; 124]).is_ok());
        assert!(matches!(
            encode_reply(Opcode::Text, &[b'a'; 125]),
            Err(WsError::PayloadTooLarge { len: 125, limit: 125 })
        ));
    }
}
