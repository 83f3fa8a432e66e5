//! Reassembly buffer for frames that arrive split across reads.
//!
//! Transport reads do not line up with frame boundaries: one read may carry
//! half a header, or the tail of one frame and the start of the next. The
//! buffer accumulates bytes and only yields a frame once the length field
//! says it is complete.
//!
//! - `WaitingForHeader`: need the opcode, length field and mask key
//! - `WaitingForPayload`: header parsed, need the rest of the payload

use bytes::{Buf, BytesMut};

use crate::error::{Result, WsError};
use crate::frame::{apply_mask, parse_header, Frame, FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE};

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForPayload(FrameHeader),
}

/// Accumulates raw bytes and extracts complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    require_mask: bool,
    max_payload: u64,
}

impl FrameBuffer {
    /// Buffer for the server role: every incoming frame must be masked.
    pub fn server() -> Self {
        Self::new(true, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Buffer for the client role: server frames arrive unmasked.
    pub fn client() -> Self {
        Self::new(false, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn new(require_mask: bool, max_payload: u64) -> Self {
        FrameBuffer {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::WaitingForHeader,
            require_mask,
            max_payload,
        }
    }

    /// Append bytes read from the channel.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes needed before the pending frame can complete, if known.
    pub fn pending_frame_len(&self) -> Option<usize> {
        match &self.state {
            State::WaitingForHeader => None,
            State::WaitingForPayload(header) => Some(header.frame_len()),
        }
    }

    /// Extract the next complete frame.
    ///
    /// Returns `Ok(None)` when more data is needed. Errors are terminal; the
    /// buffer should be dropped along with the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header = match self.state {
            State::WaitingForPayload(header) => header,
            State::WaitingForHeader => {
                if self.require_mask && self.buffer.len() >= 2 && self.buffer[1] & 0x80 == 0 {
                    return Err(WsError::UnmaskedFrame);
                }
                let Some(header) = parse_header(&self.buffer, self.max_payload)? else {
                    return Ok(None);
                };
                self.state = State::WaitingForPayload(header);
                header
            }
        };

        if self.buffer.len() < header.frame_len() {
            return Ok(None);
        }

        self.buffer.advance(header.header_len);
        let mut payload = self.buffer.split_to(header.payload_len as usize).to_vec();
        if let Some(key) = &header.mask_key {
            apply_mask(&mut payload, key);
        }
        self.state = State::WaitingForHeader;

        Ok(Some(Frame {
            opcode: header.opcode,
            mask_key: header.mask_key,
            payload,
        }))
    }
}
