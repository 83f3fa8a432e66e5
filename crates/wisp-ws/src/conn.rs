//! Connection shell: one byte channel plus the codec state that frames it.
//!
//! A [`Connection`] is built once per accepted or dialed channel and owned by
//! exactly one thread for its whole life. It holds the channel, the role, the
//! masking-key source and the reassembly buffer; nothing in it is shared.
//!
//! | role   | `send`                              | `receive`              | `close`              |
//! |--------|-------------------------------------|------------------------|----------------------|
//! | Client | masked frame, any length tier       | unmasked frames        | `88 80` + mask key   |
//! | Server | reply path, unmasked, < 125 bytes   | masked frames only     | `88 00`              |

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use rand::rngs::ThreadRng;
use rand::CryptoRng;
use tracing::{debug, trace};

use crate::buffer::FrameBuffer;
use crate::config::ConnectionConfig;
use crate::error::{Result, WsError};
use crate::frame::{encode_reply, FrameEncoder, Opcode};
use crate::message::Message;

/// Which end of the connection this side plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// A connected duplex byte stream.
pub trait Channel: Read + Write {
    /// Close both directions of the channel.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Channel for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Per-connection state: the channel and the codec around it.
pub struct Connection<S, R = ThreadRng> {
    /// `None` once closed.
    stream: Option<S>,
    role: Role,
    encoder: FrameEncoder<R>,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
}

impl<S: Channel> Connection<S> {
    /// Connection with default limits, masking keys from the thread-local CSPRNG.
    pub fn new(stream: S, role: Role) -> Self {
        Self::with_config(stream, role, ConnectionConfig::default(), rand::rng())
    }
}

impl<S: Channel, R: CryptoRng> Connection<S, R> {
    /// Connection with default limits and an injected random source.
    pub fn with_rng(stream: S, role: Role, rng: R) -> Self {
        Self::with_config(stream, role, ConnectionConfig::default(), rng)
    }

    pub fn with_config(stream: S, role: Role, config: ConnectionConfig, rng: R) -> Self {
        Connection {
            stream: Some(stream),
            role,
            encoder: FrameEncoder::new(rng),
            buffer: FrameBuffer::new(role == Role::Server, config.max_payload_size),
            chunk: vec![0u8; config.read_buffer_size.max(1)],
        }
    }

    /// Queue bytes that were read off the channel before framing began, such
    /// as frame data that arrived in the same read as the handshake.
    pub fn prefill(&mut self, bytes: &[u8]) {
        self.buffer.push(bytes);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// The underlying channel, unless the connection is closed.
    pub fn get_ref(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    /// Frame `message` for this role and write it.
    ///
    /// On the server role a payload of 125 bytes or more fails with
    /// [`WsError::PayloadTooLarge`] before anything is written.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let bytes = match self.role {
            Role::Client => self.encoder.encode(message.opcode(), message.as_bytes()),
            Role::Server => encode_reply(message.opcode(), message.as_bytes())?,
        };
        let stream = self.stream.as_mut().ok_or_else(WsError::not_connected)?;
        stream.write_all(&bytes)?;
        stream.flush()?;
        trace!(role = ?self.role, len = message.len(), "sent frame");
        Ok(())
    }

    /// Read until one whole data frame is available and return its message.
    ///
    /// Each underlying read asks for at most `read_buffer_size` bytes; frames
    /// split across reads are reassembled. A close frame from the peer or EOF
    /// between frames is [`WsError::ConnectionClosed`]; EOF inside a frame is
    /// [`WsError::ShortFrame`].
    pub fn receive(&mut self) -> Result<Message> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                trace!(role = ?self.role, opcode = ?frame.opcode, len = frame.payload.len(), "received frame");
                return match Message::from_frame(frame) {
                    Some(message) => Ok(message),
                    None => {
                        debug!(role = ?self.role, "peer sent close frame");
                        Err(WsError::ConnectionClosed)
                    }
                };
            }

            let stream = self.stream.as_mut().ok_or_else(WsError::not_connected)?;
            let n = match stream.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if self.buffer.is_empty() {
                    return Err(WsError::ConnectionClosed);
                }
                return Err(WsError::ShortFrame {
                    len: self.buffer.len(),
                    min: self
                        .buffer
                        .pending_frame_len()
                        .unwrap_or(self.buffer.len() + 1),
                });
            }
            self.buffer.push(&self.chunk[..n]);
        }
    }

    /// Send a bare close frame, then shut the channel down.
    ///
    /// The shutdown happens even when writing the close frame fails; the
    /// write error is still returned. Closing twice fails with a
    /// `NotConnected` transport error and leaves the connection closed.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Err(WsError::not_connected());
        };
        let frame = match self.role {
            Role::Client => self.encoder.encode_close(),
            Role::Server => encode_reply(Opcode::Close, &[])?,
        };

        let written = stream.write_all(&frame).and_then(|()| stream.flush());
        let shut = stream.shutdown();
        debug!(role = ?self.role, "connection closed");

        written?;
        match shut {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode_masked, encode_masked};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;
    use std::rc::Rc;

    /// Observable side of a [`MemoryChannel`], still readable after the
    /// connection drops the channel.
    #[derive(Clone, Default)]
    struct Wire {
        written: Rc<RefCell<Vec<u8>>>,
        shutdowns: Rc<Cell<usize>>,
        largest_read: Rc<Cell<usize>>,
    }

    struct MemoryChannel {
        input: Cursor<Vec<u8>>,
        step: usize,
        fail_writes: bool,
        wire: Wire,
    }

    impl MemoryChannel {
        fn new(input: Vec<u8>) -> (Self, Wire) {
            let wire = Wire::default();
            let channel = MemoryChannel {
                input: Cursor::new(input),
                step: usize::MAX,
                fail_writes: false,
                wire: wire.clone(),
            };
            (channel, wire)
        }
    }

    impl Read for MemoryChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.wire
                .largest_read
                .set(self.wire.largest_read.get().max(buf.len()));
            let n = buf.len().min(self.step);
            self.input.read(&mut buf[..n])
        }
    }

    impl Write for MemoryChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.wire.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for MemoryChannel {
        fn shutdown(&mut self) -> io::Result<()> {
            self.wire.shutdowns.set(self.wire.shutdowns.get() + 1);
            Ok(())
        }
    }

    fn client(input: Vec<u8>) -> (Connection<MemoryChannel, StdRng>, Wire) {
        let (channel, wire) = MemoryChannel::new(input);
        (
            Connection::with_rng(channel, Role::Client, StdRng::seed_from_u64(11)),
            wire,
        )
    }

    fn server(input: Vec<u8>) -> (Connection<MemoryChannel, StdRng>, Wire) {
        let (channel, wire) = MemoryChannel::new(input);
        (
            Connection::with_rng(channel, Role::Server, StdRng::seed_from_u64(12)),
            wire,
        )
    }

    #[test]
    fn test_client_send_is_masked() {
        let (mut conn, wire) = client(Vec::new());
        conn.send(&Message::from("hello")).unwrap();
        let written = wire.written.borrow();
        assert_eq!(written[0], 0x81);
        assert_eq!(written[1], 0x80 | 5);
        let frame = decode_masked(&written).unwrap();
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn test_client_send_binary_uses_long_tier() {
        let (mut conn, wire) = client(Vec::new());
        let payload = vec![0x5Au8; 70000];
        conn.send(&Message::Binary(payload.clone())).unwrap();
        let written = wire.written.borrow();
        assert_eq!(written[0], 0x82);
        assert_eq!(written[1] & 0x7F, 127);
        assert_eq!(decode_masked(&written).unwrap().payload, payload);
    }

    #[test]
    fn test_server_reply_path() {
        let (mut conn, wire) = server(Vec::new());
        conn.send(&Message::from("Hello")).unwrap();
        assert_eq!(
            *wire.written.borrow(),
            vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']
        );
    }

    #[test]
    fn test_server_reply_too_large_writes_nothing() {
        let (mut conn, wire) = server(Vec::new());
        let result = conn.send(&Message::Text("x".repeat(125)));
        assert!(matches!(
            result,
            Err(WsError::PayloadTooLarge { len: 125, limit: 125 })
        ));
        assert!(wire.written.borrow().is_empty());
        assert!(!conn.is_closed());
    }

    #[test]
    fn test_server_receive_split_frames() {
        let mut input = encode_masked(Opcode::Text, b"first", [1, 2, 3, 4]);
        input.extend(encode_masked(Opcode::Binary, &[9u8; 300], [5, 6, 7, 8]));
        let (mut channel, _wire) = MemoryChannel::new(input);
        channel.step = 3;
        let mut conn = Connection::with_rng(channel, Role::Server, StdRng::seed_from_u64(1));

        assert_eq!(conn.receive().unwrap(), Message::Text("first".to_string()));
        assert_eq!(conn.receive().unwrap(), Message::Binary(vec![9u8; 300]));
        assert!(matches!(conn.receive(), Err(WsError::ConnectionClosed)));
    }

    #[test]
    fn test_reads_are_bounded_by_buffer_size() {
        let input = encode_masked(Opcode::Binary, &[1u8; 5000], [0; 4]);
        let (mut conn, wire) = server(input);
        assert_eq!(conn.receive().unwrap().len(), 5000);
        assert_eq!(wire.largest_read.get(), 1024);
    }

    #[test]
    fn test_server_rejects_unmasked() {
        let (mut conn, _wire) = server(encode_reply(Opcode::Text, b"hi").unwrap());
        assert!(matches!(conn.receive(), Err(WsError::UnmaskedFrame)));
    }

    #[test]
    fn test_client_receives_reply() {
        let (mut conn, _wire) = client(encode_reply(Opcode::Text, b"pong").unwrap());
        assert_eq!(conn.receive().unwrap(), Message::Text("pong".to_string()));
    }

    #[test]
    fn test_eof_inside_frame_is_short() {
        let wire_bytes = encode_masked(Opcode::Text, b"truncated", [0; 4]);
        let (mut conn, _wire) = server(wire_bytes[..8].to_vec());
        assert!(matches!(
            conn.receive(),
            Err(WsError::ShortFrame { len: 8, min: 15 })
        ));
    }

    #[test]
    fn test_close_frame_ends_receive() {
        let (mut conn, _wire) = server(vec![0x88, 0x80, 1, 2, 3, 4]);
        assert!(matches!(conn.receive(), Err(WsError::ConnectionClosed)));
    }

    #[test]
    fn test_prefill_is_decoded_first() {
        let (mut conn, _wire) = server(Vec::new());
        conn.prefill(&encode_masked(Opcode::Text, b"early", [3, 3, 3, 3]));
        assert_eq!(conn.receive().unwrap(), Message::Text("early".to_string()));
    }

    #[test]
    fn test_client_close_twice() {
        let (mut conn, wire) = client(Vec::new());
        assert!(conn.get_ref().is_some());
        conn.close().unwrap();
        assert!(conn.get_ref().is_none());
        {
            let written = wire.written.borrow();
            assert_eq!(written.len(), 6);
            assert_eq!(&written[..2], &[0x88, 0x80]);
        }
        assert_eq!(wire.shutdowns.get(), 1);
        assert!(conn.is_closed());

        match conn.close() {
            Err(WsError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::NotConnected),
            other => panic!("expected NotConnected transport error, got {:?}", other),
        }
        assert_eq!(wire.shutdowns.get(), 1);
        assert!(matches!(
            conn.send(&Message::from("late")),
            Err(WsError::Transport(_))
        ));
        assert!(matches!(conn.receive(), Err(WsError::Transport(_))));
    }

    #[test]
    fn test_server_close_is_unmasked() {
        let (mut conn, wire) = server(Vec::new());
        conn.close().unwrap();
        assert_eq!(*wire.written.borrow(), vec![0x88, 0x00]);
    }

    #[test]
    fn test_close_shuts_down_even_if_write_fails() {
        let (mut channel, wire) = MemoryChannel::new(Vec::new());
        channel.fail_writes = true;
        let mut conn = Connection::with_rng(channel, Role::Client, StdRng::seed_from_u64(5));
        assert!(matches!(conn.close(), Err(WsError::Transport(_))));
        assert_eq!(wire.shutdowns.get(), 1);
        assert!(conn.is_closed());
    }
}
