//! WebSocket protocol layer (RFC 6455).
//!
//! Provides the low-level WebSocket wire protocol over any blocking byte
//! channel:
//! - **Frame codec** (`frame`): payload length tiers, XOR masking, the
//!   client-role encoder and the server-role decoder
//! - **Reassembly** (`buffer`): frames split across arbitrary reads
//! - **Handshake** (`handshake`): HTTP upgrade and `Sec-WebSocket-Accept`
//! - **Connection shell** (`conn`): `send` / `receive` / `close` per role
//!
//! plus a thread-per-connection [`Server`] and a [`connect`] helper that
//! wrap them around `std::net` sockets.

pub mod buffer;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod server;

pub use buffer::FrameBuffer;
pub use client::connect;
pub use config::{ConnectionConfig, MissingKeyPolicy, ServerConfig};
pub use conn::{Channel, Connection, Role};
pub use error::{Result, WsError};
pub use frame::{
    apply_mask, decode_masked, encode_masked, encode_reply, Frame, FrameEncoder, Opcode,
    PayloadLen,
};
pub use handshake::{compute_accept_key, HandshakeOutcome, HandshakeResponder};
pub use message::Message;
pub use server::{serve_connection, Echo, Handler, Server};
