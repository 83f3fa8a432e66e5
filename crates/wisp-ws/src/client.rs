//! Dialing side: TCP connect, upgrade request, verified `101` response.

use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};

use tracing::debug;

use crate::config::ConnectionConfig;
use crate::conn::{Connection, Role};
use crate::error::Result;
use crate::handshake::{
    build_upgrade_request, generate_key, read_response_head, verify_upgrade_response,
};

/// Largest `101` response head the client will read.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Connect to `addr`, upgrade `path`, and return a client-role connection.
///
/// `host` is sent as the `Host` header. Frame bytes that arrive in the same
/// read as the response head are kept for the first `receive`.
pub fn connect<A: ToSocketAddrs>(
    addr: A,
    host: &str,
    path: &str,
    config: ConnectionConfig,
) -> Result<Connection<TcpStream>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut rng = rand::rng();
    let key = generate_key(&mut rng);

    stream.write_all(build_upgrade_request(host, path, &key).as_bytes())?;
    stream.flush()?;

    let head = read_response_head(&mut stream, config.read_buffer_size, MAX_RESPONSE_HEAD)?;
    verify_upgrade_response(&head.head, &key)?;
    debug!(host, path, "WebSocket upgrade accepted");

    let mut conn = Connection::with_config(stream, Role::Client, config, rng);
    conn.prefill(&head.rest);
    Ok(conn)
}
