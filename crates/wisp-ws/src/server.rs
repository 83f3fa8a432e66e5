//! Blocking WebSocket server: thread-per-connection.
//!
//! ```text
//! TcpListener (accept loop on calling thread)
//!     |
//!     v  spawn thread per connection
//! serve_connection
//!     |
//!     +-- read_http_head + HandshakeResponder (HTTP -> WebSocket)
//!     +-- Connection (server role), prefilled with bytes read past the head
//!     +-- loop: receive -> Handler::on_message -> send
//!     +-- close on any error
//! ```
//!
//! Connection threads share nothing but the read-only handler and config.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::config::ServerConfig;
use crate::conn::{Connection, Role};
use crate::error::{Result, WsError};
use crate::handshake::{read_http_head, HandshakeOutcome, HandshakeResponder};
use crate::message::Message;

/// Application callback invoked for every message a client sends.
pub trait Handler: Send + Sync + 'static {
    /// Handle one message; a returned message is sent back on the same
    /// connection.
    fn on_message(&self, peer: SocketAddr, message: Message) -> Option<Message>;
}

impl<F> Handler for F
where
    F: Fn(SocketAddr, Message) -> Option<Message> + Send + Sync + 'static,
{
    fn on_message(&self, peer: SocketAddr, message: Message) -> Option<Message> {
        self(peer, message)
    }
}

/// Logs every message and sends it straight back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn on_message(&self, peer: SocketAddr, message: Message) -> Option<Message> {
        match &message {
            Message::Text(text) => info!(%peer, "received text: {}", text),
            Message::Binary(data) => info!(%peer, len = data.len(), "received binary"),
        }
        Some(message)
    }
}

/// A bound listener plus the configuration every connection runs with.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Validate `config` and bind its address.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.address();
        let listener = TcpListener::bind(&addr)?;
        info!(addr = %listener.local_addr()?, "WebSocket server listening");
        Ok(Server {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one thread each.
    ///
    /// Accept errors are logged and skipped. Only returns if the listener
    /// stops yielding connections.
    pub fn run<H: Handler>(self, handler: H) -> Result<()> {
        let handler = Arc::new(handler);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("accept error: {}", e);
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("peer address unavailable: {}", e);
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            let handler = Arc::clone(&handler);
            let spawned = std::thread::Builder::new()
                .name(format!("ws-{}", peer))
                .spawn(move || {
                    let _span = info_span!("conn", %peer).entered();
                    match serve_connection(stream, peer, &config, handler.as_ref()) {
                        Ok(()) | Err(WsError::ConnectionClosed) => debug!("connection finished"),
                        Err(e) => warn!("connection terminated: {}", e),
                    }
                });
            if let Err(e) = spawned {
                warn!(%peer, "failed to spawn connection thread: {}", e);
            }
        }
        Ok(())
    }
}

/// Drive one accepted connection from handshake to teardown.
///
/// Non-HTTP input gets no response and the connection is dropped. Any error
/// after the upgrade closes the connection and is returned.
pub fn serve_connection<H: Handler + ?Sized>(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    handler: &H,
) -> Result<()> {
    info!("accepted connection");
    let head = read_http_head(&mut stream, config.read_buffer_size, config.max_handshake_size)?;
    let responder = HandshakeResponder::new(config.missing_key);
    match responder.respond(&head.head, &mut stream)? {
        HandshakeOutcome::NotHttp => {
            debug!("no upgrade request, dropping connection");
            return Ok(());
        }
        HandshakeOutcome::Upgraded { .. } => debug!("upgraded to WebSocket"),
    }

    let mut conn = Connection::with_config(stream, Role::Server, config.connection(), rand::rng());
    conn.prefill(&head.rest);

    let result = message_loop(&mut conn, peer, handler);
    if !conn.is_closed() {
        if let Err(e) = conn.close() {
            debug!("close after error failed: {}", e);
        }
    }
    result
}

fn message_loop<H: Handler + ?Sized>(
    conn: &mut Connection<TcpStream>,
    peer: SocketAddr,
    handler: &H,
) -> Result<()> {
    loop {
        let message = conn.receive()?;
        if let Some(reply) = handler.on_message(peer, message) {
            conn.send(&reply)?;
        }
    }
}
