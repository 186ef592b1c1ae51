mod socket;
mod tls;

use bytes::{Bytes, BytesMut};
use rustls::ClientConnection;
use tracing::debug;

use crate::pgrelay::cluster::BackendEndpoint;
use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::config::TlsMode;

pub(crate) use socket::RawSocket;

/// A connected backend socket, plaintext or TLS-wrapped. Everything above
/// this layer (startup, auth, version probe) talks to a `Connection`
/// without caring which.
pub struct Connection {
    socket: RawSocket,
    tls: Option<ClientConnection>,
}

impl Connection {
    /// Open the raw socket and, if `mode` requires or prefers it, negotiate
    /// TLS before returning. `Required` fails the connection if the backend
    /// declines; `Prefer` falls back to plaintext silently; `Disabled` never
    /// attempts it.
    pub async fn establish(endpoint: &BackendEndpoint, mode: TlsMode, retry: bool) -> Result<Self> {
        let socket = RawSocket::connect(endpoint, retry).await?;

        let tls = match mode {
            TlsMode::Disabled | TlsMode::Invalid => None,
            TlsMode::Prefer => match tls::negotiate(&socket, tls::client_config(), &endpoint.host).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    debug!(error = %e, "TLS preferred but not established, continuing in plaintext");
                    None
                }
            },
            TlsMode::Required => Some(tls::negotiate(&socket, tls::client_config(), &endpoint.host).await?),
        };

        Ok(Connection { socket, tls })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.tls {
            Some(conn) => tls::write_all(&self.socket, conn, buf).await,
            None => write_all_plain(&self.socket, buf).await,
        }
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.tls {
            Some(conn) => tls::read_some(&self.socket, conn, buf).await,
            None => read_some_plain(&self.socket, buf).await,
        }
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::connect("connection closed while reading"));
            }
            filled += n;
        }
        Ok(())
    }

    /// Read one backend message: a 1-byte tag, a 4-byte length (inclusive of
    /// itself), and the remaining body. Used by the auth handshake and the
    /// version probe, neither of which need a full streaming message parser.
    pub async fn read_message(&mut self) -> Result<(crate::pgrelay::protocol::tag::Tag, Bytes)> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header).await?;
        let tag = crate::pgrelay::protocol::tag::Tag(header[0]);
        let length = u32::from_be_bytes(header[1..5].try_into().unwrap());
        let body_len = length.saturating_sub(4) as usize;
        let mut body = BytesMut::zeroed(body_len);
        self.read_exact(&mut body).await?;
        Ok((tag, body.freeze()))
    }

    /// A single non-blocking write attempt, made from `Drop` where there is
    /// no executor to await on. Whatever doesn't fit in the socket buffer
    /// right now is simply lost -- acceptable for a courtesy terminate
    /// message on a socket that's being closed regardless.
    pub(crate) fn try_send_terminate_best_effort(&mut self) {
        let plaintext = crate::pgrelay::protocol::build_terminate();
        let wire: Vec<u8> = match &mut self.tls {
            Some(conn) => {
                use std::io::Write;
                if conn.writer().write_all(&plaintext).is_err() {
                    return;
                }
                let mut out = Vec::new();
                if conn.write_tls(&mut out).is_err() {
                    return;
                }
                out
            }
            None => plaintext.to_vec(),
        };
        let _ = self.socket.try_write(&wire);
    }
}

async fn write_all_plain(socket: &RawSocket, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        socket.writable().await?;
        match socket.try_write(buf) {
            Ok(0) => return Err(Error::connect("connection closed during write")),
            Ok(n) => buf = &buf[n..],
            Err(e) if would_block(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn read_some_plain(socket: &RawSocket, buf: &mut [u8]) -> Result<usize> {
    loop {
        socket.readable().await?;
        match socket.try_read(buf) {
            Err(e) if would_block(&e) => continue,
            other => return other,
        }
    }
}

fn would_block(err: &Error) -> bool {
    matches!(err.kind(), crate::pgrelay::common::ErrorKind::IOError(e) if e.kind() == std::io::ErrorKind::WouldBlock)
}

pub use tls::client_config;
