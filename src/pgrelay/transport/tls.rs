use std::io::{Read, Write};
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName};
use tracing::debug;

use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::transport::socket::RawSocket;

/// Builds the `rustls::ClientConfig` used for every backend TLS negotiation.
/// One config is shared process-wide (rustls configs are immutable once
/// built and cheap to clone via `Arc`), mirroring how the teacher's
/// `server::transport` keeps a single `Arc<ServerConfig>` for the listener
/// side.
pub fn client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

/// Drives rustls's synchronous `Connection` state machine to completion over
/// an async `RawSocket`, pumping ciphertext in and out with `try_read`/
/// `try_write` guarded by `readable()`/`writable()` rather than blocking a
/// worker thread. `ClientConnection` itself has no async API, so something
/// has to bridge the two; this is the minimal version of what the teacher's
/// `StreamReaderWriter` does with raw fd duplication, built for the
/// one-shot handshake this core needs instead of a long-lived duplex stream.
async fn pump_until<F>(socket: &RawSocket, conn: &mut ClientConnection, mut done: F) -> Result<()>
where
    F: FnMut(&ClientConnection) -> bool,
{
    let mut in_buf = [0u8; 4096];
    loop {
        if done(conn) {
            return Ok(());
        }

        if conn.wants_write() {
            socket.writable().await?;
            let mut out = Vec::new();
            conn.write_tls(&mut out)?;
            let mut written = 0;
            while written < out.len() {
                match socket.try_write(&out[written..]) {
                    Ok(0) => return Err(Error::tls_negotiation("connection closed during TLS write")),
                    Ok(n) => written += n,
                    Err(e) if is_would_block(&e) => {
                        socket.writable().await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            continue;
        }

        if conn.wants_read() {
            socket.readable().await?;
            match socket.try_read(&mut in_buf) {
                Ok(0) => return Err(Error::tls_negotiation("connection closed during TLS read")),
                Ok(n) => {
                    let mut cursor = &in_buf[..n];
                    conn.read_tls(&mut cursor)?;
                    conn.process_new_packets().map_err(|e| Error::tls_negotiation(e.to_string()))?;
                }
                Err(e) if is_would_block(&e) => continue,
                Err(e) => return Err(e),
            }
            continue;
        }

        // Neither wants_read nor wants_write nor done -- handshake is stuck.
        return Err(Error::tls_negotiation("TLS handshake made no progress"));
    }
}

fn is_would_block(err: &Error) -> bool {
    matches!(err.kind(), crate::pgrelay::common::ErrorKind::IOError(e) if e.kind() == std::io::ErrorKind::WouldBlock)
}

/// Negotiate TLS on `socket` for `hostname`, per the spec's SSLRequest dance:
/// send the 8-byte SSLRequest (length 8, code 80877103), read the backend's
/// single-byte reply, and only then run the rustls handshake if it answered
/// `'S'`. Returns the established `ClientConnection` the caller layers
/// plaintext reads/writes over.
pub async fn negotiate(socket: &RawSocket, config: Arc<ClientConfig>, hostname: &str) -> Result<ClientConnection> {
    let mut request = [0u8; 8];
    request[0..4].copy_from_slice(&8i32.to_be_bytes());
    request[4..8].copy_from_slice(&crate::pgrelay::protocol::tag::SSL_REQUEST_CODE.to_be_bytes());
    write_all_raw(socket, &request).await?;

    let mut reply = [0u8; 1];
    read_exact_raw(socket, &mut reply).await?;
    if reply[0] != crate::pgrelay::protocol::tag::SSL_ALLOWED {
        return Err(Error::tls_negotiation("backend declined SSLRequest"));
    }

    let server_name = ServerName::try_from(hostname).map_err(|_| Error::tls_negotiation("invalid server name"))?;
    let mut conn = ClientConnection::new(config, server_name).map_err(|e| Error::tls_negotiation(e.to_string()))?;

    pump_until(socket, &mut conn, |c| !c.is_handshaking()).await?;
    debug!(%hostname, "TLS handshake complete");
    Ok(conn)
}

pub async fn write_all(socket: &RawSocket, conn: &mut ClientConnection, buf: &[u8]) -> Result<()> {
    conn.writer().write_all(buf).map_err(|e| Error::tls_negotiation(e.to_string()))?;
    pump_until(socket, conn, |c| !c.wants_write()).await
}

pub async fn read_some(socket: &RawSocket, conn: &mut ClientConnection, buf: &mut [u8]) -> Result<usize> {
    loop {
        match conn.reader().read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                pump_until(socket, conn, |c| !c.wants_read()).await?;
            }
            Err(e) => return Err(Error::tls_negotiation(e.to_string())),
        }
    }
}

async fn write_all_raw(socket: &RawSocket, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        socket.writable().await?;
        match socket.try_write(buf) {
            Ok(0) => return Err(Error::connect("connection closed during write")),
            Ok(n) => buf = &buf[n..],
            Err(e) if is_would_block(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn read_exact_raw(socket: &RawSocket, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        socket.readable().await?;
        match socket.try_read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::connect("connection closed during read")),
            Ok(n) => filled += n,
            Err(e) if is_would_block(&e) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
