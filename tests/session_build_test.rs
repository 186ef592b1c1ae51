mod common;

use std::error::Error;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pgrelay_core::cluster::{BackendEndpoint, Credentials};
use pgrelay_core::config::TlsMode;
use pgrelay_core::protocol::hash_md5_password;
use pgrelay_core::session::build_session;

/// Read a full startup packet off `stream` and discard it -- these tests
/// only need to get past it, not inspect its contents.
async fn read_startup_packet(stream: &mut tokio::net::TcpStream) -> Result<(), Box<dyn Error>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let length = u32::from_be_bytes(len_buf);
    let mut rest = vec![0u8; length as usize - 4];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

fn authentication_ok() -> Vec<u8> {
    let mut msg = vec![b'R'];
    msg.extend_from_slice(&8i32.to_be_bytes());
    msg.extend_from_slice(&0i32.to_be_bytes());
    msg
}

/// `ReadyForQuery`, idle transaction status -- sent after `AuthenticationOk`
/// (and any `ParameterStatus`/`BackendKeyData` in between, which these tests
/// skip) to signal the session is usable.
fn ready_for_query() -> Vec<u8> {
    vec![b'Z', 0, 0, 0, 5, b'I']
}

#[tokio::test]
async fn build_session_succeeds_without_password() -> Result<(), Box<dyn Error>> {
    let listener = common::listener();
    let addr = listener.local_addr()?;

    let backend = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        read_startup_packet(&mut stream).await.expect("read startup");
        stream.write_all(&authentication_ok()).await.expect("write AuthenticationOk");
        stream.write_all(&ready_for_query()).await.expect("write ReadyForQuery");
    });

    let endpoint = BackendEndpoint::new(addr.ip().to_string(), addr.port());
    let credentials = Credentials { user: "alice".into(), database: "app".into(), password: None };
    let slot = build_session(&endpoint, TlsMode::Disabled, false, &credentials, 0).await?;
    assert_eq!(slot.node_id, 0);
    assert_eq!(slot.startup.user, "alice");
    assert_eq!(slot.startup.database, "app");

    backend.await?;
    Ok(())
}

#[tokio::test]
async fn build_session_completes_md5_challenge() -> Result<(), Box<dyn Error>> {
    let listener = common::listener();
    let addr = listener.local_addr()?;
    const SALT: i32 = 0x1234_5678;

    let backend = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        read_startup_packet(&mut stream).await.expect("read startup");

        let mut challenge = vec![b'R'];
        challenge.extend_from_slice(&12i32.to_be_bytes());
        challenge.extend_from_slice(&5i32.to_be_bytes());
        challenge.extend_from_slice(&SALT.to_be_bytes());
        stream.write_all(&challenge).await.expect("write MD5 challenge");

        let mut tag = [0u8; 1];
        stream.read_exact(&mut tag).await.expect("read password tag");
        assert_eq!(tag[0], b'p');
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.expect("read password length");
        let length = i32::from_be_bytes(len_buf);
        let mut body = vec![0u8; length as usize - 4];
        stream.read_exact(&mut body).await.expect("read password body");
        let received = String::from_utf8(body[..body.len() - 1].to_vec()).unwrap();
        let expected = hash_md5_password("alice", "s3cret", SALT);
        assert_eq!(received, expected);

        stream.write_all(&authentication_ok()).await.expect("write AuthenticationOk");
        stream.write_all(&ready_for_query()).await.expect("write ReadyForQuery");
    });

    let endpoint = BackendEndpoint::new(addr.ip().to_string(), addr.port());
    let credentials = Credentials { user: "alice".into(), database: "app".into(), password: Some("s3cret".into()) };
    build_session(&endpoint, TlsMode::Disabled, false, &credentials, 1).await?;

    backend.await?;
    Ok(())
}

#[tokio::test]
async fn build_session_surfaces_rejected_auth() -> Result<(), Box<dyn Error>> {
    let listener = common::listener();
    let addr = listener.local_addr()?;

    let backend = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        read_startup_packet(&mut stream).await.expect("read startup");

        let mut error_response = vec![b'E'];
        let body = b"SFATAL\0C28000\0Minvalid password\0\0";
        error_response.extend_from_slice(&((4 + body.len()) as i32).to_be_bytes());
        error_response.extend_from_slice(body);
        stream.write_all(&error_response).await.expect("write ErrorResponse");
    });

    let endpoint = BackendEndpoint::new(addr.ip().to_string(), addr.port());
    let credentials = Credentials { user: "alice".into(), database: "app".into(), password: Some("wrong".into()) };
    let result = build_session(&endpoint, TlsMode::Disabled, false, &credentials, 2).await;
    assert!(result.is_err());
    assert!(matches!(result.unwrap_err().kind(), pgrelay_core::common::ErrorKind::AuthenticationRejected));

    backend.await?;
    Ok(())
}

/// Scenario 1 from spec.md §8: a Unix-domain session build against the
/// conventional `.s.PGSQL.<port>` socket name inside the endpoint's `host`
/// directory.
#[cfg(unix)]
#[tokio::test]
async fn build_session_succeeds_over_unix_socket() -> Result<(), Box<dyn Error>> {
    use tokio::net::UnixListener;

    let dir = std::env::temp_dir().join(format!("pgrelay-core-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let port = 5432u16;
    let socket_path = dir.join(format!(".s.PGSQL.{}", port));
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;

    let backend = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.expect("read startup length");
        let length = u32::from_be_bytes(len_buf);
        let mut rest = vec![0u8; length as usize - 4];
        stream.read_exact(&mut rest).await.expect("read startup body");
        stream.write_all(&authentication_ok()).await.expect("write AuthenticationOk");
        stream.write_all(&ready_for_query()).await.expect("write ReadyForQuery");
    });

    let endpoint = BackendEndpoint::new(dir.to_str().unwrap(), port);
    assert!(endpoint.is_unix_socket, "a host starting with '/' must be detected as a unix socket");
    let credentials = Credentials { user: "alice".into(), database: "app".into(), password: None };
    let slot = build_session(&endpoint, TlsMode::Disabled, false, &credentials, 0).await?;
    assert_eq!(slot.startup.user, "alice");
    assert_eq!(slot.startup.database, "app");

    backend.await?;
    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_dir(&dir);
    Ok(())
}
