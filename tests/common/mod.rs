use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering::Relaxed;

use tokio::net::{TcpListener, TcpSocket};

pub static LISTEN_PORT: AtomicU16 = AtomicU16::new(11101);

/// Bind a local listener standing in for a backend node, the way the
/// upstream test suite binds one in front of a real `psql`/postmaster --
/// these tests script the backend side of the wire protocol by hand instead.
pub fn listener() -> TcpListener {
    let mut port: u16 = 0;
    for _ in 0..10 {
        port = LISTEN_PORT.fetch_add(1, Relaxed);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let sock = TcpSocket::new_v4().unwrap();
        if sock.bind(addr).is_ok() {
            return sock.listen(32).expect("couldn't listen on socket");
        }
    }
    panic!("couldn't find an available listen port between {}-{}", port - 10, port);
}
