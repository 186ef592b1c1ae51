use chrono::{DateTime, Utc};
use tracing::warn;

use crate::pgrelay::protocol::StartupPacket;
use crate::pgrelay::transport::Connection;

/// A live, authenticated backend session: the established connection plus
/// the bookkeeping the pool needs to hand it back out or retire it.
///
/// Dropping a `SessionSlot` sends the Postgres termination message as a
/// best-effort courtesy to the backend -- the socket is being closed either
/// way, so a backend that doesn't read it in time simply never sees it.
/// This is the Rust expression of the spec's "flush close, and release, or
/// none of the three": closing the fd on drop always happens (Rust frees the
/// socket unconditionally), so the only thing actually optional is whether
/// the terminate message makes it onto the wire before that happens.
pub struct SessionSlot {
    connection: Option<Connection>,
    pub startup: StartupPacket,
    pub node_id: i32,
    pub close_time: Option<DateTime<Utc>>,
}

impl SessionSlot {
    pub(crate) fn new(connection: Connection, startup: StartupPacket, node_id: i32) -> Self {
        SessionSlot { connection: Some(connection), startup, node_id, close_time: None }
    }

    pub fn connection(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("SessionSlot used after discard")
    }

    /// Explicit teardown: the spec's `discard(slot)` contract (§4.3 tear-down
    /// step 2) calls for temporarily toggling the socket non-blocking, one
    /// flush attempt, then restoring blocking mode -- precisely so a backend
    /// that already closed its side (a known hazard mid-COPY) surfaces as
    /// dropped residual bytes rather than the same error a live blocking
    /// write would raise (§9: "do not 'tidy' it into a blocking flush").
    /// This is the same single non-blocking attempt `Drop` falls back to,
    /// just invoked explicitly so a caller that can await this method
    /// doesn't have to rely on drop timing.
    pub async fn discard(mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.try_send_terminate_best_effort();
        }
        self.close_time = Some(stamp_close_time());
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            // We're in a non-async context and can't await the
            // writable-readiness an async call would need, but that's the
            // same single non-blocking attempt `discard()` makes anyway --
            // only the warning below is specific to falling back to Drop.
            conn.try_send_terminate_best_effort();
            warn!(node_id = self.node_id, "SessionSlot dropped without explicit discard()");
        }
    }
}

fn stamp_close_time() -> DateTime<Utc> {
    Utc::now()
}
