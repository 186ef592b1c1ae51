use bytes::{BufMut, Bytes, BytesMut};

use crate::pgrelay::cluster::Credentials;
use crate::pgrelay::protocol::tag::{Tag, PROTOCOL_VERSION};

/// Fixed capacity of the startup message's parameter block (key/value pairs
/// plus the terminating NUL), not counting the 4-byte protocol version that
/// prefaces it or the 4-byte length that prefaces that.
pub const STARTUP_BODY_CAPACITY: usize = 1024;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FrameField {
    User,
    Database,
}

/// Raised when a parameter (or the terminating NUL) would overflow the fixed
/// startup-body capacity. The builder translates this into
/// `common::Error::user_too_long()` / `database_too_long()` -- detection
/// order matches write order: user is checked before database, database
/// before the terminator.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FrameError(pub FrameField);

/// The encoded startup wire buffer plus the parsed shorthand fields.
///
/// `raw` holds everything *after* the 4-byte length prefix (the 4-byte
/// protocol version followed by the parameter block); `length` is the value
/// that goes in the prefix and includes itself, so `length == 4 + raw.len()`.
#[derive(Clone, Debug)]
pub struct StartupPacket {
    pub raw: Bytes,
    pub length: u32,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub database: String,
    pub user: String,
    pub application_name: Option<String>,
}

impl StartupPacket {
    /// The full wire transmission: the 4-byte length prefix followed by `raw`.
    pub fn to_wire_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.raw.len());
        buf.put_u32(self.length);
        buf.extend_from_slice(&self.raw);
        buf.freeze()
    }
}

fn write_param(body: &mut BytesMut, key: &str, value: &str, field: FrameField) -> Result<(), FrameError> {
    let needed = key.len() + 1 + value.len() + 1;
    if body.len() + needed > STARTUP_BODY_CAPACITY {
        return Err(FrameError(field));
    }
    body.put_slice(key.as_bytes());
    body.put_u8(0);
    body.put_slice(value.as_bytes());
    body.put_u8(0);
    Ok(())
}

/// Build a startup message for `credentials`, with an optional
/// `application_name` parameter appended if it fits the remaining capacity
/// (dropped silently rather than erroring -- the spec's overflow detection
/// order only names `user` and `database` as load-bearing).
pub fn build_startup(credentials: &Credentials, application_name: Option<&str>) -> Result<StartupPacket, FrameError> {
    let mut body = BytesMut::with_capacity(STARTUP_BODY_CAPACITY.min(256));

    write_param(&mut body, "user", &credentials.user, FrameField::User)?;
    write_param(&mut body, "database", &credentials.database, FrameField::Database)?;

    let mut app_name_written = None;
    if let Some(app) = application_name {
        if write_param(&mut body, "application_name", app, FrameField::Database).is_ok() {
            app_name_written = Some(app.to_string());
        }
    }

    if body.len() + 1 > STARTUP_BODY_CAPACITY {
        return Err(FrameError(FrameField::Database));
    }
    body.put_u8(0); // terminator

    let mut raw = BytesMut::with_capacity(4 + body.len());
    raw.put_i32(PROTOCOL_VERSION);
    raw.extend_from_slice(&body);
    let raw = raw.freeze();
    let length = 4 + raw.len() as u32;

    Ok(StartupPacket {
        raw,
        length,
        protocol_major: 3,
        protocol_minor: 0,
        database: credentials.database.clone(),
        user: credentials.user.clone(),
        application_name: app_name_written,
    })
}

/// Parse a previously-built startup wire buffer back into its shorthand
/// fields. Used only to verify the framer/parser round-trip in tests; a real
/// backend never needs to parse its own startup message back.
pub fn parse_startup(wire: &[u8]) -> Option<StartupPacket> {
    if wire.len() < 8 {
        return None;
    }
    let length = u32::from_be_bytes(wire[0..4].try_into().ok()?);
    let proto = i32::from_be_bytes(wire[4..8].try_into().ok()?);
    if proto != PROTOCOL_VERSION {
        return None;
    }
    let mut user = None;
    let mut database = None;
    let mut application_name = None;
    let mut pos = 8usize;
    loop {
        if pos >= wire.len() {
            return None;
        }
        if wire[pos] == 0 {
            break;
        }
        let key_end = wire[pos..].iter().position(|&b| b == 0)? + pos;
        let key = std::str::from_utf8(&wire[pos..key_end]).ok()?;
        let val_start = key_end + 1;
        let val_end = wire[val_start..].iter().position(|&b| b == 0)? + val_start;
        let value = std::str::from_utf8(&wire[val_start..val_end]).ok()?;
        match key {
            "user" => user = Some(value.to_string()),
            "database" => database = Some(value.to_string()),
            "application_name" => application_name = Some(value.to_string()),
            _ => {}
        }
        pos = val_end + 1;
    }

    Some(StartupPacket {
        raw: Bytes::copy_from_slice(&wire[4..]),
        length,
        protocol_major: 3,
        protocol_minor: 0,
        database: database?,
        user: user?,
        application_name,
    })
}

/// The termination message: tag `'X'` followed by a 4-byte length of `4`, no body.
pub fn build_terminate() -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(Tag::TERMINATE.as_u8());
    buf.put_i32(4);
    buf.freeze()
}
