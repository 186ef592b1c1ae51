use bytes::{Buf, BufMut, Bytes, BytesMut};
use crypto::digest::Digest;
use crypto::md5::Md5;
use strum::Display;

use crate::pgrelay::cluster::Credentials;
use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::protocol::tag::Tag;
use crate::pgrelay::transport::Connection;

/// The subset of Postgres's `AuthenticationXXX` sub-codes this core needs to
/// drive the handshake; SASL/GSS/SSPI are recognized only so an unsupported
/// request produces a clear error rather than a panic.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
#[repr(u8)]
pub enum AuthType {
    Ok = 0,
    KerberosV5 = 2,
    ClearText = 3,
    MD5 = 5,
    SCM = 6,
    GSS = 7,
    GSSContinue = 8,
    SSPI = 9,
    SASL = 10,
    SASLContinue = 11,
    SASLFinal = 12,
}

impl From<i32> for AuthType {
    fn from(i: i32) -> Self {
        match i {
            0 => AuthType::Ok,
            2 => AuthType::KerberosV5,
            3 => AuthType::ClearText,
            5 => AuthType::MD5,
            6 => AuthType::SCM,
            7 => AuthType::GSS,
            8 => AuthType::GSSContinue,
            9 => AuthType::SSPI,
            10 => AuthType::SASL,
            11 => AuthType::SASLContinue,
            other => {
                tracing::warn!(code = other, "unrecognized authentication request code");
                AuthType::Ok
            }
        }
    }
}

/// Hex-encoded MD5 digest of password, user, and salt per the Postgres
/// frontend/backend auth algorithm: `md5(md5(password || user) || salt)`,
/// prefixed with the literal `"md5"`.
pub fn hash_md5_password(user: &str, password: &str, salt: i32) -> String {
    let mut hasher = Md5::new();
    hasher.input_str(password);
    hasher.input_str(user);
    let mut pwd_hash = [0; 16];
    hasher.result(&mut pwd_hash);
    hasher.reset();
    hasher.input_str(&hex::encode(&pwd_hash[..]));
    hasher.input(&salt.to_be_bytes()[..]);
    hasher.result(&mut pwd_hash);

    let mut result = String::with_capacity(32 + 3);
    result.push_str("md5");
    result.push_str(&hex::encode(&pwd_hash[..]));
    result
}

fn build_password_message(password: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(6 + password.len());
    buf.put_u8(Tag::PASSWORD_MESSAGE.as_u8());
    buf.put_i32((4 + password.len() + 1) as i32);
    buf.put_slice(password.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Drive the authentication sub-protocol to completion: read the backend's
/// `AuthenticationXXX` message, answer a cleartext or MD5 challenge with the
/// matching password response, and loop until `AuthenticationOk` or an
/// error. Any rejection (an `ErrorResponse`, or a challenge this core
/// doesn't implement) becomes `Error::authentication_rejected()`.
pub async fn authenticate(conn: &mut Connection, credentials: &Credentials) -> Result<()> {
    loop {
        let (tag, mut body) = conn.read_message().await?;
        match tag {
            Tag::AUTHENTICATION => {
                if body.len() < 4 {
                    return Err(Error::authentication_rejected("truncated AuthenticationXXX message"));
                }
                let code = body.get_i32();
                match AuthType::from(code) {
                    AuthType::Ok => return Ok(()),
                    AuthType::ClearText => {
                        let password = credentials
                            .password
                            .as_deref()
                            .ok_or_else(|| Error::authentication_rejected("no password configured for cleartext auth"))?;
                        conn.write_all(&build_password_message(password)).await?;
                    }
                    AuthType::MD5 => {
                        if body.len() < 4 {
                            return Err(Error::authentication_rejected("truncated MD5 salt"));
                        }
                        let salt = body.get_i32();
                        let password = credentials
                            .password
                            .as_deref()
                            .ok_or_else(|| Error::authentication_rejected("no password configured for MD5 auth"))?;
                        let hashed = hash_md5_password(&credentials.user, password, salt);
                        conn.write_all(&build_password_message(&hashed)).await?;
                    }
                    other => {
                        tracing::warn!(%other, "unsupported authentication method requested");
                        return Err(Error::authentication_rejected(format!("unsupported method {}", other)));
                    }
                }
            }
            Tag::ERROR_RESPONSE => return Err(Error::authentication_rejected("backend sent ErrorResponse during auth")),
            // A compliant backend only sends Authentication/ErrorResponse at this
            // point in the handshake; anything else means it's not speaking the
            // protocol we expect.
            _ => return Err(Error::authentication_rejected(format!("unexpected message tag {:?} during auth", tag))),
        }
    }
}

/// After `AuthenticationOk`, a compliant backend still sends a run of
/// `ParameterStatus`/`BackendKeyData` messages before `ReadyForQuery` --
/// the session isn't actually usable until that arrives. This drains and
/// discards those messages (the startup parameters they carry belong to a
/// session-parameter cache this core doesn't keep) and returns once the
/// backend signals it's ready to accept a query.
pub async fn await_ready_for_query(conn: &mut Connection) -> Result<()> {
    loop {
        let (tag, _body) = conn.read_message().await?;
        match tag {
            Tag::READY_FOR_QUERY => return Ok(()),
            Tag::ERROR_RESPONSE => return Err(Error::authentication_rejected("backend sent ErrorResponse before ReadyForQuery")),
            Tag::PARAMETER_STATUS | Tag::BACKEND_KEY_DATA | Tag::NOTICE_RESPONSE => continue,
            _ => return Err(Error::authentication_rejected(format!("unexpected message tag {:?} before ReadyForQuery", tag))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_md5_password() {
        assert_eq!(hash_md5_password("username", "foobar", 0xa26892c4u32 as i32), "md57b4e445f6041af0d6d962d0cbd830f18");
        assert_eq!(hash_md5_password("md5_user", "password", 0x2a3d8fe0u32 as i32), "md562af4dd09bbb41884907a838a3233294");
    }

    #[test]
    fn password_message_framing() {
        let msg = build_password_message("abc");
        assert_eq!(msg[0], b'p');
        assert_eq!(i32::from_be_bytes(msg[1..5].try_into().unwrap()), 8);
        assert_eq!(&msg[5..], b"abc\0");
    }

    #[test]
    fn auth_type_round_trips_known_codes() {
        assert_eq!(AuthType::from(0), AuthType::Ok);
        assert_eq!(AuthType::from(5), AuthType::MD5);
        assert_eq!(AuthType::from(3), AuthType::ClearText);
    }
}
