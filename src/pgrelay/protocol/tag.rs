/// Message tag bytes the session-build/version-probe handshake needs.
/// A full wire-protocol implementation (query/row/portal tags, COPY, etc.)
/// belongs to the query router this core does not implement; see spec.md
/// Non-goals.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Tag(pub u8);

impl Tag {
    pub const AUTHENTICATION: Tag = Tag(b'R');
    pub const PASSWORD_MESSAGE: Tag = Tag(b'p');
    pub const ERROR_RESPONSE: Tag = Tag(b'E');
    pub const NOTICE_RESPONSE: Tag = Tag(b'N');
    pub const READY_FOR_QUERY: Tag = Tag(b'Z');
    pub const BACKEND_KEY_DATA: Tag = Tag(b'K');
    pub const PARAMETER_STATUS: Tag = Tag(b'S');
    pub const QUERY: Tag = Tag(b'Q');
    pub const ROW_DESCRIPTION: Tag = Tag(b'T');
    pub const DATA_ROW: Tag = Tag(b'D');
    pub const COMMAND_COMPLETE: Tag = Tag(b'C');
    pub const TERMINATE: Tag = Tag(b'X');

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

/// The protocol version sent in the startup packet: major 3, minor 0.
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;
/// SSLRequest's special "version" code, sent in place of PROTOCOL_VERSION
/// to ask the backend whether it will upgrade the connection to TLS.
pub const SSL_REQUEST_CODE: i32 = 80_877_103;
pub const SSL_ALLOWED: u8 = b'S';
pub const SSL_NOT_ALLOWED: u8 = b'N';
