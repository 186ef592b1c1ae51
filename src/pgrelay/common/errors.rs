use std::fmt::{Debug, Display};
use std::{fmt, io, result};
use std::sync::PoisonError;

/// Which field overflowed the fixed-capacity startup body (see `protocol::message_builder`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TooLongField {
    User,
    Database,
}

/// The taxonomy from the session-build/version-probe/load-balancer error table.
/// Kept as a flat enum (rather than splitting into per-component error types)
/// so callers can match on `Error::kind()` without caring which layer raised it,
/// the way `riverdb::common::errors::ErrorKind` does for the whole crate.
#[derive(Debug)]
pub enum ErrorKind {
    /// Transport-level connect failure (no route, refused, DNS failure, timeout).
    Connect,
    /// TLS negotiation with the backend failed.
    TlsNegotiation,
    /// A startup parameter overflowed the fixed-capacity body buffer.
    TooLong(TooLongField),
    /// The backend rejected the authentication handshake.
    AuthenticationRejected,
    /// `SELECT version()` returned a string that could not be parsed.
    VersionUnparsable,
    /// The parsed version was outside the valid major/minor range.
    VersionOutOfRange,
    /// The version probe query itself failed (connection error, protocol error).
    VersionQueryFailed,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    TlsError(rustls::Error),
    RegexError(regex::Error),
    PoisonError,
}

#[derive(Debug)]
pub struct Error {
    err: Box<ErrorKind>,
    detail: Option<String>,
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error { err: Box::new(ErrorKind::StringError(s.to_string())), detail: None }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Construct an error of `kind` carrying a human-readable `detail`, matching the
    /// `SessionError{kind, detail}` / `FrameError::Overflow(which_field)` shapes from the spec.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error { err: Box::new(kind), detail: Some(detail.into()) }
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Connect, detail)
    }

    pub fn tls_negotiation(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::TlsNegotiation, detail)
    }

    pub fn user_too_long() -> Self {
        Self::with_detail(ErrorKind::TooLong(TooLongField::User), "user name is too long")
    }

    pub fn database_too_long() -> Self {
        Self::with_detail(ErrorKind::TooLong(TooLongField::Database), "database name is too long")
    }

    pub fn authentication_rejected(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::AuthenticationRejected, detail)
    }

    pub fn version_unparsable(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::VersionUnparsable, detail)
    }

    pub fn version_out_of_range(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::VersionOutOfRange, detail)
    }

    pub fn version_query_failed(detail: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::VersionQueryFailed, detail)
    }

    /// True for the handful of kinds §7 marks fatal (the process should not try to recover).
    pub fn is_fatal(&self) -> bool {
        matches!(
            *self.err,
            ErrorKind::VersionUnparsable | ErrorKind::VersionOutOfRange | ErrorKind::VersionQueryFailed
        )
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error { err: Box::new(ErrorKind::StringError(String::from(err))), detail: None }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error { err: Box::new(ErrorKind::StringError(err)), detail: None }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error { err: Box::new(ErrorKind::IOError(err)), detail: None }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error { err: Box::new(ErrorKind::YAMLError(err)), detail: None }
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error { err: Box::new(ErrorKind::TlsError(err)), detail: None }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error { err: Box::new(ErrorKind::RegexError(err)), detail: None }
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error { err: Box::new(ErrorKind::PoisonError), detail: None }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.err, detail),
            None => Display::fmt(&self.err, f),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Connect => f.write_str("could not connect to backend"),
            ErrorKind::TlsNegotiation => f.write_str("TLS negotiation with backend failed"),
            ErrorKind::TooLong(TooLongField::User) => f.write_str("user name is too long"),
            ErrorKind::TooLong(TooLongField::Database) => f.write_str("database name is too long"),
            ErrorKind::AuthenticationRejected => f.write_str("backend rejected authentication"),
            ErrorKind::VersionUnparsable => f.write_str("could not parse backend version string"),
            ErrorKind::VersionOutOfRange => f.write_str("backend version is out of the supported range"),
            ErrorKind::VersionQueryFailed => f.write_str("version probe query failed"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => Display::fmt(e, f),
            ErrorKind::YAMLError(e) => Display::fmt(e, f),
            ErrorKind::TlsError(e) => Display::fmt(e, f),
            ErrorKind::RegexError(e) => Display::fmt(e, f),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
        }
    }
}

impl std::error::Error for Error {}
