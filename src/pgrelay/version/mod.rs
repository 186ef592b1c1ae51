//! A process-wide memoized probe of the backend server's major/minor
//! version, parsed out of `SELECT version()`'s reply. Every node in a
//! cluster is assumed to run the same major version, so this is cached once
//! per process rather than once per node/session -- re-querying it on every
//! session build would be wasted round trips for a value that essentially
//! never changes for the lifetime of the process.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info};

use crate::pgrelay::common::{Error, Result};
use crate::pgrelay::protocol::Tag;
use crate::pgrelay::transport::Connection;

const MAJOR_MIN: u32 = 60;
const MAJOR_MAX: u32 = 1000;
const MINOR_MIN: u32 = 0;
const MINOR_MAX: u32 = 100;
/// Cap on the memoized raw version string, matching the spec's
/// `bounded_string` -- long enough to hold a full `SELECT version()` banner
/// (e.g. `"PostgreSQL 14.2 on x86_64-pc-linux-gnu, compiled by gcc ..."`)
/// without letting a malformed banner grow the cache unbounded.
const VERSION_STRING_CAPACITY: usize = 256;

/// The normalized `(major, minor)` a raw `SELECT version()` reply parses
/// into. For `X.Y` replies with `X >= 10` (PostgreSQL 10+, which dropped the
/// minor release number from its version string), `major = X * 10` and
/// `minor = Y`. For older `X.Y.Z` replies, `major = X * 10 + Y` and `minor =
/// Z`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ParsedVersion {
    pub major: u32,
    pub minor: u32,
}

/// The process-wide memoized singleton: `ParsedVersion` plus the raw banner
/// it was parsed from. `major == 0` is reserved to mean "not yet probed";
/// see `cached()`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PgVersion {
    pub major: u32,
    pub minor: u32,
    pub version_string: String,
}

impl PgVersion {
    pub fn parsed(&self) -> ParsedVersion {
        ParsedVersion { major: self.major, minor: self.minor }
    }
}

static MAJOR: AtomicU32 = AtomicU32::new(0);
static MINOR: AtomicU32 = AtomicU32::new(0);
static VERSION_STRING: Mutex<Option<String>> = Mutex::new(None);

/// Read the cached version without probing. Returns `None` before the first
/// successful `ensure()`/`probe()`.
///
/// `major` is the publication discriminant: it's stored last, with
/// `Release` ordering, after `version_string` and `minor` have already been
/// published by the same thread (see `publish`). Readers load `major` first
/// with `Acquire`; any thread that observes a non-zero `major` is guaranteed
/// to also observe the `minor`/`version_string` writes that happened-before
/// it, so callers never see a torn (new-major, stale-string) pair.
pub fn cached() -> Option<PgVersion> {
    let major = MAJOR.load(Ordering::Acquire);
    if major == 0 {
        return None;
    }
    let minor = MINOR.load(Ordering::Relaxed);
    let version_string = VERSION_STRING.lock().unwrap().clone().unwrap_or_default();
    Some(PgVersion { major, minor, version_string })
}

fn publish(parsed: ParsedVersion, raw: &str) {
    let mut truncated = raw.to_string();
    truncated.truncate(VERSION_STRING_CAPACITY);
    *VERSION_STRING.lock().unwrap() = Some(truncated);
    MINOR.store(parsed.minor, Ordering::Relaxed);
    MAJOR.store(parsed.major, Ordering::Release);
}

/// Return the cached version, probing via `query` if it hasn't been
/// established yet. `query` is expected to run `SELECT version()` (or
/// equivalent) against any already-authenticated backend session and return
/// its single-row text reply.
///
/// Concurrent callers that both observe an empty cache will both run
/// `query` and both call `publish` -- harmless, since every node reports the
/// same version and the stores are idempotent, and simpler than adding a
/// lock or a `tokio::sync::OnceCell` a caller would have to thread through
/// every call site. Whichever publish lands last wins; since they agree,
/// that's fine.
pub async fn ensure<F, Fut>(query: F) -> Result<PgVersion>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    if let Some(v) = cached() {
        return Ok(v);
    }

    let raw = query().await.map_err(|e| Error::version_query_failed(e.to_string()))?;
    let parsed = parse_version_string(&raw)?;
    debug!(major = parsed.major, minor = parsed.minor, raw = %raw, "probed backend server version");
    publish(parsed, &raw);
    info!(major = parsed.major, minor = parsed.minor, "backend server version established");
    Ok(PgVersion { major: parsed.major, minor: parsed.minor, version_string: raw })
}

/// Run `SELECT version()` as a simple query over an already-authenticated
/// `conn` and return the single text value of its first row's first column.
/// This is the probe itself; `ensure`/`probe` memoize what it returns so it
/// only actually runs once per process.
async fn query_version_string(conn: &mut Connection) -> Result<String> {
    const SQL: &str = "SELECT version()";
    let mut msg = BytesMut::with_capacity(6 + SQL.len());
    msg.put_u8(Tag::QUERY.as_u8());
    msg.put_i32((4 + SQL.len() + 1) as i32);
    msg.put_slice(SQL.as_bytes());
    msg.put_u8(0);
    conn.write_all(&msg).await?;

    let mut first_value: Option<String> = None;
    loop {
        let (tag, body) = conn.read_message().await?;
        match tag {
            Tag::DATA_ROW => {
                if first_value.is_none() {
                    first_value = Some(first_column_text(&body)?);
                }
            }
            Tag::ERROR_RESPONSE => return Err(Error::version_query_failed("backend returned ErrorResponse for SELECT version()")),
            Tag::READY_FOR_QUERY => {
                return first_value.ok_or_else(|| Error::version_query_failed("SELECT version() returned no rows"));
            }
            // RowDescription, CommandComplete, NoticeResponse, etc. carry no
            // information this probe needs.
            _ => {}
        }
    }
}

/// Read a `DataRow` body's first column as text, bounds-checking every read
/// instead of trusting the backend's claimed lengths -- `bytes::Buf::get_i32`
/// panics on an underflowing read, and slicing `body[..len]` past the end
/// panics too, so a truncated or malformed row must be rejected before
/// either happens, the same way `protocol::auth` checks `body.len() < 4`
/// before every `get_i32()` on untrusted wire input.
fn first_column_text(body: &bytes::Bytes) -> Result<String> {
    if body.len() < 2 {
        return Err(Error::version_query_failed("truncated DataRow: missing field count"));
    }
    let num_fields = i16::from_be_bytes(body[0..2].try_into().unwrap());
    if num_fields < 1 {
        return Err(Error::version_query_failed("DataRow has no columns"));
    }
    if body.len() < 6 {
        return Err(Error::version_query_failed("truncated DataRow: missing column length"));
    }
    let len = i32::from_be_bytes(body[2..6].try_into().unwrap());
    if len < 0 {
        return Err(Error::version_query_failed("DataRow's first column is NULL"));
    }
    let len = len as usize;
    if body.len() < 6 + len {
        return Err(Error::version_query_failed("truncated DataRow: column shorter than its declared length"));
    }
    String::from_utf8(body[6..6 + len].to_vec()).map_err(|e| Error::version_query_failed(e.to_string()))
}

/// Probe and memoize the backend server version over `conn`, or return the
/// value memoized by an earlier call on any connection.
pub async fn probe(conn: &mut Connection) -> Result<PgVersion> {
    if let Some(v) = cached() {
        return Ok(v);
    }
    let raw = query_version_string(conn).await?;
    let parsed = parse_version_string(&raw)?;
    debug!(major = parsed.major, minor = parsed.minor, raw = %raw, "probed backend server version");
    publish(parsed, &raw);
    info!(major = parsed.major, minor = parsed.minor, "backend server version established");
    Ok(PgVersion { major: parsed.major, minor: parsed.minor, version_string: raw })
}

/// Collect a leading run of ASCII digits from `s`, returning `(value,
/// chars_consumed)`. A non-digit (or an empty string) immediately yields
/// `(0, 0)` -- the "lenient atoi" behavior the parser below relies on for
/// malformed trailing components like `"beta1"`.
fn leading_digits(s: &str) -> (u32, usize) {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let value = s[..end].parse::<u32>().unwrap_or(0);
    (value, end)
}

/// Skip exactly one character past `s[from..]`'s start, the way the
/// original parser's cursor advances past a delimiter unconditionally
/// rather than checking it's actually a `.` -- see the version-parser open
/// question this behavior preserves.
fn skip_one(s: &str) -> &str {
    match s.char_indices().nth(1) {
        Some((i, _)) => &s[i..],
        None => "",
    }
}

/// Parse a `SELECT version()` reply such as `"PostgreSQL 14.2 on
/// x86_64-pc-linux-gnu, compiled by gcc ..."`, the pre-10 `"PostgreSQL
/// 9.6.24 on ..."`, or a prerelease string like `"PostgreSQL 12beta1 on
/// ..."`.
///
/// Locates the first space, then collects digits up to the next `.` or
/// non-digit to form `first`. If `first >= 10` (the PostgreSQL 10+ scheme,
/// which identifies a release line by one number), `major = first * 10` and
/// `minor` is whatever digits follow the next delimiter. Otherwise (the
/// pre-10 `X.Y.Z` scheme), `major = first * 10 + second` and `minor` is the
/// third component. Any non-digit terminates a component's digit run, so
/// `"12beta1"` parses `first = 12` and then an empty `minor` component,
/// which the lenient digit collector reads as `0`.
pub fn parse_version_string(raw: &str) -> Result<ParsedVersion> {
    let space = raw.find(' ').ok_or_else(|| Error::version_unparsable(format!("no space in {:?}", raw)))?;
    let after = &raw[space + 1..];

    let (first, first_len) = leading_digits(after);
    if first_len == 0 {
        return Err(Error::version_unparsable(format!("no numeric version component in {:?}", after)));
    }
    let after_first = skip_one(&after[first_len..]);

    let (major, minor) = if first >= 10 {
        let (minor, _) = leading_digits(after_first);
        (first * 10, minor)
    } else {
        let (second, second_len) = leading_digits(after_first);
        let after_second = skip_one(&after_first[second_len..]);
        let (minor, _) = leading_digits(after_second);
        (first * 10 + second, minor)
    };

    if !(MAJOR_MIN..=MAJOR_MAX).contains(&major) || !(MINOR_MIN..=MINOR_MAX).contains(&minor) {
        return Err(Error::version_out_of_range(format!("major {} minor {} out of range", major, minor)));
    }

    Ok(ParsedVersion { major, minor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_two_component_version() {
        let parsed = parse_version_string("PostgreSQL 12.3 on x86_64-pc-linux-gnu, compiled by gcc").unwrap();
        assert_eq!(parsed, ParsedVersion { major: 120, minor: 3 });
    }

    #[test]
    fn parses_legacy_three_component_version() {
        let parsed = parse_version_string("PostgreSQL 9.6.5 on x86_64-pc-linux-gnu, compiled by gcc").unwrap();
        assert_eq!(parsed, ParsedVersion { major: 96, minor: 5 });
    }

    #[test]
    fn parses_prerelease_version_with_trailing_letters() {
        let parsed = parse_version_string("PostgreSQL 12beta1 on x86_64-pc-linux-gnu").unwrap();
        assert_eq!(parsed, ParsedVersion { major: 120, minor: 0 });
    }

    #[test]
    fn rejects_missing_version_token() {
        let err = parse_version_string("PostgreSQLnospace").unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionUnparsable));
    }

    #[test]
    fn rejects_nonnumeric_major() {
        let err = parse_version_string("PostgreSQL devel on x86_64").unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionUnparsable));
    }

    #[test]
    fn rejects_out_of_range_major() {
        let err = parse_version_string("PostgreSQL 4.0 on x86_64").unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionOutOfRange));
    }

    #[tokio::test]
    async fn ensure_caches_across_calls() {
        // Shares process-global state with other tests in this binary, so it
        // only asserts that repeated `ensure()` calls after the first agree,
        // not the exact values -- that keeps it order-independent.
        let first = ensure(|| async { Ok("PostgreSQL 15.1 on x86_64".to_string()) }).await.unwrap();
        let second = ensure(|| async { panic!("query should not run once cached") }).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cached_version_string_matches_probed_banner() {
        let banner = "PostgreSQL 13.4 on x86_64-pc-linux-gnu";
        let version = ensure(|| async { Ok(banner.to_string()) }).await.unwrap();
        // Another test in this binary may have already populated the cache
        // with a different banner; only check that *some* banner is retained
        // once the singleton is populated.
        assert!(!version.version_string.is_empty());
        assert_eq!(cached().unwrap().version_string, version.version_string);
    }

    #[test]
    fn first_column_text_reads_well_formed_row() {
        let mut body = BytesMut::new();
        body.put_i16(1);
        body.put_i32(11);
        body.put_slice(b"PostgreSQL ");
        assert_eq!(first_column_text(&body.freeze()).unwrap(), "PostgreSQL ");
    }

    #[test]
    fn first_column_text_rejects_truncated_field_count() {
        let body = bytes::Bytes::from_static(&[0u8]);
        let err = first_column_text(&body).unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionQueryFailed));
    }

    #[test]
    fn first_column_text_rejects_truncated_column_length() {
        let mut body = BytesMut::new();
        body.put_i16(1);
        body.put_slice(&[0u8, 0u8]); // only 2 of the 4 length bytes present
        let err = first_column_text(&body.freeze()).unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionQueryFailed));
    }

    #[test]
    fn first_column_text_rejects_length_exceeding_payload() {
        let mut body = BytesMut::new();
        body.put_i16(1);
        body.put_i32(100); // claims 100 bytes but none follow
        let err = first_column_text(&body.freeze()).unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionQueryFailed));
    }

    #[test]
    fn first_column_text_rejects_zero_columns() {
        let mut body = BytesMut::new();
        body.put_i16(0);
        let err = first_column_text(&body.freeze()).unwrap_err();
        assert!(matches!(err.kind(), crate::pgrelay::common::ErrorKind::VersionQueryFailed));
    }
}
