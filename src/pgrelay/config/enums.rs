use serde::Deserialize;

/// Transport-security preference between this core and a backend node.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Not explicitly set; resolved against the cluster default during `load()`.
    Invalid,
    /// Never negotiate TLS.
    Disabled,
    /// Use TLS when the backend supports it; fall back to plaintext otherwise.
    Prefer,
    /// Require TLS; fail the session build if it cannot be negotiated.
    Required,
}

impl Default for TlsMode {
    fn default() -> Self {
        TlsMode::Invalid
    }
}
