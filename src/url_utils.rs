//! URL identity: canonicalization, fingerprints and onion-scope checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Length of a rendered fingerprint (hex characters).
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// 128-bit content-addressed identity of a URL.
///
/// Serialized as 32 lowercase hex characters, which is also the file stem
/// of the stored page and the key of the link-graph file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint '{0}': expected 32 hex characters")]
pub struct InvalidFingerprint(pub String);

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidFingerprint(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

/// Strip a single trailing slash; everything else is preserved.
pub fn canonicalize(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

/// MD5 of the canonical URL string. Stable across runs and implementations.
pub fn fingerprint(url: &str) -> Fingerprint {
    Fingerprint(md5::compute(canonicalize(url).as_bytes()).0)
}

/// True for well-formed http(s) URLs whose host is an onion service.
pub fn is_onion_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    match parsed.host_str() {
        Some(host) => host
            .strip_suffix(".onion")
            .is_some_and(|label| !label.is_empty() && !label.ends_with('.')),
        None => false,
    }
}

/// Authority (userinfo, host, port) equality of two parsed URLs.
pub fn same_authority(a: &Url, b: &Url) -> bool {
    a.authority() == b.authority()
}
