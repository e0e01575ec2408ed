//! Cache key derivation from request text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Characters removed from the key body.
static STRIPPED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[$&+,:;=?@#|'<>.^*()%!/\\"]"#).expect("valid regex"));

/// Longest key body (in bytes) kept verbatim before hashing the remainder.
const MAX_BODY_BYTES: usize = 200;

/// Number of hex digest characters appended to truncated bodies.
const DIGEST_CHARS: usize = 16;

/// Audio file extension appended to every key.
pub const EXTENSION: &str = "wav";

/// Filesystem-safe identifier of a cached artifact, e.g. `GLaDOS-tts-hello-world.wav`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `text`.
    ///
    /// Lower-cases, joins whitespace runs with a single hyphen, removes the
    /// stripped punctuation set plus path separators and control characters,
    /// then wraps the body as `<namespace>-<body>.wav`. Never fails; text
    /// with no usable characters yields an empty body.
    pub fn derive(namespace: &str, text: &str) -> Self {
        let body = normalize(text);
        Self(format!("{}-{}.{}", namespace, bound_length(body), EXTENSION))
    }

    /// The fixed key used when caching is bypassed.
    pub fn bypass(namespace: &str) -> Self {
        Self(format!("{}-output.{}", namespace, EXTENSION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize text into a key body.
pub fn normalize(text: &str) -> String {
    let hyphenated = text.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-");
    STRIPPED.replace_all(&hyphenated, "").chars().filter(|c| !c.is_control()).collect()
}

fn bound_length(body: String) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body;
    }

    let digest = Sha256::digest(body.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    let mut cut = MAX_BODY_BYTES;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &body[..cut], &hex[..DIGEST_CHARS])
}
