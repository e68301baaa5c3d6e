//! # Cache Key Namespacing
//!
//! Builds, parses and validates the deterministic keys used by every domain
//! cache: `<global-prefix>:<domain>:<id>[:suffix...]`.
//!
//! Identifier and suffix segments are percent-encoded, so free text such as a
//! student's name or an e-mail address can never inject a `:` and shift the
//! layout. Segments that are still too long after encoding are replaced by a
//! SHA-256 digest. Bulk-operation prefixes always end with `:`, which makes
//! them substring-safe: `...:category:3:` never matches category `31`.

use super::{CacheError, CacheResult};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::fmt;

/// Encoded segments longer than this are hashed
const MAX_SEGMENT_LENGTH: usize = 64;

/// Marker for hashed segments. `#` is always percent-encoded by
/// `urlencoding`, so a hashed segment cannot collide with an encoded one.
const HASHED_SEGMENT_MARKER: char = '#';

/// The data families that own a slice of the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    Product,
    User,
    Category,
    Config,
    Student,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 5] = [
        CacheDomain::Product,
        CacheDomain::User,
        CacheDomain::Category,
        CacheDomain::Config,
        CacheDomain::Student,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheDomain::Product => "product",
            CacheDomain::User => "user",
            CacheDomain::Category => "category",
            CacheDomain::Config => "config",
            CacheDomain::Student => "student",
        }
    }

    pub fn parse(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == segment)
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, validated cache key. Equality is exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = CacheError;

    fn try_from(raw: String) -> CacheResult<Self> {
        validate_key_chars(&raw)?;
        Ok(Self(raw))
    }
}

impl TryFrom<&str> for CacheKey {
    type Error = CacheError;

    fn try_from(raw: &str) -> CacheResult<Self> {
        Self::try_from(raw.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A key split back into its parts, with segments decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub prefix: String,
    pub domain: CacheDomain,
    pub id: String,
    pub suffix: Vec<String>,
}

/// Reject characters that would make a key ambiguous or unsafe to log.
///
/// Whitespace, control characters and glob metacharacters are disallowed;
/// empty segments (`a::b`) are disallowed too.
pub fn validate_key_chars(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::invalid_key(key, "cache key cannot be empty"));
    }
    if let Some(bad) = key.chars().find(|c| is_disallowed(*c)) {
        return Err(CacheError::invalid_key(
            key,
            format!("disallowed character {:?}", bad),
        ));
    }
    if key.split(':').any(str::is_empty) {
        return Err(CacheError::invalid_key(key, "empty key segment"));
    }
    Ok(())
}

fn is_disallowed(c: char) -> bool {
    c.is_whitespace()
        || c.is_control()
        || matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '"' | '\'' | '\\')
}

/// Builds and parses keys under one global prefix
#[derive(Debug, Clone)]
pub struct KeyNamespacer {
    prefix: String,
}

impl KeyNamespacer {
    /// Create a namespacer; the prefix must be a single valid segment
    pub fn new(prefix: impl Into<String>) -> CacheResult<Self> {
        let prefix = prefix.into();
        validate_key_chars(&prefix)?;
        if prefix.contains(':') {
            return Err(CacheError::invalid_key(
                &prefix,
                "global prefix must be a single segment",
            ));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>:<domain>:<id>`
    pub fn key(&self, domain: CacheDomain, id: impl fmt::Display) -> CacheKey {
        self.key_with_suffix(domain, id, &[])
    }

    /// `<prefix>:<domain>:<id>:<suffix[0]>:<suffix[1]>...`
    pub fn key_with_suffix(
        &self,
        domain: CacheDomain,
        id: impl fmt::Display,
        suffix: &[&str],
    ) -> CacheKey {
        let mut key = format!("{}:{}:{}", self.prefix, domain, encode_segment(&id.to_string()));
        for part in suffix {
            key.push(':');
            key.push_str(&encode_segment(part));
        }
        CacheKey(key)
    }

    /// Prefix matching every key of a domain, e.g. `campus:product:`
    pub fn domain_prefix(&self, domain: CacheDomain) -> String {
        format!("{}:{}:", self.prefix, domain)
    }

    /// Prefix matching a family of keys, e.g. `campus:product:list:category:3:`
    pub fn collection_prefix(&self, domain: CacheDomain, segments: &[&str]) -> String {
        let mut prefix = self.domain_prefix(domain);
        for segment in segments {
            prefix.push_str(&encode_segment(segment));
            prefix.push(':');
        }
        prefix
    }

    /// Split a key built by this namespacer back into its parts
    pub fn parse(&self, key: &str) -> CacheResult<ParsedKey> {
        validate_key_chars(key)?;

        let mut parts = key.split(':');
        let prefix = parts.next().unwrap_or_default();
        if prefix != self.prefix {
            return Err(CacheError::invalid_key(key, "foreign key prefix"));
        }
        let domain = parts
            .next()
            .and_then(CacheDomain::parse)
            .ok_or_else(|| CacheError::invalid_key(key, "unknown cache domain"))?;
        let id = parts
            .next()
            .ok_or_else(|| CacheError::invalid_key(key, "missing identifier"))?;

        Ok(ParsedKey {
            prefix: prefix.to_string(),
            domain,
            id: decode_segment(key, id)?,
            suffix: parts
                .map(|part| decode_segment(key, part))
                .collect::<CacheResult<Vec<_>>>()?,
        })
    }
}

fn encode_segment(raw: &str) -> String {
    let encoded = urlencoding::encode(raw);
    if encoded.len() <= MAX_SEGMENT_LENGTH {
        return encoded.into_owned();
    }
    let digest = Sha256::digest(raw.as_bytes());
    format!("{}{}", HASHED_SEGMENT_MARKER, hex::encode(digest))
}

fn decode_segment(key: &str, segment: &str) -> CacheResult<String> {
    if segment.starts_with(HASHED_SEGMENT_MARKER) {
        return Ok(segment.to_string());
    }
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| CacheError::invalid_key(key, format!("bad segment encoding: {}", e)))
}
