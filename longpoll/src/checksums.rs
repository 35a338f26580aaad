//! Payload checksums.
//!
//! Two digest kinds are in use: the primary `xxhash64` and the legacy `md5`.
//! Clients assert zero, one or both of them to describe the copy they hold.
//! The server always computes the primary digest and only computes the legacy
//! one when the client could need it.

use crate::errors::ValidationError;
use crate::types::{ApplicationId, ConfigKey, Generation};
use md5::{Digest, Md5};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use xxhash_rust::xxh64::xxh64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumKind {
    Xxhash64,
    Md5,
}

impl ChecksumKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChecksumKind::Xxhash64 => "xxhash64",
            ChecksumKind::Md5 => "md5",
        }
    }

    const fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Xxhash64 => 16,
            ChecksumKind::Md5 => 32,
        }
    }
}

/// Checksums a client claims for its cached copy. Either may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientChecksums {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xxhash64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl ClientChecksums {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn xxhash64(digest: impl Into<String>) -> Self {
        ClientChecksums {
            xxhash64: Some(digest.into()),
            md5: None,
        }
    }

    pub fn get(&self, kind: ChecksumKind) -> Option<&str> {
        let value = match kind {
            ChecksumKind::Xxhash64 => self.xxhash64.as_deref(),
            ChecksumKind::Md5 => self.md5.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.get(ChecksumKind::Xxhash64).is_none() && self.get(ChecksumKind::Md5).is_none()
    }

    /// Whether a response to this client has to carry the legacy digest:
    /// either the client uses it, or the client sent nothing and may adopt
    /// either scheme.
    pub fn needs_legacy(&self) -> bool {
        self.get(ChecksumKind::Md5).is_some() || self.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for kind in [ChecksumKind::Xxhash64, ChecksumKind::Md5] {
            if let Some(value) = self.get(kind)
                && (value.len() != kind.hex_len()
                    || !value.bytes().all(|b| b.is_ascii_hexdigit()))
            {
                return Err(ValidationError::MalformedChecksum {
                    kind: kind.as_str(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Digests of one payload. The primary digest is always present.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PayloadChecksums {
    xxhash64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
}

impl PayloadChecksums {
    pub fn compute(payload: &[u8], include_legacy: bool) -> Self {
        Self::from_fingerprint(xxh64(payload, 0), payload, include_legacy)
    }

    fn from_fingerprint(xxhash64: u64, payload: &[u8], include_legacy: bool) -> Self {
        PayloadChecksums {
            xxhash64: format!("{xxhash64:016x}"),
            md5: include_legacy.then(|| format!("{:x}", Md5::digest(payload))),
        }
    }

    pub fn get(&self, kind: ChecksumKind) -> Option<&str> {
        match kind {
            ChecksumKind::Xxhash64 => Some(&self.xxhash64),
            ChecksumKind::Md5 => self.md5.as_deref(),
        }
    }

    pub fn primary(&self) -> &str {
        &self.xxhash64
    }

    pub fn legacy(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn without_legacy(mut self) -> Self {
        self.md5 = None;
        self
    }

    /// True if any digest the client asserted equals ours. A client asserting
    /// nothing never matches.
    pub fn matches(&self, client: &ClientChecksums) -> bool {
        [ChecksumKind::Xxhash64, ChecksumKind::Md5]
            .into_iter()
            .any(|kind| match (client.get(kind), self.get(kind)) {
                (Some(theirs), Some(ours)) => theirs.eq_ignore_ascii_case(ours),
                _ => false,
            })
    }
}

/// Identifies one payload. Besides where the payload came from, the key
/// carries the payload's own xxh64, so two payloads served at the same
/// generation (e.g. for different platform versions) never share an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DigestKey {
    application: ApplicationId,
    key: ConfigKey,
    generation: Generation,
    fingerprint: u64,
}

impl DigestKey {
    pub fn new(
        application: ApplicationId,
        key: ConfigKey,
        generation: Generation,
        payload: &[u8],
    ) -> Self {
        DigestKey {
            application,
            key,
            generation,
            fingerprint: xxh64(payload, 0),
        }
    }
}

/// Caches checksums per distinct payload.
pub struct ChecksumCache {
    cache: Cache<DigestKey, PayloadChecksums>,
}

impl ChecksumCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        ChecksumCache { cache }
    }

    /// Returns checksums appropriate for `client`, computing and caching them
    /// on a miss. A cached entry without the legacy digest is upgraded when
    /// the client needs it.
    pub fn checksums_for(
        &self,
        key: DigestKey,
        payload: &[u8],
        client: &ClientChecksums,
    ) -> PayloadChecksums {
        let include_legacy = client.needs_legacy();

        let cached = self
            .cache
            .get(&key)
            .filter(|cached| !include_legacy || cached.legacy().is_some());

        let checksums = match cached {
            Some(cached) => cached,
            None => {
                let computed = PayloadChecksums::from_fingerprint(
                    key.fingerprint,
                    payload,
                    include_legacy,
                );
                self.cache.insert(key, computed.clone());
                computed
            }
        };

        if include_legacy {
            checksums
        } else {
            checksums.without_legacy()
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute() {
        let checksums = PayloadChecksums::compute(b"", true);
        assert_eq!(checksums.primary(), "ef46db3751d8e999");
        assert_eq!(checksums.legacy(), Some("d41d8cd98f00b204e9800998ecf8427e"));

        let checksums = PayloadChecksums::compute(b"payload", false);
        assert_eq!(checksums.primary().len(), 16);
        assert_eq!(checksums.legacy(), None);
    }

    #[test]
    fn test_matches() {
        let ours = PayloadChecksums::compute(b"payload", true);

        assert!(!ours.matches(&ClientChecksums::none()));
        assert!(ours.matches(&ClientChecksums::xxhash64(ours.primary())));
        assert!(ours.matches(&ClientChecksums::xxhash64(ours.primary().to_uppercase())));
        assert!(!ours.matches(&ClientChecksums::xxhash64("0000000000000000")));

        let legacy_only = ClientChecksums {
            xxhash64: None,
            md5: ours.legacy().map(str::to_string),
        };
        assert!(ours.matches(&legacy_only));

        // Empty strings count as not asserted
        let empty = ClientChecksums {
            xxhash64: Some(String::new()),
            md5: Some(String::new()),
        };
        assert!(empty.is_empty());
        assert!(!ours.matches(&empty));
    }

    #[test]
    fn test_needs_legacy() {
        assert!(ClientChecksums::none().needs_legacy());
        assert!(!ClientChecksums::xxhash64("ef46db3751d8e999").needs_legacy());
        let both = ClientChecksums {
            xxhash64: Some("ef46db3751d8e999".into()),
            md5: Some("d41d8cd98f00b204e9800998ecf8427e".into()),
        };
        assert!(both.needs_legacy());
    }

    #[test]
    fn test_validate() {
        assert!(ClientChecksums::none().validate().is_ok());
        assert!(ClientChecksums::xxhash64("ef46db3751d8e999").validate().is_ok());
        assert!(matches!(
            ClientChecksums::xxhash64("xyz").validate(),
            Err(ValidationError::MalformedChecksum { kind: "xxhash64", .. })
        ));
        let bad_md5 = ClientChecksums {
            xxhash64: None,
            md5: Some("g".repeat(32)),
        };
        assert!(bad_md5.validate().is_err());
    }

    #[test]
    fn test_cache_upgrades_legacy() {
        let cache = ChecksumCache::new(100, Duration::from_secs(60));
        let key = DigestKey::new(
            ApplicationId::new("t", "a", "i"),
            ConfigKey::new("cloud.config", "sentinel", "node1"),
            3,
            b"payload",
        );

        let primary_only = cache.checksums_for(
            key.clone(),
            b"payload",
            &ClientChecksums::xxhash64("0000000000000000"),
        );
        assert_eq!(primary_only.legacy(), None);

        let both = cache.checksums_for(key.clone(), b"payload", &ClientChecksums::none());
        assert!(both.legacy().is_some());
        assert_eq!(both.primary(), primary_only.primary());

        // The upgraded entry is stripped again for clients that do not need it
        let again = cache.checksums_for(
            key,
            b"payload",
            &ClientChecksums::xxhash64("0000000000000000"),
        );
        assert_eq!(again.legacy(), None);
    }

    #[test]
    fn test_cache_separates_payloads_of_one_generation() {
        let cache = ChecksumCache::new(100, Duration::from_secs(60));
        let key_for = |payload: &[u8]| {
            DigestKey::new(
                ApplicationId::new("t", "a", "i"),
                ConfigKey::new("cloud.config", "sentinel", "node1"),
                5,
                payload,
            )
        };
        let client = ClientChecksums::xxhash64("0000000000000000");

        let first = cache.checksums_for(key_for(b"model-for-8.0"), b"model-for-8.0", &client);
        let second = cache.checksums_for(key_for(b"model-for-8.1"), b"model-for-8.1", &client);

        assert_eq!(first, PayloadChecksums::compute(b"model-for-8.0", false));
        assert_eq!(second, PayloadChecksums::compute(b"model-for-8.1", false));
        assert_ne!(first.primary(), second.primary());
    }
}
