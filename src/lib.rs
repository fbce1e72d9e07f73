// Storage and synchronization core for the strata analytical graph database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

pub mod layer;
pub mod rocksdb;

pub use layer::Layer;

/// Milliseconds since the Unix epoch.
///
/// Used for edit metadata timestamps, `.created` values, and interval
/// boundaries. Stored big-endian in keys so byte order matches time order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimestampMilli(pub u64);

impl TimestampMilli {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        TimestampMilli(millis)
    }

    #[inline]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// The earlier of two timestamps. Used by earliest-wins merge policies.
    pub fn min(self, other: Self) -> Self {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for TimestampMilli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary node identifier: 16 bytes derived deterministically from a node's
/// form name and the index-key encoding of its primary property value.
///
/// Immutable for the life of the node and used as the primary key for all
/// node-scoped storage. Two layers deriving the same (form, value) pair
/// always produce the same buid, which is what makes cross-layer replication
/// converge.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Buid([u8; 16]);

impl Buid {
    /// Size of a buid in bytes (always 16).
    pub const SIZE: usize = 16;

    /// Derive a buid from a form name and the encoded primary value.
    ///
    /// The form and value bytes are separated by a NUL so that
    /// ("ab", "c") and ("a", "bc") cannot collide structurally.
    pub fn derive(form: &str, primary_key: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(form.len() + 1 + primary_key.len());
        buf.extend_from_slice(form.as_bytes());
        buf.push(0u8);
        buf.extend_from_slice(primary_key);
        Buid(xxh3_128(&buf).to_be_bytes())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Buid(bytes)
    }

    /// Parse from a slice, validating length.
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() != Self::SIZE {
            anyhow::bail!("Invalid buid length: expected {}, got {}", Self::SIZE, bytes.len());
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(bytes);
        Ok(Buid(buf))
    }
}

impl std::fmt::Debug for Buid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buid({})", self)
    }
}

impl std::fmt::Display for Buid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Identity of an upstream edit source.
///
/// Each upstream layer a local layer pulls from has a stable SourceId; the
/// per-source replication cursor is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    /// Generate a new random source identity.
    pub fn new() -> Self {
        SourceId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        SourceId(uuid)
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(SourceId(Uuid::parse_str(s)?))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(SourceId(Uuid::from_slice(bytes)?))
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buid_deterministic() {
        let a = Buid::derive("inet:ipv4", &[0, 0, 0, 1]);
        let b = Buid::derive("inet:ipv4", &[0, 0, 0, 1]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_buid_form_separation() {
        // The NUL separator keeps (form, value) splits structurally distinct.
        let a = Buid::derive("ab", b"c");
        let b = Buid::derive("a", b"bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_buid_roundtrip() {
        let buid = Buid::derive("test:form", b"value");
        let recovered = Buid::from_slice(buid.as_bytes()).unwrap();
        assert_eq!(buid, recovered);

        assert!(Buid::from_slice(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_buid_display_hex() {
        let buid = Buid::from_bytes([0xab; 16]);
        assert_eq!(format!("{}", buid), "ab".repeat(16));
    }

    #[test]
    fn test_timestamp_min() {
        let t1 = TimestampMilli(100);
        let t2 = TimestampMilli(200);
        assert_eq!(t1.min(t2), t1);
        assert_eq!(t2.min(t1), t1);
    }

    #[test]
    fn test_source_id_parse() {
        let id = SourceId::new();
        let parsed = SourceId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SourceId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_source_id_bytes_roundtrip() {
        let id = SourceId::new();
        let recovered = SourceId::from_slice(id.as_bytes()).unwrap();
        assert_eq!(id, recovered);
    }
}
