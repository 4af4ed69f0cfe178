use crate::error::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A key in the cluster keyspace, ordered lexicographically by bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The immediate lexicographic successor of this key
    pub fn next(&self) -> Key {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(&self.0);
        bytes.push(0);
        Key(bytes)
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Half-open key range `[key, end_key)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    pub end_key: Key,
}

impl Span {
    pub fn new(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    /// The span covering exactly one key
    pub fn single_key(key: &Key) -> Self {
        Self {
            key: key.clone(),
            end_key: key.next(),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        &self.key <= key && key < &self.end_key
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.key, self.end_key)
    }
}

/// Identifier of a cluster member. Zero means the destination is unknown.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const UNKNOWN: NodeId = NodeId(0);

    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A backup file holding data for part of a restore span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    pub span: Span,
}

/// A unit of restore work: a key range plus the backup files that cover it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSpanEntry {
    pub span: Span,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub progress_idx: u64,
}

impl RestoreSpanEntry {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            files: Vec::new(),
            progress_idx: 0,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        let span = self.span.clone();
        self.files.push(FileRef {
            path: path.into(),
            span,
        });
        self
    }

    pub fn with_progress_idx(mut self, idx: u64) -> Self {
        self.progress_idx = idx;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// An ordered, non-empty group of entries. Its first entry is pre-split
/// before any of the entries are handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub entries: Vec<RestoreSpanEntry>,
}

impl Chunk {
    pub fn new(entries: Vec<RestoreSpanEntry>) -> Self {
        Self { entries }
    }

    pub fn head(&self) -> Option<&RestoreSpanEntry> {
        self.entries.first()
    }
}

/// Input of the split and scatter stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAndScatterSpec {
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub rekeys: Vec<crate::rewrite::Rekey>,
}

impl SplitAndScatterSpec {
    pub fn new(chunks: Vec<Chunk>, rekeys: Vec<crate::rewrite::Rekey>) -> Self {
        Self { chunks, rekeys }
    }

    pub fn total_entries(&self) -> usize {
        self.chunks.iter().map(|c| c.entries.len()).sum()
    }

    pub fn validate(&self) -> Result<()> {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.entries.is_empty() {
                return Err(RestoreError::InvalidSpec(format!("chunk {} is empty", i)));
            }
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let spec: SplitAndScatterSpec = serde_json::from_str(&contents)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Wall clock timestamp, used for split expirations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub wall_time_nanos: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(i64::MAX as u128) as i64)
            .unwrap_or(0);
        Self {
            wall_time_nanos: nanos,
        }
    }

    pub fn add(&self, d: Duration) -> Self {
        let delta = d.as_nanos().min(i64::MAX as u128) as i64;
        Self {
            wall_time_nanos: self.wall_time_nanos.saturating_add(delta),
        }
    }
}

/// Whether the executing context owns the whole keyspace. Only the system
/// tenant may split and scatter ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantScope {
    #[default]
    System,
    Secondary(u64),
}

impl TenantScope {
    pub fn owns_keyspace(&self) -> bool {
        matches!(self, TenantScope::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start: &str, end: &str) -> RestoreSpanEntry {
        RestoreSpanEntry::new(Span::new(start, end))
    }

    #[test]
    fn test_key_next_is_successor() {
        let key = Key::from("a");
        let next = key.next();

        assert_eq!(next.as_bytes(), b"a\x00");
        assert!(key < next);
        assert!(next < Key::from("a\x01"));
        assert!(Span::single_key(&key).contains(&key));
        assert!(!Span::single_key(&key).contains(&next));
    }

    #[test]
    fn test_key_display_escapes() {
        let key = Key::new(vec![b'/', b't', 0x00, 0xff]);
        assert_eq!(key.to_string(), "/t\\x00\\xff");
    }

    #[test]
    fn test_total_entries() {
        let spec = SplitAndScatterSpec::new(
            vec![
                Chunk::new(vec![entry("a", "b"), entry("b", "c")]),
                Chunk::new(vec![entry("c", "d")]),
            ],
            vec![],
        );
        assert_eq!(spec.total_entries(), 3);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_chunk() {
        let spec = SplitAndScatterSpec::new(vec![Chunk::new(vec![])], vec![]);
        assert!(matches!(spec.validate(), Err(RestoreError::InvalidSpec(_))));
    }

    #[test]
    fn test_validate_ignores_span_ends() {
        // Only start keys are split at; end keys are carried as payload.
        let spec = SplitAndScatterSpec::new(vec![Chunk::new(vec![entry("b", "a")])], vec![]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_entry_encoding() {
        let original = entry("a", "b").with_file("backup/1.sst").with_progress_idx(7);
        let decoded = RestoreSpanEntry::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_spec_file_round_trip() {
        let spec = SplitAndScatterSpec::new(vec![Chunk::new(vec![entry("a", "b")])], vec![]);
        let path = std::env::temp_dir().join(format!("restore-spec-{}.json", std::process::id()));

        spec.save(&path).unwrap();
        let loaded = SplitAndScatterSpec::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, spec);
    }

    #[test]
    fn test_timestamp_add() {
        let ts = Timestamp { wall_time_nanos: 10 };
        assert_eq!(ts.add(Duration::from_nanos(5)).wall_time_nanos, 15);
        assert!(Timestamp::now().wall_time_nanos > 0);
    }

    #[test]
    fn test_tenant_scope() {
        assert!(TenantScope::System.owns_keyspace());
        assert!(!TenantScope::Secondary(10).owns_keyspace());
    }
}
