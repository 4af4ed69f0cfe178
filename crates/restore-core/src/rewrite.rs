//! Backup-time to restore-time key rewriting
//!
//! A restore writes data under different key prefixes than the ones it was
//! backed up from (new table ids, a different tenant). The rewrite table
//! lists those prefix substitutions; the rewriter applies the most specific
//! one to each key.

use crate::error::{RestoreError, Result};
use crate::types::Key;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single prefix substitution rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rekey {
    pub old_prefix: Key,
    pub new_prefix: Key,
}

impl Rekey {
    pub fn new(old_prefix: impl Into<Key>, new_prefix: impl Into<Key>) -> Self {
        Self {
            old_prefix: old_prefix.into(),
            new_prefix: new_prefix.into(),
        }
    }
}

/// Maps keys from the backup keyspace into the restore keyspace
#[derive(Debug, Clone)]
pub struct KeyRewriter {
    /// Rules sorted by descending prefix length, so the first match is the
    /// most specific one
    rules: Vec<Rekey>,
}

impl KeyRewriter {
    pub fn from_rekeys(rekeys: &[Rekey]) -> Result<Self> {
        let mut seen = HashSet::new();
        for rekey in rekeys {
            if rekey.old_prefix.is_empty() {
                return Err(RestoreError::InvalidRekey(
                    "rekey has an empty old prefix".to_string(),
                ));
            }
            if !seen.insert(rekey.old_prefix.clone()) {
                return Err(RestoreError::InvalidRekey(format!(
                    "duplicate rekey for prefix {}",
                    rekey.old_prefix
                )));
            }
        }

        let mut rules = rekeys.to_vec();
        rules.sort_by(|a, b| b.old_prefix.0.len().cmp(&a.old_prefix.0.len()));
        Ok(Self { rules })
    }

    pub fn rewrite_key(&self, key: &Key) -> Result<Key> {
        let rule = self
            .rules
            .iter()
            .find(|r| key.starts_with(r.old_prefix.as_bytes()))
            .ok_or_else(|| RestoreError::NoRewriteRule {
                key: key.to_string(),
            })?;

        let suffix = &key.as_bytes()[rule.old_prefix.0.len()..];
        let mut rewritten = Vec::with_capacity(rule.new_prefix.0.len() + suffix.len());
        rewritten.extend_from_slice(rule.new_prefix.as_bytes());
        rewritten.extend_from_slice(suffix);
        Ok(Key(rewritten))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
