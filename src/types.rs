/// Core data types shared by the store, causal engine, and wire protocol.
///
/// The causal context is, by design, an opaque blob to clients: it is passed
/// back unchanged between calls. Internally it is a structured, ordered list
/// so the causal engine can walk it without re-parsing anything.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wall-clock timestamp, seconds since the epoch with microsecond
/// resolution. Used instead of a logical clock per the merge rule in the
/// store: last-write-wins on `last_write`.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A causal predecessor captured at write time: the key observed and the
/// `last_write` timestamp of the entry that was read or written.
pub type CauseEntry = (String, f64);

/// Per-key metadata carried in a causal context entry. Mirrors the fields
/// retained on a stored `Entry`, but never carries the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    pub last_write: f64,
    #[serde(default)]
    pub cause: Vec<CauseEntry>,
    #[serde(default)]
    pub deleted: bool,
}

/// A single per-key record in the store.
///
/// `value` is retained even when `deleted` is set so that the merge
/// comparison has something to keep around; readers must check `deleted`
/// before trusting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Option<String>,
    pub last_write: f64,
    #[serde(default)]
    pub cause: Vec<CauseEntry>,
    #[serde(default)]
    pub deleted: bool,
}

impl Entry {
    pub fn new(value: String, cause: Vec<CauseEntry>) -> Self {
        Self {
            value: Some(value),
            last_write: now_ts(),
            cause,
            deleted: false,
        }
    }

    pub fn context(&self) -> EntryContext {
        EntryContext {
            last_write: self.last_write,
            cause: self.cause.clone(),
            deleted: self.deleted,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// The client-carried causal context: an ordered list of keys the client
/// has observed, paired with the metadata of that observation.
///
/// Accepts `""`, `{}`, `null`, or `[]` on the wire as "no prior
/// observations", in addition to the canonical array-of-pairs encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CausalContext(pub Vec<(String, EntryContext)>);

impl CausalContext {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, ctx: EntryContext) {
        self.0.push((key.into(), ctx));
    }

    pub fn with_appended(&self, key: impl Into<String>, ctx: EntryContext) -> Self {
        let mut next = self.clone();
        next.push(key, ctx);
        next
    }

    /// Projects this context into the `cause` list stored on a new write:
    /// `[(key, meta.last_write), ...]`, order preserved, duplicates allowed.
    pub fn as_cause(&self) -> Vec<CauseEntry> {
        self.0
            .iter()
            .map(|(key, meta)| (key.clone(), meta.last_write))
            .collect()
    }
}

impl<'de> Deserialize<'de> for CausalContext {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(CausalContext::empty()),
            serde_json::Value::String(s) if s.is_empty() => Ok(CausalContext::empty()),
            serde_json::Value::Object(map) if map.is_empty() => Ok(CausalContext::empty()),
            serde_json::Value::Array(_) => {
                let entries: Vec<(String, EntryContext)> =
                    serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(CausalContext(entries))
            }
            other => Err(serde::de::Error::custom(format!(
                "invalid causal-context payload: {other}"
            ))),
        }
    }
}

/// A full shard: the serialized contents of a node's local store, keyed by
/// key. Crosses the wire on `/gossip`, `/shard`, and view-change responses.
pub type Shard = HashMap<String, Entry>;

/// Wire payload for a successful PUT: the stored entry plus whether the key
/// was newly created (201) versus updated in place (200).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutOutcome {
    pub entry: Entry,
    pub created: bool,
}
