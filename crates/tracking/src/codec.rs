//! Callback-data codec.
//!
//! Chat platforms cap the opaque data attached to an inline button (64 bytes
//! on Telegram). Browsing a repository needs more state than fits, so the
//! state is kept in a bounded registry and the button carries a short token.
//!
//! A token is a slot key followed by a slot generation. The key is the first
//! `token_len` hex characters of `blake3(salt || serde_json(state))`; on a
//! collision with a different state the salt is incremented, up to
//! `max_probes` times. If every probe slot is held by another state, probe 0
//! is overwritten. Every fill of a slot draws the next generation from a
//! 32-bit counter, so a token whose slot was evicted, overwritten or issued
//! before a restart decodes to [`CodecError::UnknownOrExpiredToken`] and not
//! to the slot's new state.
//!
//! `capacity` is split across the shards; each shard evicts its least
//! recently used entry once full.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CodecError, RepositoryKey};

// ---------------------------------------------------------------------------
// Navigation state
// ---------------------------------------------------------------------------

/// Which listing of a repository is being browsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "v", rename_all = "snake_case")]
pub enum NavigationView {
    /// Repository summary card.
    Home,
    /// Paged release list.
    Releases,
    /// Paged tag list.
    Tags,
    /// Paged contributor list.
    Contributors,
    /// Paged issue list.
    Issues,
    /// Paged file list of the default branch.
    Files,
    /// Assets attached to one release.
    ReleaseAssets {
        /// Tag of the release.
        tag: String,
    },
    /// Download prompt for one release asset.
    Download {
        /// Host-assigned asset id.
        asset_id: u64,
        /// Asset size in bytes.
        size: u64,
    },
}

/// A browsing position that can be re-derived into a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NavigationState {
    /// Repository being browsed.
    pub repository: RepositoryKey,
    /// Current view.
    pub view: NavigationView,
    /// Zero-based page index within the view.
    pub page: u32,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing of the [`CallbackCodec`] registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Length of a token's slot key in hex characters. Tokens are
    /// [`GENERATION_LEN`] characters longer.
    pub token_len: usize,
    /// Maximum token size in bytes accepted by the chat platform.
    pub byte_budget: usize,
    /// Total number of states retained across all shards.
    pub capacity: usize,
    /// Salted probes attempted before overwriting.
    pub max_probes: u32,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            token_len: 16,
            byte_budget: 64,
            capacity: 4096,
            max_probes: 4,
            shards: 16,
        }
    }
}

/// Hex length of a full blake3 digest.
const MAX_TOKEN_LEN: usize = blake3::OUT_LEN * 2;

/// Hex characters appended to the slot key.
pub const GENERATION_LEN: usize = 8;

impl CodecConfig {
    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), CodecError> {
        let invalid = |message: String| Err(CodecError::InvalidConfig { message });
        if self.token_len == 0 || self.byte_budget == 0 || self.capacity == 0 {
            return invalid("token_len, byte_budget and capacity must be non-zero".to_string());
        }
        if self.max_probes == 0 || self.shards == 0 {
            return invalid("max_probes and shards must be non-zero".to_string());
        }
        if self.token_len + GENERATION_LEN > self.byte_budget {
            return invalid(format!(
                "token_len {} plus {GENERATION_LEN} generation characters exceeds byte_budget {}",
                self.token_len, self.byte_budget
            ));
        }
        if self.shards > self.capacity {
            return invalid(format!(
                "shards {} exceeds capacity {}",
                self.shards, self.capacity
            ));
        }
        if self.token_len > MAX_TOKEN_LEN {
            return invalid(format!(
                "token_len {} exceeds the digest length {MAX_TOKEN_LEN}",
                self.token_len
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Slot {
    state: NavigationState,
    generation: u32,
    stamp: u64,
}

/// One independently locked bucket of the registry.
#[derive(Debug)]
struct Shard {
    capacity: usize,
    /// Slot key -> slot.
    entries: HashMap<String, Slot>,
    /// Recency order: stamp -> slot key. Lowest stamp is evicted first.
    recency: BTreeMap<u64, String>,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
        }
    }

    fn touch(&mut self, token: &str, stamp: u64) {
        if let Some(slot) = self.entries.get_mut(token) {
            self.recency.remove(&slot.stamp);
            slot.stamp = stamp;
            self.recency.insert(stamp, token.to_string());
        }
    }

    fn insert(&mut self, key: String, state: NavigationState, generation: u32, stamp: u64) {
        if let Some(previous) = self.entries.remove(&key) {
            self.recency.remove(&previous.stamp);
        }
        while self.entries.len() >= self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.recency.insert(stamp, key.clone());
        self.entries.insert(
            key,
            Slot {
                state,
                generation,
                stamp,
            },
        );
    }
}

/// Bidirectional mapping between [`NavigationState`]s and short tokens.
#[derive(Debug)]
pub struct CallbackCodec {
    config: CodecConfig,
    shards: Vec<Mutex<Shard>>,
    /// Recency stamps.
    clock: AtomicU64,
    /// Slot generations. Starts at a random value so tokens from an earlier
    /// process do not line up with fresh slots.
    generations: AtomicU32,
}

impl CallbackCodec {
    /// Creates a codec after validating `config`.
    pub fn new(config: CodecConfig) -> Result<Self, CodecError> {
        config.validate()?;
        let base = config.capacity / config.shards;
        let extra = config.capacity % config.shards;
        let shards = (0..config.shards)
            .map(|index| Mutex::new(Shard::new(base + usize::from(index < extra))))
            .collect();
        Ok(Self {
            config,
            shards,
            clock: AtomicU64::new(0),
            generations: AtomicU32::new(Uuid::new_v4().as_u128() as u32),
        })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Returns a token for `state`, registering it if needed.
    ///
    /// Encoding the same state again returns the same token while the state
    /// is retained.
    pub fn encode(&self, state: &NavigationState) -> Result<String, CodecError> {
        let serialized = serde_json::to_vec(state).map_err(|e| CodecError::Serialize {
            message: e.to_string(),
        })?;
        let probes: Vec<String> = (0..self.config.max_probes)
            .map(|salt| self.key_for(&serialized, salt))
            .collect();

        // An earlier probe may have been evicted since the state was stored
        // further along, so look at every probe before inserting.
        for key in &probes {
            let mut shard = self.shard(key);
            if let Some(generation) = shard
                .entries
                .get(key)
                .filter(|slot| slot.state == *state)
                .map(|slot| slot.generation)
            {
                shard.touch(key, self.tick());
                return Ok(token(key, generation));
            }
        }

        for key in &probes {
            let mut shard = self.shard(key);
            if !shard.entries.contains_key(key) {
                return Ok(self.fill(&mut shard, key, state));
            }
        }

        let key = &probes[0];
        tracing::debug!(%key, "Callback probes exhausted, overwriting");
        Ok(self.fill(&mut self.shard(key), key, state))
    }

    /// Returns the state registered under `token`.
    pub fn decode(&self, token: &str) -> Result<NavigationState, CodecError> {
        let expired = || CodecError::UnknownOrExpiredToken {
            token: token.to_string(),
        };
        let (key, generation) = self.split(token).ok_or_else(expired)?;
        let mut shard = self.shard(key);
        let state = match shard.entries.get(key) {
            Some(slot) if slot.generation == generation => slot.state.clone(),
            _ => return Err(expired()),
        };
        shard.touch(key, self.tick());
        Ok(state)
    }

    /// Returns the number of retained states.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| lock(shard).entries.len())
            .sum()
    }

    /// Returns `true` if no states are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `state` under `key` with a fresh generation and returns its token.
    fn fill(&self, shard: &mut Shard, key: &str, state: &NavigationState) -> String {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        shard.insert(key.to_string(), state.clone(), generation, self.tick());
        token(key, generation)
    }

    /// Splits a token into its slot key and generation.
    fn split<'a>(&self, token: &'a str) -> Option<(&'a str, u32)> {
        if token.len() != self.config.token_len + GENERATION_LEN || !token.is_ascii() {
            return None;
        }
        let (key, generation) = token.split_at(self.config.token_len);
        Some((key, u32::from_str_radix(generation, 16).ok()?))
    }

    fn key_for(&self, serialized: &[u8], salt: u32) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&salt.to_le_bytes());
        hasher.update(serialized);
        let mut hex = hasher.finalize().to_hex().to_string();
        hex.truncate(self.config.token_len);
        hex
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        let index = blake3::hash(key.as_bytes()).as_bytes()[0] as usize % self.shards.len();
        lock(&self.shards[index])
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

fn token(key: &str, generation: u32) -> String {
    format!("{key}{generation:0width$x}", width = GENERATION_LEN)
}

fn lock(shard: &Mutex<Shard>) -> MutexGuard<'_, Shard> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}
