//! Persists heads and keeps the recent ones in memory.
//!
//! Heads are kept unlinked in an arena keyed by hash, bounded to `history_depth` heights below
//! the highest known head. Chains are rebuilt from the arena by following parent hashes, so a
//! chain whose missing ancestor arrives late is relinked on the next lookup without any fix-up.

use crate::HeadTrackerConfig;
use alloy_primitives::{B256, map::HashMap};
use chainwatch_storage::{HeadStorage, StorageError};
use chainwatch_types::Head;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct HeadArena {
    heads: HashMap<B256, Head>,
    latest: Option<B256>,
}

impl HeadArena {
    /// Inserts detached heads, returns whether anything changed.
    fn add_heads(&mut self, heads: impl IntoIterator<Item = Head>, history_depth: u64) -> bool {
        let mut changed = false;
        for head in heads {
            if self.heads.contains_key(&head.hash) {
                continue;
            }

            let latest_number = self.latest_head().map(|latest| latest.number);
            if latest_number.is_none_or(|number| head.number >= number) {
                self.latest = Some(head.hash);
            }
            self.heads.insert(head.hash, head);
            changed = true;
        }

        if changed {
            self.evict(history_depth);
        }
        changed
    }

    fn evict(&mut self, history_depth: u64) {
        let Some(max_number) = self.latest_head().map(|latest| latest.number) else {
            return;
        };
        let before = self.heads.len();
        self.heads.retain(|_, head| head.number.saturating_add(history_depth) > max_number);

        let evicted = before - self.heads.len();
        if evicted > 0 {
            trace!(target: "chainwatch::head_saver", evicted, max_number, "Evicted old heads");
        }
    }

    fn latest_head(&self) -> Option<&Head> {
        self.latest.and_then(|hash| self.heads.get(&hash))
    }

    /// Links the chain ending at `hash`, at most `lookback` heads long.
    fn chain(&self, hash: B256, lookback: u64) -> Option<Head> {
        let mut members = Vec::new();
        let mut next = self.heads.get(&hash);
        while let Some(head) = next {
            members.push(head);
            if members.len() as u64 >= lookback {
                break;
            }
            next = self.heads.get(&head.parent_hash);
        }

        let mut chain: Option<Head> = None;
        for member in members.into_iter().rev() {
            let mut linked = member.detached();
            if let Some(parent) = chain.take() {
                // A parent with a mismatching number starts a new chain.
                let _ = linked.set_parent(parent);
            }
            chain = Some(linked);
        }
        chain
    }
}

/// Saves heads to storage and keeps an in-memory view of the recent chain.
#[derive(Debug)]
pub struct HeadSaver<DB> {
    db: Arc<DB>,
    config: Arc<HeadTrackerConfig>,
    arena: Mutex<HeadArena>,
}

impl<DB> HeadSaver<DB>
where
    DB: HeadStorage,
{
    /// Creates a saver with an empty in-memory view.
    pub fn new(db: Arc<DB>, config: Arc<HeadTrackerConfig>) -> Self {
        Self { db, config, arena: Mutex::new(HeadArena::default()) }
    }

    fn arena(&self) -> MutexGuard<'_, HeadArena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_depth(&self) -> u64 {
        self.config.history_depth.max(1)
    }

    /// Persists `head` and merges it into the in-memory view.
    ///
    /// Saving a head that is already known is a no-op.
    pub fn save(&self, head: &Head) -> Result<(), StorageError> {
        let inserted = self.db.insert_head(head)?;
        if !inserted {
            trace!(target: "chainwatch::head_saver", number = head.number, hash = %head.hash, "Head already stored");
        }

        self.arena().add_heads([head.detached()], self.history_depth());

        let trimmed = self.db.trim_old_heads(self.history_depth())?;
        if trimmed > 0 {
            trace!(target: "chainwatch::head_saver", trimmed, "Trimmed persisted heads");
        }
        Ok(())
    }

    /// Loads the most recent persisted heads into memory.
    ///
    /// Returns the latest chain, or `None` if nothing was persisted yet.
    pub fn load_from_db(&self) -> Result<Option<Head>, StorageError> {
        // Stored heads are trimmed by height on every save, forks included, so the whole table
        // fits the history.
        let heads = self.db.latest_heads(usize::MAX)?;
        let count = heads.len();
        self.arena().add_heads(heads.into_iter().map(|head| head.detached()), self.history_depth());

        let latest = self.latest_chain();
        if let Some(chain) = &latest {
            debug!(
                target: "chainwatch::head_saver",
                loaded = count,
                number = chain.number,
                chain_length = chain.chain_length(),
                "Loaded heads from storage"
            );
        }
        Ok(latest)
    }

    /// The chain ending at the highest known head. On a tie the most recently saved head wins.
    pub fn latest_chain(&self) -> Option<Head> {
        let arena = self.arena();
        let latest = arena.latest?;
        arena.chain(latest, self.history_depth())
    }

    /// The chain ending at `hash`, if `hash` is known.
    pub fn chain(&self, hash: B256) -> Option<Head> {
        self.arena().chain(hash, self.history_depth())
    }

    /// The head with `hash`, without ancestors.
    pub fn head(&self, hash: B256) -> Option<Head> {
        self.arena().heads.get(&hash).map(Head::detached)
    }

    /// Number of heads kept in memory.
    pub fn len(&self) -> usize {
        self.arena().heads.len()
    }

    /// Whether no head is kept in memory.
    pub fn is_empty(&self) -> bool {
        self.arena().heads.is_empty()
    }
}
