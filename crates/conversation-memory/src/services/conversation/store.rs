use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::chat::{MessageId, Track};
use super::types::ConversationTrack;

/// In-memory track storage
/// Both tracks exist from construction; entries are never removed
#[derive(Clone)]
pub struct TrackStore {
    /// Track storage: track -> ConversationTrack
    storage: Arc<DashMap<Track, ConversationTrack>>,

    /// Next message id, seeded from the creation timestamp
    next_id: Arc<AtomicU64>,
}

impl TrackStore {
    pub fn new() -> Self {
        info!("Initializing track store with DashMap");
        let storage = DashMap::with_capacity(Track::ALL.len());
        for track in Track::ALL {
            storage.insert(track, ConversationTrack::new(track));
        }

        let seed = chrono::Utc::now().timestamp_millis().max(0) as u64;

        Self {
            storage: Arc::new(storage),
            next_id: Arc::new(AtomicU64::new(seed)),
        }
    }

    /// Allocate a unique, strictly increasing message id
    pub fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Read a track without cloning it
    pub fn read<R>(&self, track: Track, f: impl FnOnce(&ConversationTrack) -> R) -> R {
        match self.storage.get(&track) {
            Some(entry) => f(entry.value()),
            None => f(&ConversationTrack::new(track)),
        }
    }

    /// Mutate a track under its shard lock. `f` must not block.
    pub fn update<R>(&self, track: Track, f: impl FnOnce(&mut ConversationTrack) -> R) -> R {
        let mut entry = self
            .storage
            .entry(track)
            .or_insert_with(|| ConversationTrack::new(track));
        let result = f(entry.value_mut());
        debug!("Updated {} track ({} messages)", track, entry.len());
        result
    }

    /// Owned copy of a track
    pub fn snapshot(&self, track: Track) -> ConversationTrack {
        self.read(track, |state| state.clone())
    }

    pub fn stats(&self) -> StoreStats {
        let tracks = Track::ALL
            .iter()
            .map(|&track| {
                self.read(track, |state| TrackStats {
                    track,
                    messages: state.len(),
                    has_summary: !state.context_summary.is_empty(),
                })
            })
            .collect();

        StoreStats { tracks }
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Store statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub tracks: Vec<TrackStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackStats {
    pub track: Track,
    pub messages: usize,
    pub has_summary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{Message, Role};

    #[test]
    fn test_store_starts_with_both_tracks_empty() {
        let store = TrackStore::new();
        for track in Track::ALL {
            let state = store.snapshot(track);
            assert_eq!(state.track, track);
            assert!(state.is_empty());
            assert!(state.context_summary.is_empty());
        }
    }

    #[test]
    fn test_message_ids_increase() {
        let store = TrackStore::new();
        let a = store.next_message_id();
        let b = store.next_message_id();
        assert!(b > a);
    }

    #[test]
    fn test_update_is_visible_to_readers() {
        let store = TrackStore::new();
        let id = store.next_message_id();
        store.update(Track::Document, |state| {
            state
                .messages
                .push(Message::new(id, Role::User, "hello", Track::Document, None));
        });

        assert_eq!(store.read(Track::Document, |s| s.len()), 1);
        assert_eq!(store.read(Track::General, |s| s.len()), 0);

        let stats = store.stats();
        assert_eq!(stats.tracks.len(), 2);
        assert_eq!(stats.tracks[1].messages, 1);
    }
}
