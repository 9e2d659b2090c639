use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::{
    error::AppResult,
    models::{UserId, UserProfile},
};

pub const CHECKPOINT_VERSION: u32 = 1;

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

/// Durable harvest progress.
///
/// Every id in `harvested` has an entry in `profiles`, and no id is both
/// pending and harvested. `pending` is a queue in discovery order without
/// duplicates, so a resume fetches in the order the candidates were found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub pending: VecDeque<UserId>,
    #[serde(default)]
    pub harvested: BTreeSet<UserId>,
    #[serde(default)]
    pub profiles: BTreeMap<UserId, UserProfile>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            pending: VecDeque::new(),
            harvested: BTreeSet::new(),
            profiles: BTreeMap::new(),
            updated_at: None,
        }
    }
}

impl Checkpoint {
    pub fn is_harvested(&self, user_id: UserId) -> bool {
        self.harvested.contains(&user_id)
    }

    /// Appends ids that are neither harvested nor already pending.
    /// Returns how many were added.
    pub fn enqueue(&mut self, ids: impl IntoIterator<Item = UserId>) -> usize {
        let mut queued: HashSet<UserId> = self.pending.iter().copied().collect();
        let mut added = 0;
        for id in ids {
            if !self.harvested.contains(&id) && queued.insert(id) {
                self.pending.push_back(id);
                added += 1;
            }
        }
        added
    }

    pub fn is_pending(&self, user_id: UserId) -> bool {
        self.pending.contains(&user_id)
    }

    /// Records a finished profile. Already harvested ids are left untouched.
    pub fn mark_harvested(&mut self, profile: UserProfile) -> bool {
        let user_id = profile.user_id;
        if self.harvested.contains(&user_id) {
            return false;
        }
        // the harvested id is usually at the front
        if let Some(pos) = self.pending.iter().position(|id| *id == user_id) {
            self.pending.remove(pos);
        }
        self.harvested.insert(user_id);
        self.profiles.insert(user_id, profile);
        true
    }

    /// Harvested profiles other than `exclude`, in user id order
    pub fn neighbors(&self, exclude: UserId) -> impl Iterator<Item = &UserProfile> + '_ {
        self.profiles
            .values()
            .filter(move |p| p.user_id != exclude && self.harvested.contains(&p.user_id))
    }

    pub fn is_consistent(&self) -> bool {
        let mut queued = HashSet::new();
        self.harvested.iter().all(|id| self.profiles.contains_key(id))
            && self
                .pending
                .iter()
                .all(|id| !self.harvested.contains(id) && queued.insert(*id))
    }

    /// Restores the invariants of a checkpoint written by something else.
    /// Returns the number of ids that had to be moved.
    pub fn repair(&mut self) -> usize {
        let mut repaired = 0;

        let missing: Vec<UserId> = self
            .harvested
            .iter()
            .filter(|id| !self.profiles.contains_key(id))
            .copied()
            .collect();
        for id in missing {
            self.harvested.remove(&id);
            self.pending.push_back(id);
            repaired += 1;
        }

        let mut queued = HashSet::new();
        let before = self.pending.len();
        let harvested = &self.harvested;
        self.pending
            .retain(|id| !harvested.contains(id) && queued.insert(*id));
        repaired += before - self.pending.len();

        repaired
    }
}

/// Single-writer file store for a checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint. A missing or unreadable file starts a fresh one.
    pub async fn load(&self) -> Checkpoint {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No checkpoint found, starting fresh");
                return Checkpoint::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable checkpoint, starting fresh");
                return Checkpoint::default();
            }
        };

        let mut checkpoint: Checkpoint = match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt checkpoint, starting fresh");
                return Checkpoint::default();
            }
        };

        let repaired = checkpoint.repair();
        if repaired > 0 {
            tracing::warn!(path = %self.path.display(), repaired, "Checkpoint invariants repaired on load");
        }

        tracing::info!(
            path = %self.path.display(),
            harvested = checkpoint.harvested.len(),
            pending = checkpoint.pending.len(),
            "Checkpoint loaded"
        );

        checkpoint
    }

    /// Persists the checkpoint atomically: write a sibling temp file, then rename
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> AppResult<()> {
        checkpoint.updated_at = Some(Utc::now());
        let json = serde_json::to_vec(checkpoint)?;

        let tmp_path = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path).await?;

        tracing::debug!(
            path = %self.path.display(),
            harvested = checkpoint.harvested.len(),
            pending = checkpoint.pending.len(),
            bytes = json.len(),
            "Checkpoint flushed"
        );

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;

    fn profile(user_id: UserId) -> UserProfile {
        UserProfile::from_ratings(user_id, vec![Rating::completed(user_id, 1, Some(7))])
    }

    #[test]
    fn test_enqueue_skips_harvested_and_pending() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_harvested(profile(1));
        assert_eq!(checkpoint.enqueue(vec![1, 2, 3, 2]), 2);
        assert_eq!(checkpoint.pending, VecDeque::from([2, 3]));
    }

    #[test]
    fn test_pending_keeps_discovery_order() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.enqueue(vec![9, 3, 5]);
        checkpoint.enqueue(vec![3, 1]);
        checkpoint.mark_harvested(profile(3));
        assert_eq!(checkpoint.pending, VecDeque::from([9, 5, 1]));
        assert!(checkpoint.is_pending(9));
        assert!(!checkpoint.is_pending(3));
    }

    #[test]
    fn test_mark_harvested_moves_out_of_pending() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.enqueue(vec![5]);
        assert!(checkpoint.mark_harvested(profile(5)));
        assert!(checkpoint.pending.is_empty());
        assert!(checkpoint.is_harvested(5));
        assert!(checkpoint.is_consistent());
    }

    #[test]
    fn test_mark_harvested_does_not_overwrite() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_harvested(profile(5));
        assert!(!checkpoint.mark_harvested(UserProfile::new(5)));
        assert!(!checkpoint.profiles[&5].is_empty());
    }

    #[test]
    fn test_repair_restores_invariants() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.harvested.insert(1);
        checkpoint.mark_harvested(profile(2));
        checkpoint.pending.push_back(2);
        checkpoint.pending.push_back(7);
        checkpoint.pending.push_back(7);

        assert!(!checkpoint.is_consistent());
        assert_eq!(checkpoint.repair(), 3);
        assert!(checkpoint.is_consistent());
        assert_eq!(checkpoint.pending, VecDeque::from([7, 1]));
        assert!(checkpoint.is_harvested(2));
    }

    #[test]
    fn test_neighbors_exclude_seed() {
        let mut checkpoint = Checkpoint::default();
        checkpoint.mark_harvested(profile(1));
        checkpoint.mark_harvested(profile(2));
        let ids: Vec<UserId> = checkpoint.neighbors(1).map(|p| p.user_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let mut checkpoint = Checkpoint::default();
        checkpoint.enqueue(vec![3]);
        checkpoint.mark_harvested(profile(4));
        store.save(&mut checkpoint).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded, checkpoint);
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().await, Checkpoint::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, b"{\"pending\": [1, 2").await.unwrap();

        let store = CheckpointStore::new(path);
        assert_eq!(store.load().await, Checkpoint::default());
    }
}
