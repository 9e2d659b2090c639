use futures::{pin_mut, stream, StreamExt};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    db::{Checkpoint, CheckpointStore},
    error::AppResult,
    models::{CandidateSet, UserId, UserProfile},
    services::{
        providers::RatingSource,
        retry::{with_retry, RetryPolicy},
    },
};

#[derive(Debug, Clone)]
pub struct HarvestPolicy {
    /// Profile fetches in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for HarvestPolicy {
    fn default() -> Self {
        Self {
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub candidates: usize,
    /// Already harvested before this run
    pub skipped: usize,
    pub fetched: usize,
    /// Deleted or private users, stored with an empty profile
    pub not_found: usize,
}

/// Fetches candidate profiles into a checkpoint, flushing after every id
pub struct Harvester<'a, S: RatingSource + ?Sized> {
    source: &'a S,
    store: &'a CheckpointStore,
    policy: HarvestPolicy,
}

impl<'a, S: RatingSource + ?Sized> Harvester<'a, S> {
    pub fn new(source: &'a S, store: &'a CheckpointStore, policy: HarvestPolicy) -> Self {
        Self {
            source,
            store,
            policy,
        }
    }

    /// Harvests every candidate not yet in the checkpoint.
    ///
    /// Candidates are processed in the given order. Fetches run concurrently up
    /// to the policy limit but results are applied and flushed one at a time, in
    /// order. A transient failure that outlasts the retries aborts the run; the
    /// checkpoint on disk keeps everything flushed before it.
    pub async fn harvest(
        &self,
        candidates: &[UserId],
        checkpoint: &mut Checkpoint,
    ) -> AppResult<HarvestReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("harvest", run_id = %run_id, provider = self.source.name());

        self.run(candidates, checkpoint).instrument(span).await
    }

    /// Resumes the ids left pending in the checkpoint, in the order they were queued
    pub async fn harvest_pending(&self, checkpoint: &mut Checkpoint) -> AppResult<HarvestReport> {
        let pending: Vec<UserId> = checkpoint.pending.iter().copied().collect();
        self.harvest(&pending, checkpoint).await
    }

    async fn run(
        &self,
        candidates: &[UserId],
        checkpoint: &mut Checkpoint,
    ) -> AppResult<HarvestReport> {
        let candidates = CandidateSet::from_ids(candidates.iter().copied());
        let todo: Vec<UserId> = candidates
            .iter()
            .filter(|id| !checkpoint.is_harvested(*id))
            .collect();

        let mut report = HarvestReport {
            candidates: candidates.len(),
            skipped: candidates.len() - todo.len(),
            ..HarvestReport::default()
        };

        if todo.is_empty() {
            tracing::info!(
                candidates = report.candidates,
                "All candidates already harvested"
            );
            return Ok(report);
        }

        if checkpoint.enqueue(todo.iter().copied()) > 0 {
            self.store.save(checkpoint).await?;
        }

        tracing::info!(
            candidates = report.candidates,
            skipped = report.skipped,
            remaining = todo.len(),
            concurrency = self.policy.concurrency.max(1),
            "Starting harvest"
        );

        let total = todo.len();
        let results = stream::iter(todo)
            .map(|user_id| self.fetch_profile(user_id))
            .buffered(self.policy.concurrency.max(1));
        pin_mut!(results);

        let mut done = 0;
        while let Some((user_id, result)) = results.next().await {
            let profile = match result {
                Ok(profile) => {
                    report.fetched += 1;
                    profile
                }
                Err(e) if e.is_not_found() => {
                    tracing::warn!(user_id, error = %e, "User unavailable for good, storing empty profile");
                    report.not_found += 1;
                    UserProfile::new(user_id)
                }
                Err(e) => {
                    tracing::error!(
                        user_id,
                        error = %e,
                        fetched = report.fetched,
                        remaining = total - done,
                        "Harvest aborted, checkpoint keeps progress so far"
                    );
                    return Err(e);
                }
            };

            let ratings = profile.ratings.len();
            checkpoint.mark_harvested(profile);
            self.store.save(checkpoint).await?;
            done += 1;

            tracing::info!(user_id, ratings, progress = done, total, "Profile harvested");
        }

        tracing::info!(
            fetched = report.fetched,
            not_found = report.not_found,
            skipped = report.skipped,
            "Harvest completed"
        );

        Ok(report)
    }

    async fn fetch_profile(&self, user_id: UserId) -> (UserId, AppResult<UserProfile>) {
        let result = with_retry(&self.policy.retry, &format!("user {}", user_id), || {
            self.source.get_user_ratings(user_id)
        })
        .await
        .map(|ratings| UserProfile::from_ratings(user_id, ratings));

        (user_id, result)
    }
}
