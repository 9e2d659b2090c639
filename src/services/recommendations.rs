use serde::Serialize;

use crate::{
    db::Checkpoint,
    error::{AppError, AppResult},
    models::{MediaLists, Rating, UserId, UserProfile},
    services::{
        providers::RatingSource,
        ranker::{self, RankedEntry},
        retry::{with_retry, RetryPolicy},
        similarity::SimilarityEngine,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
    pub seed: UserId,
    pub ranked: Vec<RankedEntry>,
    /// Planned media left out because no neighbor had rated them
    pub insufficient_support: usize,
    pub neighbors_used: usize,
}

/// Generates a ranked watch list for the seed's planned media
///
/// The seed's lists are fetched live; neighbors come from the harvested
/// profiles in the checkpoint. Fails with `EmptyInput` when the seed has
/// nothing planned.
pub async fn get_recommendations<S: RatingSource + ?Sized>(
    source: &S,
    checkpoint: &Checkpoint,
    seed: UserId,
    engine: &SimilarityEngine,
    retry: &RetryPolicy,
    limit: Option<usize>,
) -> AppResult<Recommendations> {
    let what = format!("user {}", seed);
    let lists = with_retry(retry, &what, || source.get_user_media_lists(seed)).await?;
    let ratings = with_retry(retry, &what, || source.get_user_ratings(seed)).await?;

    let seed_profile = build_seed_profile(seed, ratings, &lists);
    if seed_profile.planned().next().is_none() {
        return Err(AppError::EmptyInput(format!(
            "User {} has no planned media to rank",
            seed
        )));
    }

    if checkpoint.harvested.is_empty() {
        tracing::warn!(seed, "Checkpoint holds no harvested profiles");
    }

    let report = engine.predict(&seed_profile, checkpoint.neighbors(seed));
    let ranked = ranker::rank_with_titles(report.predictions, &lists.titles, limit);

    Ok(Recommendations {
        seed,
        ranked,
        insufficient_support: report.insufficient_support.len(),
        neighbors_used: report.neighbors_used,
    })
}

/// Scored completions plus planned media the seed has not completed
pub fn build_seed_profile(seed: UserId, ratings: Vec<Rating>, lists: &MediaLists) -> UserProfile {
    let mut profile = UserProfile::from_ratings(seed, ratings);
    for media_id in &lists.planned {
        if !lists.completed.contains(media_id) {
            profile.record(Rating::planned(seed, *media_id));
        }
    }
    profile
}
