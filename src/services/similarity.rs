use serde::{Deserialize, Serialize};

use crate::models::{MediaId, Prediction, UserProfile, MAX_SCORE, MIN_SCORE};

/// Midpoint of the rating scale, the neutral point for constrained Pearson
const SCALE_MIDPOINT: f64 = (MIN_SCORE as f64 + MAX_SCORE as f64) / 2.0;

/// How two users' co-rated scores are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine of scores centred on the scale midpoint. Defined for a single
    /// co-rated item, range [-1, 1].
    #[default]
    ConstrainedPearson,
    /// Cosine of scores centred on each user's co-rated mean. Undefined when
    /// either user gave the same score to everything co-rated.
    Pearson,
    /// Cosine of scores centred on each user's mean over everything they scored,
    /// not only the co-rated media. Undefined for users who scored everything alike.
    Cosine,
}

#[derive(Debug, Clone)]
pub struct SimilarityPolicy {
    pub metric: SimilarityMetric,
    /// Neighbors need a similarity strictly above this. Values below zero are
    /// treated as zero: negatively correlated users never contribute.
    pub min_similarity: f64,
    /// Co-rated media needed before a similarity is defined
    pub min_co_rated: usize,
}

impl Default for SimilarityPolicy {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::ConstrainedPearson,
            min_similarity: 0.0,
            min_co_rated: 1,
        }
    }
}

/// A harvested user whose similarity to the seed cleared the threshold
#[derive(Debug, Clone)]
pub struct Neighbor<'p> {
    pub profile: &'p UserProfile,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictionReport {
    /// One per supported planned media, in media id order
    pub predictions: Vec<Prediction>,
    /// Planned media no neighbor had rated
    pub insufficient_support: Vec<MediaId>,
    pub neighbors_used: usize,
    /// Users with too few co-rated media for a similarity
    pub users_without_overlap: usize,
    /// Users with a similarity at or below the threshold
    pub users_below_threshold: usize,
}

pub struct SimilarityEngine {
    policy: SimilarityPolicy,
}

impl SimilarityEngine {
    pub fn new(policy: SimilarityPolicy) -> Self {
        Self { policy }
    }

    /// Similarity over the co-rated set, `None` when it is undefined
    pub fn similarity(&self, a: &UserProfile, b: &UserProfile) -> Option<f64> {
        let pairs: Vec<(f64, f64)> = a
            .scores()
            .filter_map(|(media_id, x)| b.score(media_id).map(|y| (x as f64, y as f64)))
            .collect();

        if pairs.len() < self.policy.min_co_rated.max(1) {
            return None;
        }

        let (center_a, center_b) = match self.policy.metric {
            SimilarityMetric::ConstrainedPearson => (SCALE_MIDPOINT, SCALE_MIDPOINT),
            SimilarityMetric::Pearson => {
                let n = pairs.len() as f64;
                (
                    pairs.iter().map(|(x, _)| x).sum::<f64>() / n,
                    pairs.iter().map(|(_, y)| y).sum::<f64>() / n,
                )
            }
            SimilarityMetric::Cosine => match (mean_score(a), mean_score(b)) {
                (Some(mean_a), Some(mean_b)) => (mean_a, mean_b),
                _ => return None,
            },
        };

        centered_cosine(&pairs, center_a, center_b)
    }

    /// Users with a defined similarity above the threshold
    pub fn neighbors<'p>(
        &self,
        seed: &UserProfile,
        profiles: impl IntoIterator<Item = &'p UserProfile>,
    ) -> (Vec<Neighbor<'p>>, PredictionReport) {
        let threshold = self.policy.min_similarity.max(0.0);
        let mut report = PredictionReport::default();
        let mut neighbors = Vec::new();

        for profile in profiles {
            if profile.user_id == seed.user_id {
                continue;
            }
            match self.similarity(seed, profile) {
                None => report.users_without_overlap += 1,
                Some(similarity) if similarity > threshold => neighbors.push(Neighbor {
                    profile,
                    similarity,
                }),
                Some(_) => report.users_below_threshold += 1,
            }
        }

        report.neighbors_used = neighbors.len();
        (neighbors, report)
    }

    /// Predicts a score for every planned media of the seed that a neighbor rated
    pub fn predict<'p>(
        &self,
        seed: &UserProfile,
        profiles: impl IntoIterator<Item = &'p UserProfile>,
    ) -> PredictionReport {
        let (neighbors, mut report) = self.neighbors(seed, profiles);

        for media_id in seed.planned() {
            if seed.score(media_id).is_some() {
                continue;
            }

            let mut weighted = 0.0;
            let mut weights = 0.0;
            let mut support = 0;
            for neighbor in &neighbors {
                if let Some(score) = neighbor.profile.score(media_id) {
                    weighted += neighbor.similarity * score as f64;
                    weights += neighbor.similarity;
                    support += 1;
                }
            }

            if support == 0 {
                report.insufficient_support.push(media_id);
                continue;
            }

            report.predictions.push(Prediction {
                media_id,
                predicted_score: weighted / weights,
                support,
            });
        }

        tracing::info!(
            seed = seed.user_id,
            neighbors = report.neighbors_used,
            predictions = report.predictions.len(),
            insufficient_support = report.insufficient_support.len(),
            without_overlap = report.users_without_overlap,
            below_threshold = report.users_below_threshold,
            "Predictions computed"
        );

        report
    }
}

fn mean_score(profile: &UserProfile) -> Option<f64> {
    let (sum, count) = profile
        .scores()
        .fold((0.0, 0usize), |(sum, count), (_, score)| (sum + score as f64, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn centered_cosine(pairs: &[(f64, f64)], center_a: f64, center_b: f64) -> Option<f64> {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in pairs {
        let dx = x - center_a;
        let dy = y - center_b;
        dot += dx * dy;
        norm_a += dx * dx;
        norm_b += dy * dy;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}
