use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// AniList user identifier
pub type UserId = u64;

/// AniList media identifier
pub type MediaId = u64;

/// Lowest score on the rating scale
pub const MIN_SCORE: u8 = 1;

/// Highest score on the rating scale
pub const MAX_SCORE: u8 = 10;

/// Where a media entry sits on a user's list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStatus {
    Completed,
    Planned,
    Other,
}

/// A single user's entry for a single media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub media_id: MediaId,
    /// 1-10, `None` when the user never scored it
    pub score: Option<u8>,
    pub status: ListStatus,
}

impl Rating {
    pub fn completed(user_id: UserId, media_id: MediaId, score: Option<u8>) -> Self {
        Self {
            user_id,
            media_id,
            score,
            status: ListStatus::Completed,
        }
    }

    pub fn planned(user_id: UserId, media_id: MediaId) -> Self {
        Self {
            user_id,
            media_id,
            score: None,
            status: ListStatus::Planned,
        }
    }

    /// Completed with a score on the rating scale
    pub fn is_scored(&self) -> bool {
        self.status == ListStatus::Completed
            && self
                .score
                .map(|s| (MIN_SCORE..=MAX_SCORE).contains(&s))
                .unwrap_or(false)
    }

    fn is_profile_relevant(&self) -> bool {
        self.is_scored() || self.status == ListStatus::Planned
    }
}

/// Ratings of one user keyed by media.
///
/// Only scored completions and planned entries are kept. Entries are never
/// replaced once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub ratings: BTreeMap<MediaId, Rating>,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ratings: BTreeMap::new(),
        }
    }

    /// Builds a profile from fetched records, dropping anything not relevant
    pub fn from_ratings(user_id: UserId, ratings: impl IntoIterator<Item = Rating>) -> Self {
        let mut profile = Self::new(user_id);
        for rating in ratings {
            profile.record(rating);
        }
        profile
    }

    /// Adds a rating. Returns false if it was ignored.
    pub fn record(&mut self, rating: Rating) -> bool {
        if rating.user_id != self.user_id || !rating.is_profile_relevant() {
            return false;
        }
        if self.ratings.contains_key(&rating.media_id) {
            return false;
        }
        self.ratings.insert(rating.media_id, rating);
        true
    }

    /// Score for a media the user completed, if known
    pub fn score(&self, media_id: MediaId) -> Option<u8> {
        self.ratings
            .get(&media_id)
            .filter(|r| r.is_scored())
            .and_then(|r| r.score)
    }

    /// (media, score) pairs of scored completions in media order
    pub fn scores(&self) -> impl Iterator<Item = (MediaId, u8)> + '_ {
        self.ratings
            .values()
            .filter(|r| r.is_scored())
            .filter_map(|r| r.score.map(|s| (r.media_id, s)))
    }

    /// Planned media that the user has not completed
    pub fn planned(&self) -> impl Iterator<Item = MediaId> + '_ {
        self.ratings
            .values()
            .filter(|r| r.status == ListStatus::Planned)
            .map(|r| r.media_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

/// Media ids on a user's completed and planned lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaLists {
    pub completed: Vec<MediaId>,
    pub planned: Vec<MediaId>,
    /// Romaji titles where the service returned them
    #[serde(default)]
    pub titles: BTreeMap<MediaId, String>,
}

impl MediaLists {
    /// Completed then planned media, each id once, in list order
    pub fn all_media(&self) -> Vec<MediaId> {
        let mut seen = HashSet::new();
        self.completed
            .iter()
            .chain(self.planned.iter())
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.planned.is_empty()
    }
}

/// Users discovered by the crawler, in discovery order, without duplicates
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    seed: Option<UserId>,
    order: Vec<UserId>,
    seen: HashSet<UserId>,
}

impl CandidateSet {
    pub fn new(seed: UserId) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Builds a set from a stored list, keeping first occurrences
    pub fn from_ids(ids: impl IntoIterator<Item = UserId>) -> Self {
        let mut set = Self::default();
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Adds a user. Returns false for the seed and for duplicates.
    pub fn insert(&mut self, user_id: UserId) -> bool {
        if self.seed == Some(user_id) || !self.seen.insert(user_id) {
            return false;
        }
        self.order.push(user_id);
        true
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.seen.contains(&user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = UserId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_vec(&self) -> Vec<UserId> {
        self.order.clone()
    }
}

/// Predicted score for one planned media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub media_id: MediaId,
    pub predicted_score: f64,
    /// Neighbors that contributed to the score
    pub support: usize,
}

// ============================================================================
// AniList API Types
// ============================================================================

/// GraphQL response envelope
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct MediaListCollectionData {
    #[serde(rename = "MediaListCollection")]
    pub collection: Option<AniListCollection>,
}

/// Completed and planning collections fetched in one aliased query
#[derive(Debug, Deserialize)]
pub struct UserListsData {
    pub completed: Option<AniListCollection>,
    pub planned: Option<AniListCollection>,
}

#[derive(Debug, Deserialize)]
pub struct AniListCollection {
    #[serde(default)]
    pub lists: Vec<AniListGroup>,
}

#[derive(Debug, Deserialize)]
pub struct AniListGroup {
    #[serde(default)]
    pub entries: Vec<AniListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListEntry {
    pub media_id: MediaId,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub media: Option<AniListMedia>,
}

impl AniListEntry {
    pub fn romaji(&self) -> Option<&str> {
        self.media.as_ref().and_then(|m| m.title.romaji.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct AniListMedia {
    pub title: AniListTitle,
}

#[derive(Debug, Deserialize)]
pub struct AniListTitle {
    #[serde(default)]
    pub romaji: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaRatersData {
    #[serde(rename = "Page")]
    pub page: Option<AniListPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListPage {
    pub page_info: AniListPageInfo,
    #[serde(default)]
    pub media_list: Vec<AniListRater>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListPageInfo {
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AniListRater {
    pub user_id: UserId,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    #[serde(rename = "User")]
    pub user: Option<AniListUser>,
}

#[derive(Debug, Deserialize)]
pub struct AniListUser {
    pub id: UserId,
}

/// Converts a `POINT_10` score to the rating scale. AniList uses 0 for "unscored".
pub fn score_from_point10(raw: Option<f64>) -> Option<u8> {
    match raw {
        Some(s) if s > 0.0 => Some(s.round().clamp(MIN_SCORE as f64, MAX_SCORE as f64) as u8),
        _ => None,
    }
}
