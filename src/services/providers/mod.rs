/// Rating data source abstraction
///
/// The crawler, harvester and ranker only ever see this trait. The remote
/// tracking service behind it is treated as an opaque query interface.
use crate::{
    error::AppResult,
    models::{MediaId, MediaLists, Rating, UserId},
};

pub mod anilist;

pub use anilist::AniListSource;

/// Trait for rating data providers
///
/// Every call fails with `AppError::NotFound` when the user or media does not
/// exist (or is private), and with `AppError::Unavailable` on transient
/// trouble. Callers rely on that split to decide between skipping and retrying.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RatingSource: Send + Sync {
    /// All completed entries of a user, scored or not
    async fn get_user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>>;

    /// Users who completed and scored a media, at most `limit` of them
    async fn get_media_raters(&self, media_id: MediaId, limit: usize) -> AppResult<Vec<UserId>>;

    /// Completed and planned media of a user
    async fn get_user_media_lists(&self, user_id: UserId) -> AppResult<MediaLists>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
