/// AniList GraphQL provider
///
/// Query Flow:
/// 1. Ratings: MediaListCollection(status: COMPLETED) → scored entries of one user
/// 2. Lists: aliased COMPLETED + PLANNING collections → media ids with romaji titles
/// 3. Raters: paged Page.mediaList(mediaId, status: COMPLETED) → user ids with a score
///
/// Scores are requested as POINT_10 so they land on the 1-10 scale directly.
use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{
        score_from_point10, AniListCollection, GraphQlError, GraphQlResponse, MediaId,
        MediaLists, MediaListCollectionData, MediaRatersData, Rating, UserData, UserId,
        UserListsData,
    },
    services::providers::RatingSource,
};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const RATERS_PER_PAGE: usize = 50;

const USER_RATINGS_QUERY: &str = r#"
query ($userId: Int) {
  MediaListCollection(userId: $userId, type: ANIME, status: COMPLETED, forceSingleCompletedList: true) {
    lists {
      entries {
        mediaId
        score(format: POINT_10)
      }
    }
  }
}
"#;

const USER_LISTS_QUERY: &str = r#"
query ($userId: Int) {
  completed: MediaListCollection(userId: $userId, type: ANIME, status: COMPLETED, forceSingleCompletedList: true) {
    lists {
      entries {
        mediaId
        score(format: POINT_10)
        media { title { romaji } }
      }
    }
  }
  planned: MediaListCollection(userId: $userId, type: ANIME, status: PLANNING) {
    lists {
      entries {
        mediaId
        media { title { romaji } }
      }
    }
  }
}
"#;

const MEDIA_RATERS_QUERY: &str = r#"
query ($mediaId: Int, $page: Int, $perPage: Int) {
  Page(page: $page, perPage: $perPage) {
    pageInfo {
      hasNextPage
    }
    mediaList(mediaId: $mediaId, status: COMPLETED) {
      userId
      score(format: POINT_10)
    }
  }
}
"#;

const USER_LOOKUP_QUERY: &str = r#"
query ($name: String) {
  User(name: $name) {
    id
  }
}
"#;

#[derive(Clone)]
pub struct AniListSource {
    http_client: HttpClient,
    api_url: String,
    min_interval: Duration,
    /// Shared across clones so concurrent workers are paced together
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl AniListSource {
    pub fn new(api_url: String, timeout: Duration, min_interval: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            api_url,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        Self::new(
            config.api_url.clone(),
            config.request_timeout(),
            Duration::from_millis(config.min_request_interval_ms),
        )
    }

    /// Looks up the numeric id behind a username
    pub async fn resolve_user(&self, name: &str) -> AppResult<UserId> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("Username cannot be empty".to_string()));
        }

        let data: UserData = self.query(USER_LOOKUP_QUERY, json!({ "name": name })).await?;

        data.user
            .map(|u| u.id)
            .ok_or_else(|| AppError::NotFound(format!("AniList user {}", name)))
    }

    /// Waits until the minimum interval since the previous request has passed
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> AppResult<T> {
        self.pace().await;

        let response = self
            .http_client
            .post(&self.api_url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            tracing::debug!(status = %status, body = %truncate(&body, 500), "AniList request failed");
            return Err(classify_status(status, &body));
        }

        let envelope: GraphQlResponse<T> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, body = %truncate(&body, 500), "Failed to deserialize AniList response");
            AppError::ExternalApi(format!("Failed to parse AniList response: {}", e))
        })?;

        match (envelope.data, envelope.errors.first()) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(classify_graphql_error(error)),
            (None, None) => Err(AppError::ExternalApi(
                "AniList response carried neither data nor errors".to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl RatingSource for AniListSource {
    async fn get_user_ratings(&self, user_id: UserId) -> AppResult<Vec<Rating>> {
        let data: MediaListCollectionData = self
            .query(USER_RATINGS_QUERY, json!({ "userId": user_id }))
            .await?;

        let collection = data
            .collection
            .ok_or_else(|| AppError::NotFound(format!("No list data for user {}", user_id)))?;

        let ratings = collection_to_ratings(user_id, &collection);

        tracing::debug!(
            user_id,
            ratings = ratings.len(),
            provider = "anilist",
            "User ratings fetched"
        );

        Ok(ratings)
    }

    async fn get_media_raters(&self, media_id: MediaId, limit: usize) -> AppResult<Vec<UserId>> {
        let mut raters = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1;

        while raters.len() < limit {
            let data: MediaRatersData = self
                .query(
                    MEDIA_RATERS_QUERY,
                    json!({ "mediaId": media_id, "page": page, "perPage": RATERS_PER_PAGE }),
                )
                .await?;

            let Some(page_data) = data.page else {
                if page == 1 {
                    return Err(AppError::NotFound(format!("Media {}", media_id)));
                }
                break;
            };

            for rater in page_data.media_list {
                if score_from_point10(rater.score).is_none() {
                    continue;
                }
                if seen.insert(rater.user_id) {
                    raters.push(rater.user_id);
                    if raters.len() >= limit {
                        break;
                    }
                }
            }

            if !page_data.page_info.has_next_page {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            media_id,
            raters = raters.len(),
            pages = page,
            provider = "anilist",
            "Media raters fetched"
        );

        Ok(raters)
    }

    async fn get_user_media_lists(&self, user_id: UserId) -> AppResult<MediaLists> {
        let data: UserListsData = self
            .query(USER_LISTS_QUERY, json!({ "userId": user_id }))
            .await?;

        if data.completed.is_none() && data.planned.is_none() {
            return Err(AppError::NotFound(format!("No list data for user {}", user_id)));
        }

        let mut lists = MediaLists::default();
        if let Some(completed) = &data.completed {
            lists.completed = media_ids(completed);
            collect_titles(completed, &mut lists.titles);
        }
        if let Some(planned) = &data.planned {
            lists.planned = media_ids(planned);
            collect_titles(planned, &mut lists.titles);
        }

        tracing::info!(
            user_id,
            completed = lists.completed.len(),
            planned = lists.planned.len(),
            provider = "anilist",
            "User media lists fetched"
        );

        Ok(lists)
    }

    fn name(&self) -> &'static str {
        "anilist"
    }
}

fn collection_to_ratings(user_id: UserId, collection: &AniListCollection) -> Vec<Rating> {
    collection
        .lists
        .iter()
        .flat_map(|group| group.entries.iter())
        .map(|entry| Rating::completed(user_id, entry.media_id, score_from_point10(entry.score)))
        .collect()
}

fn media_ids(collection: &AniListCollection) -> Vec<MediaId> {
    let mut seen = HashSet::new();
    collection
        .lists
        .iter()
        .flat_map(|group| group.entries.iter())
        .map(|entry| entry.media_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

fn collect_titles(collection: &AniListCollection, titles: &mut BTreeMap<MediaId, String>) {
    for entry in collection.lists.iter().flat_map(|group| group.entries.iter()) {
        if let Some(romaji) = entry.romaji() {
            titles.entry(entry.media_id).or_insert_with(|| romaji.to_string());
        }
    }
}

/// Timeouts and connection failures are transient; anything else keeps the reqwest error
fn classify_transport(error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() {
        AppError::Unavailable(error.to_string())
    } else {
        AppError::HttpClient(error)
    }
}

fn classify_status(status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::NOT_FOUND {
        let message = serde_json::from_str::<GraphQlResponse<serde_json::Value>>(body)
            .ok()
            .and_then(|r| r.errors.into_iter().next())
            .map(|e| e.message)
            .unwrap_or_else(|| "Not Found".to_string());
        return AppError::NotFound(message);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return AppError::Unavailable(format!("AniList returned status {}", status));
    }

    AppError::InvalidInput(format!(
        "AniList returned status {}: {}",
        status,
        truncate(body, 200)
    ))
}

fn classify_graphql_error(error: &GraphQlError) -> AppError {
    match error.status {
        Some(404) => AppError::NotFound(error.message.clone()),
        Some(429) => AppError::Unavailable(error.message.clone()),
        Some(s) if s >= 500 => AppError::Unavailable(error.message.clone()),
        _ => AppError::ExternalApi(error.message.clone()),
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
