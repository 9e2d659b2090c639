use serde::Deserialize;
use std::time::Duration;

use crate::services::{
    crawler::CrawlPolicy,
    harvester::HarvestPolicy,
    retry::RetryPolicy,
    similarity::{SimilarityMetric, SimilarityPolicy},
};

/// Application configuration loaded from `ANIREC_`-prefixed environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// AniList GraphQL endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Upper bound on a single HTTP request to the rating service. Pacing waits
    /// and further pages of the same call are not counted against it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum spacing between two requests
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Retries for transient failures before a run is aborted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry back-off, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Raters read per media during discovery
    #[serde(default = "default_raters_per_media")]
    pub raters_per_media: usize,

    /// Crawl depth in hops (seed -> media -> users is 2)
    #[serde(default = "default_crawl_hops")]
    pub crawl_hops: usize,

    /// Whether the seed's planned media also seed the crawl
    #[serde(default = "default_true")]
    pub include_planned_in_crawl: bool,

    /// Concurrent profile fetches during a harvest
    #[serde(default = "default_harvest_concurrency")]
    pub harvest_concurrency: usize,

    #[serde(default)]
    pub similarity_metric: SimilarityMetric,

    /// Neighbors need a similarity strictly above this value
    #[serde(default)]
    pub min_similarity: f64,

    /// Co-rated media required before a similarity is defined
    #[serde(default = "default_min_co_rated")]
    pub min_co_rated: usize,
}

fn default_api_url() -> String {
    "https://graphql.anilist.co".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_min_request_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_raters_per_media() -> usize {
    100
}

fn default_crawl_hops() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_harvest_concurrency() -> usize {
    1
}

fn default_min_co_rated() -> usize {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            min_request_interval_ms: default_min_request_interval_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            raters_per_media: default_raters_per_media(),
            crawl_hops: default_crawl_hops(),
            include_planned_in_crawl: true,
            harvest_concurrency: default_harvest_concurrency(),
            similarity_metric: SimilarityMetric::default(),
            min_similarity: 0.0,
            min_co_rated: default_min_co_rated(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::prefixed("ANIREC_")
            .from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry settings for AniList calls. The HTTP client already times out each
    /// request, so attempts carry no outer bound of their own.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            call_timeout: None,
            ..RetryPolicy::default()
        }
    }

    pub fn crawl_policy(&self) -> CrawlPolicy {
        CrawlPolicy {
            hops: self.crawl_hops,
            raters_per_media: self.raters_per_media,
            include_planned: self.include_planned_in_crawl,
            retry: self.retry_policy(),
        }
    }

    pub fn harvest_policy(&self) -> HarvestPolicy {
        HarvestPolicy {
            concurrency: self.harvest_concurrency,
            retry: self.retry_policy(),
        }
    }

    pub fn similarity_policy(&self) -> SimilarityPolicy {
        SimilarityPolicy {
            metric: self.similarity_metric,
            min_similarity: self.min_similarity,
            min_co_rated: self.min_co_rated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_two_hop_positive_only_policy() {
        let config = Config::default();
        assert_eq!(config.crawl_hops, 2);
        assert_eq!(config.min_similarity, 0.0);
        assert_eq!(config.similarity_metric, SimilarityMetric::ConstrainedPearson);
        assert_eq!(config.api_url, "https://graphql.anilist.co");
    }

    #[test]
    fn test_deserialize_partial_env() {
        let vars = vec![
            ("CRAWL_HOPS".to_string(), "4".to_string()),
            ("SIMILARITY_METRIC".to_string(), "cosine".to_string()),
            ("HARVEST_CONCURRENCY".to_string(), "3".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();
        assert_eq!(config.crawl_hops, 4);
        assert_eq!(config.similarity_metric, SimilarityMetric::Cosine);
        assert_eq!(config.harvest_concurrency, 3);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_policies_carry_retry_settings() {
        let config = Config {
            max_retries: 5,
            retry_backoff_ms: 10,
            request_timeout_secs: 2,
            ..Config::default()
        };
        let harvest = config.harvest_policy();
        assert_eq!(harvest.retry.max_retries, 5);
        assert_eq!(harvest.retry.initial_backoff, Duration::from_millis(10));
        assert_eq!(harvest.retry.call_timeout, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
    }
}
