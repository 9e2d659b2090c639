use std::collections::HashSet;

use crate::{
    error::{AppError, AppResult},
    models::{CandidateSet, MediaId, MediaLists, UserId},
    services::{
        providers::RatingSource,
        retry::{with_retry, RetryPolicy},
    },
};

/// Bounds on the discovery crawl
#[derive(Debug, Clone)]
pub struct CrawlPolicy {
    /// seed -> media -> users is 2 hops; every further pair repeats the expansion
    /// from the users found in the previous round
    pub hops: usize,
    /// Raters read per media
    pub raters_per_media: usize,
    /// Crawl from planned media as well as completed ones
    pub include_planned: bool,
    pub retry: RetryPolicy,
}

impl Default for CrawlPolicy {
    fn default() -> Self {
        Self {
            hops: 2,
            raters_per_media: 100,
            include_planned: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub rounds: usize,
    pub media_visited: usize,
    /// Media the source had no record of
    pub media_skipped: usize,
    /// Users whose lists could not be expanded in later rounds
    pub users_skipped: usize,
}

#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub seed: UserId,
    pub candidates: CandidateSet,
    pub stats: CrawlStats,
}

/// Discovers users who rated the same media as a seed user
pub struct FrontierCrawler<'a, S: RatingSource + ?Sized> {
    source: &'a S,
    policy: CrawlPolicy,
}

impl<'a, S: RatingSource + ?Sized> FrontierCrawler<'a, S> {
    pub fn new(source: &'a S, policy: CrawlPolicy) -> Self {
        Self { source, policy }
    }

    /// Crawls outwards from `seed` and returns the deduplicated candidates.
    ///
    /// A seed with empty lists yields an empty candidate set rather than an error.
    pub async fn crawl(&self, seed: UserId) -> AppResult<CrawlOutcome> {
        if self.policy.hops < 2 || self.policy.hops % 2 != 0 {
            return Err(AppError::InvalidInput(format!(
                "Crawl hops must be an even number >= 2, got {}",
                self.policy.hops
            )));
        }

        let mut outcome = CrawlOutcome {
            seed,
            candidates: CandidateSet::new(seed),
            stats: CrawlStats::default(),
        };

        let seed_lists = self.fetch_lists(seed).await?;
        let mut frontier = self.crawl_media(&seed_lists);

        if frontier.is_empty() {
            tracing::warn!(seed, "Seed user has no completed or planned media to crawl from");
            return Ok(outcome);
        }

        let rounds = self.policy.hops / 2;
        let mut visited_media: HashSet<MediaId> = HashSet::new();

        for round in 0..rounds {
            outcome.stats.rounds += 1;
            let mut discovered = Vec::new();

            for media_id in frontier.drain(..) {
                if !visited_media.insert(media_id) {
                    continue;
                }

                let raters = with_retry(&self.policy.retry, &format!("media {}", media_id), || {
                    self.source
                        .get_media_raters(media_id, self.policy.raters_per_media)
                })
                .await;

                let raters = match raters {
                    Ok(raters) => raters,
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(media_id, error = %e, "Skipping media without rater data");
                        outcome.stats.media_skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                outcome.stats.media_visited += 1;
                let before = outcome.candidates.len();
                for user_id in raters {
                    if outcome.candidates.insert(user_id) {
                        discovered.push(user_id);
                    }
                }

                tracing::debug!(
                    media_id,
                    new_candidates = outcome.candidates.len() - before,
                    total = outcome.candidates.len(),
                    "Media expanded"
                );
            }

            tracing::info!(
                round = round + 1,
                rounds,
                discovered = discovered.len(),
                total = outcome.candidates.len(),
                "Crawl round finished"
            );

            if round + 1 == rounds {
                break;
            }

            for user_id in discovered {
                match self.fetch_lists(user_id).await {
                    Ok(lists) => frontier.extend(
                        self.crawl_media(&lists)
                            .into_iter()
                            .filter(|m| !visited_media.contains(m)),
                    ),
                    Err(e) if e.is_not_found() => {
                        tracing::warn!(user_id, error = %e, "Skipping user without list data");
                        outcome.stats.users_skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if outcome.candidates.is_empty() {
            tracing::warn!(seed, "Crawl discovered no candidates");
        } else {
            tracing::info!(
                seed,
                candidates = outcome.candidates.len(),
                media_visited = outcome.stats.media_visited,
                media_skipped = outcome.stats.media_skipped,
                "Crawl completed"
            );
        }

        Ok(outcome)
    }

    async fn fetch_lists(&self, user_id: UserId) -> AppResult<MediaLists> {
        with_retry(&self.policy.retry, &format!("user {}", user_id), || {
            self.source.get_user_media_lists(user_id)
        })
        .await
    }

    fn crawl_media(&self, lists: &MediaLists) -> Vec<MediaId> {
        if self.policy.include_planned {
            lists.all_media()
        } else {
            let mut seen = HashSet::new();
            lists
                .completed
                .iter()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockRatingSource;

    fn policy() -> CrawlPolicy {
        CrawlPolicy {
            retry: RetryPolicy::immediate(),
            ..CrawlPolicy::default()
        }
    }

    fn lists(completed: Vec<MediaId>, planned: Vec<MediaId>) -> MediaLists {
        MediaLists {
            completed,
            planned,
            ..MediaLists::default()
        }
    }

    #[tokio::test]
    async fn test_two_hop_crawl_unions_and_deduplicates() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .times(1)
            .returning(|_| Ok(lists(vec![10, 11], vec![12])));
        source
            .expect_get_media_raters()
            .times(3)
            .returning(|media_id, _| match media_id {
                10 => Ok(vec![1, 2, 3]),
                11 => Ok(vec![3, 4]),
                12 => Ok(vec![2, 5]),
                _ => Ok(vec![]),
            });

        let crawler = FrontierCrawler::new(&source, policy());
        let outcome = crawler.crawl(1).await.unwrap();

        assert_eq!(outcome.candidates.to_vec(), vec![2, 3, 4, 5]);
        assert_eq!(outcome.stats.media_visited, 3);
        assert_eq!(outcome.stats.rounds, 1);
    }

    #[tokio::test]
    async fn test_missing_media_is_skipped() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .returning(|_| Ok(lists(vec![10, 11], vec![])));
        source
            .expect_get_media_raters()
            .returning(|media_id, _| match media_id {
                10 => Err(AppError::NotFound("delisted".to_string())),
                _ => Ok(vec![7]),
            });

        let crawler = FrontierCrawler::new(&source, policy());
        let outcome = crawler.crawl(1).await.unwrap();

        assert_eq!(outcome.candidates.to_vec(), vec![7]);
        assert_eq!(outcome.stats.media_skipped, 1);
    }

    #[tokio::test]
    async fn test_exhausted_transient_failure_aborts_crawl() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .returning(|_| Ok(lists(vec![10], vec![])));
        source
            .expect_get_media_raters()
            .times(1)
            .returning(|_, _| Err(AppError::Unavailable("503".to_string())));

        let crawler = FrontierCrawler::new(&source, policy());
        let result = crawler.crawl(1).await;

        assert!(matches!(result, Err(AppError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_empty_seed_lists_yield_empty_candidates() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .returning(|_| Ok(MediaLists::default()));
        source.expect_get_media_raters().never();

        let crawler = FrontierCrawler::new(&source, policy());
        let outcome = crawler.crawl(1).await.unwrap();

        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_planned_media_can_be_left_out() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .returning(|_| Ok(lists(vec![10], vec![12])));
        source
            .expect_get_media_raters()
            .withf(|media_id, _| *media_id == 10)
            .times(1)
            .returning(|_, _| Ok(vec![2]));

        let crawler = FrontierCrawler::new(
            &source,
            CrawlPolicy {
                include_planned: false,
                ..policy()
            },
        );
        let outcome = crawler.crawl(1).await.unwrap();

        assert_eq!(outcome.candidates.to_vec(), vec![2]);
    }

    #[tokio::test]
    async fn test_four_hops_expand_from_discovered_users() {
        let mut source = MockRatingSource::new();
        source
            .expect_get_user_media_lists()
            .returning(|user_id| match user_id {
                1 => Ok(lists(vec![10], vec![])),
                2 => Ok(lists(vec![10, 20], vec![])),
                _ => Err(AppError::NotFound("private".to_string())),
            });
        source
            .expect_get_media_raters()
            .times(2)
            .returning(|media_id, _| match media_id {
                10 => Ok(vec![1, 2, 3]),
                20 => Ok(vec![2, 9]),
                _ => Ok(vec![]),
            });

        let crawler = FrontierCrawler::new(&source, CrawlPolicy { hops: 4, ..policy() });
        let outcome = crawler.crawl(1).await.unwrap();

        assert_eq!(outcome.candidates.to_vec(), vec![2, 3, 9]);
        assert_eq!(outcome.stats.rounds, 2);
        assert_eq!(outcome.stats.users_skipped, 1);
    }

    #[tokio::test]
    async fn test_odd_hops_are_rejected() {
        let source = MockRatingSource::new();
        let crawler = FrontierCrawler::new(&source, CrawlPolicy { hops: 3, ..policy() });
        assert!(matches!(
            crawler.crawl(1).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
