use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{MediaId, Prediction};

/// One line of the final recommendation list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: usize,
    pub media_id: MediaId,
    pub title: Option<String>,
    pub predicted_score: f64,
    pub support: usize,
}

/// Score descending, then support descending, then media id ascending
fn ranking_order(a: &Prediction, b: &Prediction) -> Ordering {
    b.predicted_score
        .total_cmp(&a.predicted_score)
        .then_with(|| b.support.cmp(&a.support))
        .then_with(|| a.media_id.cmp(&b.media_id))
}

/// Sorts predictions into display order
pub fn rank(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(ranking_order);
    predictions
}

/// Ranks predictions, attaches titles and keeps the first `limit`
pub fn rank_with_titles(
    predictions: Vec<Prediction>,
    titles: &BTreeMap<MediaId, String>,
    limit: Option<usize>,
) -> Vec<RankedEntry> {
    rank(predictions)
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, p)| RankedEntry {
            rank: i + 1,
            media_id: p.media_id,
            title: titles.get(&p.media_id).cloned(),
            predicted_score: p.predicted_score,
            support: p.support,
        })
        .collect()
}

/// Plain-text table for terminal output
pub fn render_table(entries: &[RankedEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>4}  {:>6}  {:>7}  title", "rank", "score", "support");
    for entry in entries {
        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| format!("#{}", entry.media_id));
        let _ = writeln!(
            out,
            "{:>4}  {:>6.2}  {:>7}  {}",
            entry.rank, entry.predicted_score, entry.support, title
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(media_id: MediaId, predicted_score: f64, support: usize) -> Prediction {
        Prediction {
            media_id,
            predicted_score,
            support,
        }
    }

    #[test]
    fn test_ranks_by_score_descending() {
        let ranked = rank(vec![
            prediction(1, 6.5, 2),
            prediction(2, 8.0, 1),
            prediction(3, 7.2, 4),
        ]);
        let ids: Vec<MediaId> = ranked.iter().map(|p| p.media_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_equal_scores_prefer_more_support() {
        let ranked = rank(vec![prediction(1, 7.0, 1), prediction(2, 7.0, 3)]);
        assert_eq!(ranked[0].media_id, 2);
        assert_eq!(ranked[1].media_id, 1);
    }

    #[test]
    fn test_full_ties_fall_back_to_media_id() {
        let ranked = rank(vec![prediction(9, 7.0, 2), prediction(4, 7.0, 2)]);
        assert_eq!(ranked[0].media_id, 4);
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let input = vec![
            prediction(5, 7.0, 2),
            prediction(1, 9.0, 1),
            prediction(3, 7.0, 2),
            prediction(2, 7.0, 5),
        ];
        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(rank(input), rank(reversed));
    }

    #[test]
    fn test_rank_with_titles_applies_limit() {
        let mut titles = BTreeMap::new();
        titles.insert(2, "Mushishi".to_string());

        let entries = rank_with_titles(
            vec![prediction(1, 6.0, 1), prediction(2, 9.0, 1), prediction(3, 7.0, 1)],
            &titles,
            Some(2),
        );

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[0].title.as_deref(), Some("Mushishi"));
        assert_eq!(entries[1].media_id, 3);
        assert_eq!(entries[1].title, None);
    }

    #[test]
    fn test_render_table_uses_id_for_missing_title() {
        let entries = rank_with_titles(vec![prediction(42, 7.5, 3)], &BTreeMap::new(), None);
        let table = render_table(&entries);
        assert!(table.contains("#42"));
        assert!(table.contains("7.50"));
    }
}
