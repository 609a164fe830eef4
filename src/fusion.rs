//! Reciprocal rank fusion over independently ranked result lists.
//!
//! Each retrieval source ranks its own results on its own scale, so raw
//! relevance values cannot be compared across sources. Fusion only looks at
//! positions.
//!
//! # Algorithm
//!
//! 1. For every result at 1-based position `rank` in a source list, add
//!    `1 / (k + rank)` to the score of its `FileRef.id`.
//! 2. Keep one representative per id: the occurrence with the highest
//!    source-local relevance (its snippet and `FileRef` win).
//! 3. Sort by summed score (desc), best individual rank (asc), id (asc).
//! 4. Truncate to `limit`.
//!
//! The result does not depend on the order of the source lists, only on the
//! order within each list.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::models::{FileRef, SearchResult};

/// Conventional damping constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

struct Fused {
    file: FileRef,
    snippet: String,
    best_relevance: f64,
    best_rank: usize,
    contributions: Vec<f64>,
}

impl Fused {
    fn score(&self) -> f64 {
        // Summing in a fixed order keeps the float result independent of
        // the order the source lists arrived in.
        let mut parts = self.contributions.clone();
        parts.sort_by(|a, b| b.total_cmp(a));
        parts.iter().sum()
    }

    /// Whether `candidate` should replace the stored representative.
    fn is_better(&self, candidate: &SearchResult, rank: usize) -> bool {
        match candidate.relevance.total_cmp(&self.best_relevance) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match rank.cmp(&self.best_rank) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => candidate.snippet < self.snippet,
            },
        }
    }
}

/// Fuse ranked lists into one list of unique files, best first.
pub fn fuse(lists: &[Vec<SearchResult>], k: f64, limit: usize) -> Vec<SearchResult> {
    let mut by_id: HashMap<&str, Fused> = HashMap::new();

    for list in lists {
        for (idx, result) in list.iter().enumerate() {
            let rank = idx + 1;
            let contribution = 1.0 / (k + rank as f64);

            match by_id.entry(result.file.id.as_str()) {
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    entry.contributions.push(contribution);
                    if entry.is_better(result, rank) {
                        entry.file = result.file.clone();
                        entry.snippet = result.snippet.clone();
                        entry.best_relevance = result.relevance;
                    }
                    entry.best_rank = entry.best_rank.min(rank);
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Fused {
                        file: result.file.clone(),
                        snippet: result.snippet.clone(),
                        best_relevance: result.relevance,
                        best_rank: rank,
                        contributions: vec![contribution],
                    });
                }
            }
        }
    }

    let mut scored: Vec<(f64, Fused)> = by_id.into_values().map(|f| (f.score(), f)).collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then(a.best_rank.cmp(&b.best_rank))
            .then(a.file.id.cmp(&b.file.id))
    });

    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, f)| SearchResult {
            file: f.file,
            snippet: f.snippet,
            relevance: score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, snippet: &str, relevance: f64) -> SearchResult {
        SearchResult {
            file: FileRef {
                id: id.to_string(),
                name: format!("{}.md", id),
                containing_path: "docs".to_string(),
            },
            snippet: snippet.to_string(),
            relevance,
        }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.file.id.as_str()).collect()
    }

    #[test]
    fn test_fuse_empty() {
        assert!(fuse(&[], DEFAULT_RRF_K, 10).is_empty());
        assert!(fuse(&[Vec::new(), Vec::new()], DEFAULT_RRF_K, 10).is_empty());
    }

    #[test]
    fn test_singleton_preserves_order() {
        let list = vec![hit("c", "", 0.1), hit("a", "", 9.0), hit("b", "", 3.0)];
        let fused = fuse(&[list], DEFAULT_RRF_K, 10);
        assert_eq!(ids(&fused), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_contribution_formula() {
        let fused = fuse(&[vec![hit("a", "", 1.0)]], 60.0, 10);
        assert!((fused[0].relevance - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_shared_ids_sum_and_rise() {
        let cloud = vec![hit("x", "", 5.0), hit("shared", "", 4.0)];
        let local = vec![hit("y", "", 2.0), hit("shared", "", 1.0)];
        let fused = fuse(&[cloud, local], DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].file.id, "shared");
        assert!((fused[0].relevance - 2.0 / 62.0).abs() < 1e-12);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_order_of_lists_does_not_matter() {
        let a = vec![hit("1", "a1", 0.9), hit("2", "a2", 0.5), hit("3", "a3", 0.2)];
        let b = vec![hit("4", "b4", 10.0), hit("2", "b2", 7.0)];
        let c = vec![hit("3", "c3", 0.7), hit("5", "c5", 0.6), hit("1", "c1", 0.1)];

        let reference = fuse(&[a.clone(), b.clone(), c.clone()], DEFAULT_RRF_K, 10);
        let perms = [
            vec![a.clone(), c.clone(), b.clone()],
            vec![b.clone(), a.clone(), c.clone()],
            vec![b.clone(), c.clone(), a.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![c.clone(), b.clone(), a.clone()],
        ];
        for lists in perms {
            assert_eq!(fuse(&lists, DEFAULT_RRF_K, 10), reference);
        }
    }

    #[test]
    fn test_within_list_order_matters() {
        let forward = fuse(&[vec![hit("a", "", 1.0), hit("b", "", 1.0)]], DEFAULT_RRF_K, 10);
        let reversed = fuse(&[vec![hit("b", "", 1.0), hit("a", "", 1.0)]], DEFAULT_RRF_K, 10);
        assert_ne!(ids(&forward), ids(&reversed));
    }

    #[test]
    fn test_snippet_from_higher_relevance_occurrence() {
        let a = vec![hit("doc", "weak match", 0.2)];
        let b = vec![hit("doc", "strong match", 0.8)];
        let fused = fuse(&[a.clone(), b.clone()], DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].snippet, "strong match");
        let fused = fuse(&[b, a], DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].snippet, "strong match");
    }

    #[test]
    fn test_dedup_keeps_highest_scores() {
        let a = vec![hit("p", "", 1.0), hit("q", "", 1.0), hit("r", "", 1.0)];
        let b = vec![hit("q", "", 1.0), hit("r", "", 1.0)];
        let fused = fuse(&[a, b], DEFAULT_RRF_K, 2);
        assert_eq!(ids(&fused), vec!["q", "r"]);
        for pair in fused.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
    }

    #[test]
    fn test_truncates_to_limit() {
        let list: Vec<SearchResult> = (0..25).map(|i| hit(&i.to_string(), "", 1.0)).collect();
        assert_eq!(fuse(&[list], DEFAULT_RRF_K, 10).len(), 10);
    }

    #[test]
    fn test_deterministic() {
        let a = vec![hit("m", "", 1.0), hit("n", "", 1.0)];
        let b = vec![hit("n", "", 1.0), hit("m", "", 1.0)];
        let first = fuse(&[a.clone(), b.clone()], DEFAULT_RRF_K, 10);
        for _ in 0..5 {
            assert_eq!(fuse(&[a.clone(), b.clone()], DEFAULT_RRF_K, 10), first);
        }
        // Equal scores and equal best rank fall back to id order.
        assert_eq!(ids(&first), vec!["m", "n"]);
    }
}
