//! In-memory keyword search over a session's local dataset.
//!
//! Scoring is a plain term-occurrence count: every occurrence of a query term
//! in the file body scores 1, a term appearing in the file name scores 2.
//! Files scoring 0 are dropped. This is synchronous and cannot fail.

use crate::models::SearchResult;

/// Rank `dataset` against `query`, best first.
///
/// Each hit carries an excerpt of at most `snippet_chars` characters centred
/// near the first matching term, not the whole file.
pub fn search_local(query: &str, dataset: &[SearchResult], snippet_chars: usize) -> Vec<SearchResult> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchResult> = dataset
        .iter()
        .filter_map(|item| {
            let body = item.snippet.to_lowercase();
            let name = item.file.name.to_lowercase();
            let score: usize = terms
                .iter()
                .map(|t| body.matches(t.as_str()).count() + 2 * usize::from(name.contains(t.as_str())))
                .sum();
            if score == 0 {
                return None;
            }
            Some(SearchResult {
                file: item.file.clone(),
                snippet: excerpt(&item.snippet, &terms, snippet_chars),
                relevance: score as f64,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file.id.cmp(&b.file.id))
    });

    hits
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '.')
        .map(|t| t.trim_matches(|c: char| c == '.' || c == '-'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn excerpt(text: &str, terms: &[String], max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let lower = text.to_lowercase();
    // Offsets from the lowercased copy only line up when lowercasing kept
    // the byte length.
    let first_match = if lower.len() == text.len() {
        terms.iter().filter_map(|t| lower.find(t.as_str())).min()
    } else {
        None
    };

    let mut start = first_match
        .map(|pos| pos.saturating_sub(max_chars / 4))
        .unwrap_or(0);
    while !text.is_char_boundary(start) {
        start -= 1;
    }

    text[start..].chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileRef;

    fn doc(name: &str, body: &str) -> SearchResult {
        SearchResult {
            file: FileRef {
                id: format!("local:{}", name),
                name: name.to_string(),
                containing_path: "notes".to_string(),
            },
            snippet: body.to_string(),
            relevance: 0.0,
        }
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let dataset = vec![doc("a.md", "hello")];
        assert!(search_local("   ", &dataset, 100).is_empty());
    }

    #[test]
    fn test_single_match() {
        let dataset = vec![doc("notes.md", "hello world"), doc("other.md", "nothing here")];
        let hits = search_local("hello", &dataset, 100);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file.name, "notes.md");
        assert_eq!(hits[0].snippet, "hello world");
    }

    #[test]
    fn test_case_insensitive_and_ranked() {
        let dataset = vec![
            doc("one.md", "Rust is fast"),
            doc("two.md", "rust rust RUST"),
        ];
        let hits = search_local("RUST", &dataset, 100);
        assert_eq!(hits[0].file.name, "two.md");
        assert!(hits[0].relevance > hits[1].relevance);
    }

    #[test]
    fn test_file_name_match_scores() {
        let dataset = vec![doc("auth.rs", "fn login() {}"), doc("db.rs", "auth")];
        let hits = search_local("auth", &dataset, 100);
        assert_eq!(hits[0].file.name, "auth.rs");
    }

    #[test]
    fn test_excerpt_is_bounded_and_near_match() {
        let body = format!("{}needle{}", "x".repeat(500), "y".repeat(500));
        let dataset = vec![doc("big.txt", &body)];
        let hits = search_local("needle", &dataset, 100);
        assert_eq!(hits[0].snippet.chars().count(), 100);
        assert!(hits[0].snippet.contains("needle"));
    }

    #[test]
    fn test_excerpt_handles_multibyte_text() {
        let body = format!("{}café needle", "é".repeat(300));
        let dataset = vec![doc("fr.txt", &body)];
        let hits = search_local("needle", &dataset, 50);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.chars().count() <= 50);
    }
}
