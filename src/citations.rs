//! Citation marker resolution.
//!
//! Generated text cites context passages as `[n]`, 1-based into the
//! message's `citation_sources`. [`resolve`] splits text into plain segments
//! and resolved citations. A marker with index 0 or past the end of the
//! source list stays literal text.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::SearchResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment<'a> {
    Text(&'a str),
    Citation {
        number: usize,
        source: &'a SearchResult,
    },
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation regex is valid"))
}

/// Source for 1-based marker `number`, if it is in range.
pub fn lookup(number: usize, sources: &[SearchResult]) -> Option<&SearchResult> {
    number.checked_sub(1).and_then(|i| sources.get(i))
}

/// Split `text` into literal and citation segments.
pub fn resolve<'a>(text: &'a str, sources: &'a [SearchResult]) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in marker_regex().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let source = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|n| lookup(n, sources).map(|s| (n, s)));

        let Some((number, source)) = source else {
            continue;
        };

        if whole.start() > last {
            segments.push(Segment::Text(&text[last..whole.start()]));
        }
        segments.push(Segment::Citation { number, source });
        last = whole.end();
    }

    if last < text.len() {
        segments.push(Segment::Text(&text[last..]));
    }

    segments
}

/// 1-based source numbers actually cited in `text`, in first-use order.
pub fn cited_numbers(text: &str, sources: &[SearchResult]) -> Vec<usize> {
    let mut numbers = Vec::new();
    for segment in resolve(text, sources) {
        if let Segment::Citation { number, .. } = segment {
            if !numbers.contains(&number) {
                numbers.push(number);
            }
        }
    }
    numbers
}
