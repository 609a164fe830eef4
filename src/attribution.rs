//! Normalizing provider grounding metadata into [`Attribution`]s.
//!
//! Providers report external sources in several places depending on the
//! model and the tool that produced them. [`EXTRACTORS`] lists the known
//! locations in priority order; [`extract`] returns the output of the first
//! extractor that yields anything. Within `groundingChunks`, each entry is
//! probed for `web`, then `maps`, then `retrievedContext`.

use serde_json::Value;

use crate::models::{Attribution, AttributionKind};

type Extractor = fn(&Value) -> Vec<Attribution>;

/// Ordered extractor table, tried first to last.
pub const EXTRACTORS: &[(&str, Extractor)] = &[
    ("groundingMetadata.groundingChunks", from_grounding_chunks),
    ("groundingAttributions", from_grounding_attributions),
    ("citationMetadata.citationSources", from_citation_sources),
];

/// Attributions carried by one candidate's metadata.
pub fn extract(metadata: &Value) -> Vec<Attribution> {
    for (name, extractor) in EXTRACTORS {
        let found = extractor(metadata);
        if !found.is_empty() {
            tracing::debug!(location = name, count = found.len(), "extracted attributions");
            return found;
        }
    }
    Vec::new()
}

/// Append `incoming` to `acc`, skipping URIs already present.
pub fn merge_unique(acc: &mut Vec<Attribution>, incoming: Vec<Attribution>) {
    for attribution in incoming {
        if !acc.iter().any(|a| a.uri == attribution.uri) {
            acc.push(attribution);
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn build(kind: AttributionKind, node: &Value, uri_key: &str) -> Option<Attribution> {
    let uri = str_field(node, uri_key)?;
    let title = str_field(node, "title").unwrap_or(uri);
    Some(Attribution {
        kind,
        uri: uri.to_string(),
        title: title.to_string(),
    })
}

fn from_chunk(chunk: &Value) -> Option<Attribution> {
    if let Some(web) = chunk.get("web") {
        if let Some(a) = build(AttributionKind::Web, web, "uri") {
            return Some(a);
        }
    }
    if let Some(maps) = chunk.get("maps") {
        if let Some(a) = build(AttributionKind::Maps, maps, "uri") {
            return Some(a);
        }
    }
    chunk
        .get("retrievedContext")
        .and_then(|ctx| build(AttributionKind::Web, ctx, "uri"))
}

fn from_grounding_chunks(metadata: &Value) -> Vec<Attribution> {
    metadata
        .pointer("/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
        .map(|chunks| chunks.iter().filter_map(from_chunk).collect())
        .unwrap_or_default()
}

fn from_grounding_attributions(metadata: &Value) -> Vec<Attribution> {
    metadata
        .get("groundingAttributions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("web").or_else(|| item.get("segment")))
                .filter_map(|node| build(AttributionKind::Web, node, "uri"))
                .collect()
        })
        .unwrap_or_default()
}

fn from_citation_sources(metadata: &Value) -> Vec<Attribution> {
    metadata
        .pointer("/citationMetadata/citationSources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|node| build(AttributionKind::Web, node, "uri"))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grounding_chunks_web_and_maps() {
        let metadata = json!({
            "groundingMetadata": { "groundingChunks": [
                { "web": { "uri": "https://example.com", "title": "Example" } },
                { "maps": { "uri": "https://maps.example/p", "title": "Cafe" } },
                { "web": { "title": "no uri" } }
            ] }
        });
        let found = extract(&metadata);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, AttributionKind::Web);
        assert_eq!(found[1].kind, AttributionKind::Maps);
        assert_eq!(found[1].title, "Cafe");
    }

    #[test]
    fn test_first_non_empty_location_wins() {
        let metadata = json!({
            "groundingMetadata": { "groundingChunks": [] },
            "groundingAttributions": [ { "web": { "uri": "https://b", "title": "B" } } ],
            "citationMetadata": { "citationSources": [ { "uri": "https://c" } ] }
        });
        let found = extract(&metadata);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "https://b");
    }

    #[test]
    fn test_citation_sources_title_defaults_to_uri() {
        let metadata = json!({ "citationMetadata": { "citationSources": [ { "uri": "https://c" } ] } });
        let found = extract(&metadata);
        assert_eq!(found[0].title, "https://c");
    }

    #[test]
    fn test_unknown_shape_yields_nothing() {
        assert!(extract(&json!({ "something": "else" })).is_empty());
    }

    #[test]
    fn test_merge_unique_dedups_by_uri() {
        let a = |uri: &str, title: &str| Attribution {
            kind: AttributionKind::Web,
            uri: uri.to_string(),
            title: title.to_string(),
        };
        let mut acc = vec![a("https://x", "X")];
        merge_unique(&mut acc, vec![a("https://x", "X again"), a("https://y", "Y"), a("https://y", "Y2")]);
        assert_eq!(acc.len(), 2);
        assert_eq!(acc[0].title, "X");
        assert_eq!(acc[1].uri, "https://y");
    }
}
