//! Grounded streaming generation.
//!
//! Drives one model turn as a stream:
//!
//! 1. Append an empty placeholder message.
//! 2. Retrieve context for the latest user query.
//! 3. Stream an answer, replacing the tail message with the *whole*
//!    accumulated text on every fragment.
//! 4. Finalize with the citation sources and the deduplicated attributions.
//!
//! With no retrieved context, the turn falls back to the generator's
//! external search tools when web or maps search is enabled. Without
//! those the generator is not called, even for a turn with an attachment,
//! and the turn ends with [`NO_RESULTS_MESSAGE`].
//!
//! The chit-chat pipeline shares the same streaming protocol minus
//! retrieval, so it lives here too.

use futures::StreamExt;

use crate::attribution;
use crate::error::GenerateError;
use crate::generator::TextStream;
use crate::models::{Attribution, Message, ResponseKind, SearchResult};
use crate::orchestrator::Backends;
use crate::retrieval::{self, RetrievalOutcome};
use crate::session::SessionStore;

pub const SAFETY_MESSAGE: &str = "I can't help with that request because it was blocked by the model's safety filters. Please rephrase and try again.";

pub const NO_RESULTS_MESSAGE: &str =
    "I couldn't find any relevant information in the connected sources to answer that.";

/// User-facing text for a failed generation.
pub fn failure_message(err: &GenerateError) -> String {
    if err.is_safety() {
        SAFETY_MESSAGE.to_string()
    } else {
        format!("Sorry, something went wrong while generating a response: {}", err)
    }
}

/// Result of draining a generation stream.
#[derive(Debug, Default)]
pub(crate) struct StreamOutcome {
    pub text: String,
    pub attributions: Vec<Attribution>,
    pub error: Option<GenerateError>,
}

/// Drain `stream` in order.
///
/// With `live` set, every text fragment replaces the store's tail message
/// with `template` carrying the full text so far.
pub(crate) async fn consume_stream(
    mut stream: TextStream,
    mut live: Option<(&mut SessionStore, &Message)>,
) -> StreamOutcome {
    let mut outcome = StreamOutcome::default();

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                if let Some(metadata) = &chunk.metadata {
                    attribution::merge_unique(&mut outcome.attributions, attribution::extract(metadata));
                }
                if chunk.text.is_empty() {
                    continue;
                }
                outcome.text.push_str(&chunk.text);
                if let Some((store, template)) = live.as_mut() {
                    let mut message = (*template).clone();
                    message.content = outcome.text.clone();
                    store.replace_tail(message);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, received = outcome.text.len(), "generation stream failed");
                outcome.error = Some(e);
                break;
            }
        }
    }

    outcome
}

/// Build the final message from a drained stream. Partial text survives a
/// failure, followed by the failure notice.
fn finalize(mut template: Message, outcome: StreamOutcome, kind: ResponseKind) -> Message {
    template.external_attributions = outcome.attributions;
    match outcome.error {
        None => {
            template.content = outcome.text;
            template.response_kind = kind;
        }
        Some(err) => {
            let notice = failure_message(&err);
            template.content = if outcome.text.trim().is_empty() {
                notice
            } else {
                format!("{}\n\n{}", outcome.text, notice)
            };
            template.response_kind = ResponseKind::Error;
        }
    }
    template
}

fn failed(template: Message, err: GenerateError) -> Message {
    finalize(
        template,
        StreamOutcome {
            error: Some(err),
            ..StreamOutcome::default()
        },
        ResponseKind::Error,
    )
}

/// Answer the latest user message in the active session from retrieved
/// context. Returns what retrieval reported.
pub async fn run_grounded(store: &mut SessionStore, backends: &Backends<'_>) -> RetrievalOutcome {
    let Some(session) = store.active() else {
        return RetrievalOutcome::default();
    };
    let history = session.messages.clone();
    let grounding = session.grounding_config;
    let dataset = session.local_dataset.clone();
    let query = session.latest_user_query().unwrap_or_default().to_string();
    let model = store.selected_model().to_string();

    store.append(Message::placeholder(&model));

    let outcome = retrieval::retrieve(
        backends.generator,
        backends.cloud,
        &query,
        &grounding,
        &dataset,
        backends.retrieval,
    )
    .await;
    let context: Vec<SearchResult> = outcome.results.clone();

    let kind = if !context.is_empty() {
        ResponseKind::Grounded
    } else if grounding.external_search_enabled() {
        tracing::info!("no document context, answering with external search");
        ResponseKind::ExternalSearch
    } else {
        tracing::info!("no document context and no fallback, skipping generation");
        store.replace_tail(Message::model(
            NO_RESULTS_MESSAGE,
            ResponseKind::Error,
            Some(model),
        ));
        return outcome;
    };

    let mut template = Message::placeholder(&model);
    template.citation_sources = context.clone();

    let message = match backends
        .generator
        .stream_grounded(&model, &history, &context, &grounding)
        .await
    {
        Ok(stream) => {
            let drained = consume_stream(stream, Some((&mut *store, &template))).await;
            finalize(template, drained, kind)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not start grounded generation");
            failed(template, e)
        }
    };

    tracing::info!(
        kind = ?message.response_kind,
        sources = message.citation_sources.len(),
        attributions = message.external_attributions.len(),
        "grounded turn finished"
    );
    store.replace_tail(message);
    outcome
}

/// Conversational reply without retrieval.
pub async fn run_chit_chat(store: &mut SessionStore, backends: &Backends<'_>) {
    let Some(session) = store.active() else {
        return;
    };
    let history = session.messages.clone();
    let model = store.selected_model().to_string();

    store.append(Message::placeholder(&model));
    let template = Message::placeholder(&model);

    let message = match backends.generator.stream_chit_chat(&model, &history).await {
        Ok(stream) => {
            let drained = consume_stream(stream, Some((&mut *store, &template))).await;
            finalize(template, drained, ResponseKind::ChitChat)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not start chit-chat generation");
            failed(template, e)
        }
    };

    store.replace_tail(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::StreamChunk;
    use crate::models::AttributionKind;
    use futures::stream;
    use serde_json::json;

    fn chunks(items: Vec<Result<StreamChunk, GenerateError>>) -> TextStream {
        stream::iter(items).boxed()
    }

    #[test]
    fn test_failure_message_templates() {
        let safety = GenerateError::Safety {
            reason: "SAFETY".into(),
        };
        assert_eq!(failure_message(&safety), SAFETY_MESSAGE);
        let other = GenerateError::Other("boom".into());
        assert_eq!(
            failure_message(&other),
            "Sorry, something went wrong while generating a response: boom"
        );
    }

    #[tokio::test]
    async fn test_tail_holds_full_accumulation() {
        let mut store = SessionStore::new("m");
        store.create_session();
        store.append(Message::placeholder("m"));
        let template = Message::placeholder("m");

        let s = chunks(vec![
            Ok(StreamChunk::text("Hel")),
            Ok(StreamChunk::text("lo")),
            Ok(StreamChunk::text(" world")),
        ]);
        let outcome = consume_stream(s, Some((&mut store, &template))).await;
        assert_eq!(outcome.text, "Hello world");
        assert_eq!(store.tail().unwrap().content, "Hello world");
        assert_eq!(store.active().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn test_attributions_deduplicated_across_stream() {
        let meta = json!({ "groundingMetadata": { "groundingChunks": [
            { "web": { "uri": "https://a", "title": "A" } }
        ] } });
        let s = chunks(vec![
            Ok(StreamChunk {
                text: "one".into(),
                metadata: Some(meta.clone()),
            }),
            Ok(StreamChunk {
                text: String::new(),
                metadata: Some(meta),
            }),
        ]);
        let outcome = consume_stream(s, None).await;
        assert_eq!(outcome.attributions.len(), 1);
        assert_eq!(outcome.attributions[0].kind, AttributionKind::Web);
    }

    #[tokio::test]
    async fn test_partial_content_kept_on_failure() {
        let s = chunks(vec![
            Ok(StreamChunk::text("Partial answer")),
            Err(GenerateError::Safety {
                reason: "SAFETY".into(),
            }),
            Ok(StreamChunk::text("never seen")),
        ]);
        let outcome = consume_stream(s, None).await;
        let message = finalize(Message::placeholder("m"), outcome, ResponseKind::Grounded);
        assert_eq!(message.response_kind, ResponseKind::Error);
        assert!(message.content.starts_with("Partial answer"));
        assert!(message.content.ends_with(SAFETY_MESSAGE));
        assert!(!message.content.contains("never seen"));
    }
}
