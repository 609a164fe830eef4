//! Turn orchestration.
//!
//! One user turn flows through the system as:
//!
//! ```text
//! user input ─▶ router ─┬─▶ retrieval ─▶ grounded generator
//!                       ├─▶ retrieval ─▶ code suggestion pipeline
//!                       └─▶ chit-chat generator
//! ```
//!
//! Every path mutates the [`SessionStore`] only through its operations.
//! Turns against the same store are expected to run one at a time;
//! `run_turn` takes the store by `&mut`, which enforces that.
//!
//! [`App`] bundles configuration, backends, the store and its persistence
//! for the `gw` binary.

use anyhow::{bail, Context, Result};

use crate::cloud::{create_cloud_index, CloudIndex};
use crate::code_edit::{self, AcceptOutcome};
use crate::config::{Config, RetrievalConfig};
use crate::error::SuggestionError;
use crate::generator::{GeminiGenerator, Generator};
use crate::grounded;
use crate::models::{Attachment, FileRef, Message};
use crate::persistence::{load_snapshot, save_snapshot, FileKeyValueStore, KeyValueStore};
use crate::retrieval::{self, RetrievalOutcome, SourceWarning};
use crate::router::{self, Intent, Pipeline};
use crate::session::SessionStore;

/// Borrowed collaborators a pipeline needs for one turn.
pub struct Backends<'a> {
    pub generator: &'a dyn Generator,
    pub cloud: &'a dyn CloudIndex,
    pub retrieval: &'a RetrievalConfig,
    pub code_generation: bool,
}

/// What happened during a turn, besides the messages it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// `None` when classification was skipped.
    pub intent: Option<Intent>,
    pub pipeline: Pipeline,
    pub advisories: Vec<String>,
    pub warnings: Vec<SourceWarning>,
}

/// Run one user turn against the active session.
pub async fn run_turn(
    store: &mut SessionStore,
    backends: &Backends<'_>,
    text: &str,
    attachment: Option<Attachment>,
) -> Result<TurnReport> {
    let Some(session) = store.active() else {
        bail!("No active session. Create one with `gw sessions new`.");
    };
    let grounding = session.grounding_config;
    let attachment_present = attachment.is_some();

    store.append(Message::user(text, attachment));

    let decision = router::decide(
        backends.generator,
        text,
        &grounding,
        attachment_present,
        backends.code_generation,
    )
    .await;

    let retrieval = match decision.pipeline {
        Pipeline::ChitChat => {
            grounded::run_chit_chat(store, backends).await;
            None
        }
        Pipeline::Grounded => Some(grounded::run_grounded(store, backends).await),
        Pipeline::CodeSuggestion => Some(code_edit::run_code_suggestion(store, backends).await),
    };

    let mut advisories: Vec<String> = decision.advisory.into_iter().collect();
    let mut warnings = Vec::new();
    if let Some(outcome) = retrieval {
        advisories.extend(outcome.advisory);
        warnings = outcome.warnings;
    }

    Ok(TurnReport {
        intent: decision.intent,
        pipeline: decision.pipeline,
        advisories,
        warnings,
    })
}

/// User decision on a rendered suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Accepted(AcceptOutcome),
    Rejected(FileRef),
}

/// Accept or reject the suggestion on message `index`, or on the newest
/// pending suggestion when `index` is `None`.
pub fn resolve_suggestion(
    store: &mut SessionStore,
    index: Option<usize>,
    resolution: Resolution,
) -> Result<Resolved, SuggestionError> {
    if store.active().is_none() {
        return Err(SuggestionError::NoActiveSession);
    }
    let index = match index {
        Some(i) => i,
        None => store
            .latest_pending_suggestion()
            .ok_or(SuggestionError::NonePending)?,
    };

    match resolution {
        Resolution::Accept => code_edit::accept_suggestion(store, index).map(Resolved::Accepted),
        Resolution::Reject => code_edit::reject_suggestion(store, index).map(Resolved::Rejected),
    }
}

// ============ App ============

pub struct App {
    pub config: Config,
    pub store: SessionStore,
    generator: Box<dyn Generator>,
    cloud: Box<dyn CloudIndex>,
    kv: Box<dyn KeyValueStore>,
}

impl App {
    /// Build the production app: Gemini generator, configured cloud index,
    /// file-backed state under `[storage].path`.
    pub fn open(config: Config) -> Result<Self> {
        let generator = GeminiGenerator::new(&config.generator)
            .context("Failed to initialize generator client")?;
        let cloud = create_cloud_index(&config.cloud)?;
        let kv = FileKeyValueStore::open(&config.storage.path)?;
        Ok(Self::with_parts(
            config,
            Box::new(generator),
            cloud,
            Box::new(kv),
        ))
    }

    /// Assemble an app from explicit parts, restoring any saved state.
    pub fn with_parts(
        config: Config,
        generator: Box<dyn Generator>,
        cloud: Box<dyn CloudIndex>,
        kv: Box<dyn KeyValueStore>,
    ) -> Self {
        let store = match load_snapshot(kv.as_ref()) {
            Some(snapshot) => SessionStore::from_snapshot(
                snapshot,
                &config.generator.default_model,
                &config.generator.models,
            ),
            None => SessionStore::new(&config.generator.default_model),
        };

        Self {
            config,
            store,
            generator,
            cloud,
            kv,
        }
    }

    pub fn save(&self) -> Result<()> {
        save_snapshot(self.kv.as_ref(), &self.store.snapshot())
    }

    pub fn cloud(&self) -> &dyn CloudIndex {
        self.cloud.as_ref()
    }

    /// Run a turn in the active session, creating one if needed, and save.
    pub async fn send(&mut self, text: &str, attachment: Option<Attachment>) -> Result<TurnReport> {
        if self.store.active().is_none() {
            self.store.create_session();
        }

        let backends = Backends {
            generator: self.generator.as_ref(),
            cloud: self.cloud.as_ref(),
            retrieval: &self.config.retrieval,
            code_generation: self.config.features.code_generation,
        };
        let report = run_turn(&mut self.store, &backends, text, attachment).await?;
        self.save()?;
        Ok(report)
    }

    /// Like [`App::send`], with `model` selected for this turn only. The
    /// previous selection is restored afterwards, also when the turn fails.
    pub async fn send_with_model(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
        model: &str,
    ) -> Result<TurnReport> {
        let models = self.config.generator.models.clone();
        let previous = self.store.selected_model().to_string();
        self.store.set_selected_model(model, &models)?;

        let report = self.send(text, attachment).await;

        self.store.set_selected_model(&previous, &models)?;
        self.save()?;
        report
    }

    /// Run only retrieval for `query` with the active session's grounding
    /// and dataset.
    pub async fn preview_search(&self, query: &str) -> Result<RetrievalOutcome> {
        let Some(session) = self.store.active() else {
            bail!("No active session. Create one with `gw sessions new`.");
        };
        Ok(retrieval::retrieve(
            self.generator.as_ref(),
            self.cloud.as_ref(),
            query,
            &session.grounding_config,
            &session.local_dataset,
            &self.config.retrieval,
        )
        .await)
    }

    pub fn resolve(&mut self, index: Option<usize>, resolution: Resolution) -> Result<Resolved> {
        let resolved = resolve_suggestion(&mut self.store, index, resolution)?;
        self.save()?;
        Ok(resolved)
    }
}
