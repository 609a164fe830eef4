//! # Groundwork
//!
//! A local-first orchestrator that turns a chat message into a grounded,
//! cited, streamed answer or into a single-file code-edit proposal that the
//! user can accept or reject.
//!
//! ## Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!   user message ────▶│    router    │─── chit_chat ─────────────┐
//!                     └──────┬───────┘                           │
//!                            │ grounded / code                   │
//!                            ▼                                   ▼
//!          ┌───────────────────────────────────┐       ┌──────────────────┐
//!          │ retrieval: cloud ║ local  ─▶ RRF   │──────▶│    generator     │
//!          └───────────────────────────────────┘       │ (Gemini, stream) │
//!                                                      └────────┬─────────┘
//!                                                               ▼
//!                                                      ┌──────────────────┐
//!                                                      │  session store   │──▶ state.json
//!                                                      └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gw connect ./my-project          # new session over a local directory
//! gw ask "how is the config loaded?"
//! gw ask "add a timeout option to the config loader"
//! gw suggestion accept
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Sessions, messages, results, suggestions |
//! | [`fusion`] | Reciprocal rank fusion |
//! | [`local_search`] | In-memory keyword search |
//! | [`cloud`] | Full-text search backend client |
//! | [`retrieval`] | Concurrent multi-source retrieval |
//! | [`router`] | Intent classification and routing |
//! | [`generator`] | Model boundary and Gemini client |
//! | [`attribution`] | Grounding metadata normalization |
//! | [`citations`] | `[n]` marker resolution |
//! | [`grounded`] | Streaming grounded and chit-chat answers |
//! | [`code_edit`] | Code suggestion pipeline, accept/reject |
//! | [`session`] | Session state store |
//! | [`persistence`] | Snapshot save/restore |
//! | [`dataset`] | Local directory datasets |
//! | [`orchestrator`] | One user turn, end to end |
//! | [`config`] | TOML configuration |
//! | [`error`] | Typed errors |
//! | [`logging`] | `tracing` setup |
//! | [`render`] | Terminal output |

pub mod attribution;
pub mod citations;
pub mod cloud;
pub mod code_edit;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fusion;
pub mod generator;
pub mod grounded;
pub mod local_search;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod render;
pub mod retrieval;
pub mod router;
pub mod session;
