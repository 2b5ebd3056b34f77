//! # ragchat
//!
//! A retrieval-augmented chat backend. Documents are chunked and embedded
//! into a similarity index; chat messages are answered by a generation
//! model conditioned on the most relevant chunks and the recent
//! conversation.
//!
//! The domain logic lives in [`ragchat_core`]. This crate supplies the
//! adapters around it: TOML configuration, a SQLite store, HTTP model
//! providers, the JSON API server, and the `ragchat` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ CLI/HTTP │──▶│ Orchestrator │──▶│  SQLite  │
//! └──────────┘   └──────┬───────┘   └──────────┘
//!                       │
//!            ┌──────────┴──────────┐
//!            ▼                     ▼
//!      ┌───────────┐        ┌────────────┐
//!      │ Embedding │        │ Generation │
//!      │ provider  │        │  provider  │
//!      └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init
//! ragchat ingest ./notes/solar.md
//! ragchat ingest ./papers --glob '**/*.pdf'
//! ragchat chat new --title "Energy"
//! ragchat ask <chat-id> "How do solar panels work?"
//! ragchat serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | `Store` implementation on SQLite |
//! | [`http`] | Retrying JSON calls to model services |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generation providers |
//! | [`app`] | Config to orchestrator wiring |
//! | [`server`] | JSON HTTP API |
//! | [`commands`] | CLI command implementations |
//! | [`extract`] | File discovery and PDF/text extraction for ingest |
//! | [`logging`] | tracing subscriber setup |

pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
