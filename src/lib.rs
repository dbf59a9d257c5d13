//! # repochat
//!
//! Ask a remote LLM about uploaded source code, with streamed answers.
//!
//! Uploaded archives and files are reduced to their text artifacts, grouped
//! by upload, and bound to one long-lived model conversation per distinct set
//! of uploads. The first question under a new set seeds the conversation with
//! every artifact; later questions reuse it without re-sending content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌───────────┐
//! │ Extract  │──▶│  Store   │──▶│  Session   │──▶│  Stream   │──▶ snapshots
//! │ zip/file │   │ batches  │   │ key → ctx  │   │ fold text │
//! └──────────┘   └──────────┘   └─────┬──────┘   └───────────┘
//!                                     ▼
//!                               ┌───────────┐
//!                               │ Provider  │  Gemini / scripted
//!                               └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text artifact extraction from archives and files |
//! | [`store`] | Artifact store and session key derivation |
//! | [`provider`] | Remote model provider abstraction |
//! | [`session`] | Session registry and context seeding |
//! | [`stream`] | Prompt selection and answer folding |
//! | [`chat`] | Owning application state and entry points |
//! | [`server`] | HTTP front-end |

pub mod chat;
pub mod config;
pub mod extract;
pub mod models;
pub mod provider;
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
