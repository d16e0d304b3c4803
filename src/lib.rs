//! Soul of Waifu keeps conversations with AI characters consistent across
//! several chat backends.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the per-character message ledger, its persistence,
//!   configuration, prompt construction and the [`core::session::Session`]
//!   that runs a turn and fans out to translation, emotion detection and
//!   speech.
//! - [`providers`] adapts each conversation method (Character AI, Mistral,
//!   OpenAI, OpenRouter, a local LLM server) to one streaming interface.
//! - [`character`] models character records and creates them from cards or
//!   from a Character AI lookup.
//! - [`ui`] renders a session on a plain terminal.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod character;
pub mod cli;
pub mod core;
pub mod providers;
pub mod ui;
pub mod utils;
