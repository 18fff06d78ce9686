//! unnatural - naturalness-based defect localization
//!
//! Source is lexed into a [`lexer::Source`], scrubbed, and scored window by
//! window against a token n-gram model running in a separate engine process
//! ([`model::ModelManager`]). Windows the model finds most surprising are the
//! most likely to hold a defect. The [`validate`] module measures how well
//! that works by mutating known-good files, running them in a [`sandbox`],
//! and recording where the mutated line ranks.

pub mod cli;
pub mod config;
pub mod engine;
pub mod lexer;
pub mod model;
pub mod mutation;
pub mod sandbox;
pub mod scorer;
pub mod service;
pub mod validate;
