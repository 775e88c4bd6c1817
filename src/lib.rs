//! Nightingale: an autonomous incident-resolution pipeline. Reacts to CI
//! pipeline failures, proposes a minimal code fix via an LLM, verifies it
//! in an isolated sandbox copy of the repository, scores its own
//! confidence, and either applies the fix or escalates with a report.
//!
//! The core lives in [`orchestrator`], [`reflective`], [`sandbox`],
//! [`llm`], [`workflow`], and [`scoring`]/[`resolution`]. Everything else
//! ([`config`], [`webhook`], [`report`], [`secret`]) is a thin adapter.

pub mod agent;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod reflective;
pub mod report;
pub mod resolution;
pub mod sandbox;
pub mod scoring;
pub mod secret;
pub mod verifier;
pub mod webhook;
pub mod workflow;

pub use domain::assert_weights_sum_to_one;
pub use error::{NightingaleError, Result};
pub use orchestrator::Orchestrator;
