//! Core domain models for pipelines
//!
//! This module defines the data structures that represent pipelines, jobs,
//! steps, triggers and workers, plus their YAML configuration.

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod trigger;
pub mod worker;

pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
pub use worker::*;
