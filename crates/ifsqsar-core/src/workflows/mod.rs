//! # Workflows Module
//!
//! High-level entry points that apply a selection of models to structures given as text.
//!
//! ## Overview
//!
//! Workflows sit on top of the [`ModelRegistry`](crate::engine::registry::ModelRegistry).
//! They parse each input notation (including `{solute}`/`{solvent}` mixtures), skip
//! models whose structure restrictions the input violates, collect one result per model
//! and render everything as delimited text.
//!
//! ## Architecture
//!
//! - **Apply Workflow** ([`apply`]) - Single-structure and batch application, input table
//!   reading and row or column formatting.
//!
//! ## Key Capabilities
//!
//! - **Mixture notation** with per-component parse notes
//! - **Neutral-only models** skipped for charged structures with an explanatory note
//! - **Row and column layouts** with selectable fields and delimiters
//! - **Input echo** that appends results to the original table rows
//! - **Progress reporting** through [`ProgressReporter`](crate::engine::progress::ProgressReporter)

pub mod apply;
