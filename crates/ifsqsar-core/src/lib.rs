//! # IFSQSAR Core Library
//!
//! A library for applying fragment-based QSAR (quantitative structure-activity
//! relationship) models to chemical structures, with applicability-domain assessment
//! and uncertainty levels for every prediction.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless model definitions, the instruction set, the
//!   structure-matching trait, definition file I/O and the similarity and leverage
//!   mathematics.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer. It counts fragments, runs the
//!   instruction interpreter, classifies the applicability domain, caches results per
//!   model and resolves meta-models through the [`engine::registry::ModelRegistry`].
//!
//! - **[`workflows`]: The Public API.** Applies a selection of models to one structure or
//!   a table of structures and formats the results.

pub mod core;
pub mod engine;
pub mod workflows;
