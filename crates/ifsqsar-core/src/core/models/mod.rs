//! # Core Models Module
//!
//! Data structures describing QSAR models and the values they produce.
//!
//! ## Overview
//!
//! A model is a fixed recipe: a list of fragments that turn a structure into a numeric
//! vector, a set of regression coefficients, a training set used for similarity and
//! leverage, and an instruction program that combines these into a prediction. The types
//! here are immutable once loaded; evaluation state lives in [`crate::engine`].
//!
//! ## Key Components
//!
//! - [`definition`] - Validated direct and meta model definitions
//! - [`fragment`] - Fragment kinds and the counting policies applied to them
//! - [`instruction`] - The typed instruction set and its token-row parser
//! - [`uncertainty`] - Uncertainty levels with experimental and user tags
//! - [`result`] - The per-model, per-structure result record
//! - [`ids`] - Arena keys for loaded models
//!
//! ## Usage
//!
//! ```ignore
//! use ifsqsar::core::models::uncertainty::UncertaintyLevel;
//!
//! let level: UncertaintyLevel = "E2".parse()?;
//! assert!(level.experimental);
//! ```

pub mod definition;
pub mod fragment;
pub mod ids;
pub mod instruction;
pub mod result;
pub mod uncertainty;
