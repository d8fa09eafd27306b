//! # Core Module
//!
//! The stateless foundation of the library: model data, the structure-matching
//! interface, definition I/O and the similarity mathematics.
//!
//! ## Overview
//!
//! Nothing in this layer caches results or walks model dependencies. Everything is
//! either plain data loaded once from a definition file or a pure function over that
//! data, which keeps the stateful evaluation in [`crate::engine`] small and testable.
//!
//! ## Architecture
//!
//! - **Model Representation** ([`models`]) - Fragments, instructions, definitions, uncertainty levels and results
//! - **Structure Matching** ([`structure`]) - The toolkit seam: parsing, canonical ids, substructure matches and descriptors
//! - **Definition I/O** ([`io`]) - TOML definition files, catalogs and model sources
//! - **Similarity** ([`similarity`]) - Fragment similarity, chemical similarity scores, leverage and read-across
//!
//! ## Key Capabilities
//!
//! - **Load-time validation** of coefficient, training and instruction shapes
//! - **Precomputed leverage inverses** so evaluation never inverts a matrix
//! - **Toolkit independence** through a narrow matcher trait

pub mod io;
pub mod models;
pub mod similarity;
pub mod structure;
