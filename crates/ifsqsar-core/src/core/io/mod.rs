//! Reading model definitions and catalogs.
//!
//! Definitions are TOML files deserialized into raw `serde` structs and then validated
//! into the typed models of [`crate::core::models::definition`]. A [`source::ModelSource`]
//! decides where the text comes from, so the registry can read a directory lazily or be
//! fed definitions held in memory.

pub mod model_file;
pub mod source;
