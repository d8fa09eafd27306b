//! # Engine Module
//!
//! Stateful evaluation of QSAR models against parsed structures.
//!
//! ## Overview
//!
//! The engine turns an immutable model definition and a structure handle into a
//! [`QsarResult`](crate::core::models::result::QsarResult). It counts fragments, runs the
//! model's instruction program, classifies the applicability domain and remembers every
//! result per model and canonical identity. Meta-models are evaluated by recursing into
//! their dependencies and handing the collected results to a combination function.
//!
//! ## Architecture
//!
//! - **Registry** ([`registry`]) - Catalog lookup, lazy loading, dependency links and the
//!   cache lifecycle operations
//! - **Featurizer** ([`featurizer`]) - Fragment counting under the model's counting policy
//! - **Interpreter** ([`interpreter`]) - Executes instruction programs over a per-call
//!   namespace ([`context`])
//! - **Domain** ([`domain`]) - Uncertainty level assignment from CSS, leverage and bounds
//! - **Combiners** ([`combiners`]) - Built-in meta-model combination functions
//! - **Configuration** ([`config`]) - Output and input table settings for the apply workflows
//! - **Progress Monitoring** ([`progress`]) - Callback-based batch progress reporting
//! - **Error Handling** ([`error`]) - The umbrella error type for everything above
//!
//! ## Key Capabilities
//!
//! - **At-most-once evaluation** per model and canonical identity until the cache is reset
//! - **User and experimental overrides** that persist until explicitly erased
//! - **Bidirectional propagation** of cache operations along dependency links
//! - **Structured input errors** so batches continue past unreadable structures

pub(crate) mod cache;
pub mod combiners;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub(crate) mod featurizer;
pub(crate) mod interpreter;
pub mod progress;
pub mod registry;
