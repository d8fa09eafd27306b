//! # Structure Matching
//!
//! The narrow interface through which the engine talks to a chemistry toolkit.
//!
//! ## Overview
//!
//! Parsing a linear notation, producing a canonical identity, matching substructure
//! patterns and computing whole-molecule descriptors are not performed by this crate.
//! They are supplied by an implementation of [`StructureMatcher`], which the featurizer,
//! the domain classifier and the registry call through a handful of methods.
//!
//! ## Implementations
//!
//! - **Tabulated** ([`tabulated`]) - Serves precomputed match lists and descriptors from a
//!   CSV table, for running models without linking a toolkit.

pub mod tabulated;

use std::fmt;
use thiserror::Error;

/// A list of matches, each holding the atom indices covered by one pattern hit.
pub type MatchList = Vec<Vec<usize>>;

/// How explicit hydrogens are handled before fragments are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrepareMode {
    AddHydrogens,
    #[default]
    RemoveHydrogens,
}

impl fmt::Display for PrepareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareMode::AddHydrogens => write!(f, "add-hydrogens"),
            PrepareMode::RemoveHydrogens => write!(f, "remove-hydrogens"),
        }
    }
}

impl std::str::FromStr for PrepareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add-hydrogens" => Ok(PrepareMode::AddHydrogens),
            "remove-hydrogens" => Ok(PrepareMode::RemoveHydrogens),
            other => Err(format!("unknown preparation mode '{}'", other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructureError {
    #[error("could not parse structure '{notation}': {reason}")]
    Parse { notation: String, reason: String },

    #[error("invalid substructure pattern '{0}'")]
    Pattern(String),

    #[error("unknown holistic descriptor '{name}' for structure '{id}'")]
    Descriptor { name: String, id: String },
}

/// Capability set required from a chemistry toolkit.
///
/// Handles are cheap to clone; the featurizer clones a handle before preparing it so
/// that one model's hydrogen treatment never leaks into another model's view of the
/// same structure.
pub trait StructureMatcher {
    type Handle: Clone;

    /// Reads a structure from its linear notation.
    fn parse(&self, notation: &str) -> Result<Self::Handle, StructureError>;

    /// Returns the normalized identity key used for result caching.
    fn canonical_id(&self, handle: &Self::Handle) -> String;

    /// Returns every match of `pattern` in match-list order.
    fn find_matches(
        &self,
        handle: &Self::Handle,
        pattern: &str,
    ) -> Result<MatchList, StructureError>;

    /// Adds or removes explicit hydrogens in place.
    fn prepare(&self, handle: &mut Self::Handle, mode: PrepareMode);

    /// Computes a scalar over the whole structure (e.g. ring count, molecular weight).
    fn holistic_descriptor(&self, handle: &Self::Handle, name: &str)
    -> Result<f64, StructureError>;
}

/// Returns `true` when a canonical identity contains a charged bracket atom such as `[NH4+]`.
pub fn has_charged_atom(canonical_id: &str) -> bool {
    let mut rest = canonical_id;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            return false;
        };
        // Bracket atoms need at least one character before the charge sign.
        let inner = &after[..close];
        if inner.len() > 1 && inner[1..].contains(['+', '-']) {
            return true;
        }
        rest = &after[close + 1..];
    }
    false
}
