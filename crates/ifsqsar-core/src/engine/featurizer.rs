use crate::core::models::definition::ModelDefinition;
use crate::core::models::fragment::{CountingPolicy, FragmentKind};
use crate::core::structure::{MatchList, StructureError, StructureMatcher};
use std::collections::HashSet;
use tracing::trace;

/// The fragment vector of one structure under one model, plus the atom checks it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub counts: Vec<f64>,
    pub violations: Vec<String>,
}

/// Turns matches into a count under the model's policy.
///
/// `claimed` carries atoms taken by earlier accepted matches and persists across every
/// pattern fragment of one featurization pass.
fn count_matches(policy: CountingPolicy, matches: &MatchList, claimed: &mut HashSet<usize>) -> f64 {
    match policy {
        CountingPolicy::Simple => matches.len() as f64,
        CountingPolicy::Presence => {
            if matches.is_empty() {
                0.0
            } else {
                1.0
            }
        }
        CountingPolicy::NonOverlapping => {
            let mut accepted = 0usize;
            for m in matches {
                if m.iter().all(|atom| !claimed.contains(atom)) {
                    claimed.extend(m.iter().copied());
                    accepted += 1;
                }
            }
            accepted as f64
        }
    }
}

/// Featurizes a parsed structure for one model.
///
/// The handle is cloned and prepared exactly once with the model's hydrogen mode, so the
/// caller's handle is left untouched for other models.
pub fn featurize<M: StructureMatcher>(
    matcher: &M,
    handle: &M::Handle,
    definition: &ModelDefinition,
) -> Result<Features, StructureError> {
    let mut prepared = handle.clone();
    matcher.prepare(&mut prepared, definition.settings.preparation);

    let policy = definition.settings.policy;
    let mut claimed = HashSet::new();
    let counts = definition
        .fragments
        .iter()
        .map(|fragment| match &fragment.kind {
            FragmentKind::Constant(value) => Ok(*value),
            FragmentKind::Pattern(pattern) => {
                let matches = matcher.find_matches(&prepared, pattern)?;
                Ok(count_matches(policy, &matches, &mut claimed))
            }
            FragmentKind::Holistic(name) => matcher.holistic_descriptor(&prepared, name),
        })
        .collect::<Result<Vec<_>, StructureError>>()?;

    let mut violations = Vec::new();
    for check in &definition.atom_checks {
        let left = matcher.find_matches(&prepared, &check.left)?.len();
        let right = matcher.find_matches(&prepared, &check.right)?.len();
        if left != right {
            violations.push(check.description.clone());
        }
    }

    trace!(model = %definition.name, ?counts, violations = violations.len(), "Featurized structure");
    Ok(Features { counts, violations })
}
