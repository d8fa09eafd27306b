use super::fragment::{CountingPolicy, Fragment};
use super::instruction::{Instruction, InstructionParseError, SliceOp, Value};
use super::result::QsarResult;
use crate::core::similarity;
use crate::core::structure::PrepareMode;
use nalgebra::DMatrix;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use thiserror::Error;

/// Errors raised while reading or validating a model definition. All of them are fatal
/// for the affected model.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Model '{model}' is missing required field '{field}'")]
    MissingField { model: String, field: &'static str },
    #[error("Model '{model}' has an invalid value for '{field}': {message}")]
    InvalidField {
        model: String,
        field: &'static str,
        message: String,
    },
    #[error("Model '{model}': {what} has {found} columns but there are {expected} fragments")]
    ShapeMismatch {
        model: String,
        what: String,
        expected: usize,
        found: usize,
    },
    #[error("Model '{model}': training matrix over fragments {range:?} is singular")]
    SingularTrainingMatrix { model: String, range: Range<usize> },
    #[error("Model '{model}': {source}")]
    Instruction {
        model: String,
        source: InstructionParseError,
    },
    #[error("Model '{model}' uses unknown combination function '{combiner}'")]
    UnknownCombiner { model: String, combiner: String },
    #[error("Model '{model}' depends on unknown model '{dependency}'")]
    UnknownDependency { model: String, dependency: String },
    #[error("Dependency cycle detected while loading model '{0}'")]
    DependencyCycle(String),
}

/// Which structures a model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructureFlag {
    #[default]
    Organics,
    /// Structures with charged atoms are rejected before the model is applied.
    Neutrals,
}

impl std::str::FromStr for StructureFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organics" => Ok(StructureFlag::Organics),
            "neutrals" => Ok(StructureFlag::Neutrals),
            other => Err(format!("unknown structure flag '{}'", other)),
        }
    }
}

/// Descriptive metadata shared by direct and meta-models.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    pub units: String,
    pub endpoint: String,
    pub citation: String,
    pub round_digits: Option<i32>,
    pub structure_flag: StructureFlag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub metadata: Metadata,
    /// Name of the predicted property.
    pub property: String,
    pub policy: CountingPolicy,
    pub preparation: PrepareMode,
    pub apply_domain: bool,
    /// Free-form settings copied into the interpreter namespace.
    pub extra: BTreeMap<String, Value>,
}

/// Minimum and maximum number of chemicals accepted in each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChemicalInputs {
    pub solute_min: usize,
    pub solute_max: usize,
    pub solvent_min: usize,
    pub solvent_max: usize,
    pub component_min: usize,
    pub component_max: usize,
    pub total_min: usize,
    pub total_max: usize,
}

impl Default for ChemicalInputs {
    fn default() -> Self {
        Self {
            solute_min: 1,
            solute_max: 1,
            solvent_min: 0,
            solvent_max: 0,
            component_min: 0,
            component_max: 0,
            total_min: 1,
            total_max: 1,
        }
    }
}

impl ChemicalInputs {
    pub fn accepts(&self, solutes: usize, solvents: usize, components: usize) -> bool {
        let total = solutes + solvents + components;
        (self.solute_min..=self.solute_max).contains(&solutes)
            && (self.solvent_min..=self.solvent_max).contains(&solvents)
            && (self.component_min..=self.component_max).contains(&components)
            && (self.total_min..=self.total_max).contains(&total)
    }

    /// The note returned when the supplied chemicals do not fit these limits.
    pub fn mismatch_note(&self) -> &'static str {
        if self.total_max == 1 {
            "chemical input error: mixture specification not allowed"
        } else if self.total_max == 2 && self.solute_min == 1 && self.solvent_min == 1 {
            "chemical input error: mixture specification with one solute and one solvent required"
        } else if self.total_min >= 2 && self.component_min + self.solvent_min >= 2 {
            "chemical input error: mixture specification with at least two components/solvents required"
        } else {
            "chemical input error: mixture specification required"
        }
    }
}

/// Fragment counts, target values and fold assignments of the training chemicals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingSet {
    pub counts: Vec<Vec<f64>>,
    pub values: Vec<f64>,
    /// Secondary agreement score per row; 1.0 when the model supplies none.
    pub value_similarity: Vec<f64>,
    /// Cross-validation fold per row; 0 means the row belongs to no fold.
    pub folds: Vec<u32>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// Rows restricted to `range`, paired with their value similarity.
    pub fn slices(&self, range: Range<usize>) -> impl Iterator<Item = (&[f64], f64)> + '_ {
        self.counts
            .iter()
            .zip(&self.value_similarity)
            .map(move |(row, &vs)| (&row[range.clone()], vs))
    }

    /// Rows restricted to `range`, grouped by fold id in ascending order and paired with
    /// their target values. Without fold assignments the whole set is a single group.
    pub fn fold_slices(&self, range: Range<usize>) -> Vec<Vec<(&[f64], f64)>> {
        let mut groups: BTreeMap<u32, Vec<(&[f64], f64)>> = BTreeMap::new();
        for ((row, &value), &fold) in self.counts.iter().zip(&self.values).zip(&self.folds) {
            if fold != 0 {
                groups
                    .entry(fold)
                    .or_default()
                    .push((&row[range.clone()], value));
            }
        }
        if groups.is_empty() {
            return vec![
                self.counts
                    .iter()
                    .zip(&self.values)
                    .map(|(row, &value)| (&row[range.clone()], value))
                    .collect(),
            ];
        }
        groups.into_values().collect()
    }
}

/// A negative-domain check: two patterns expected to match the same number of times in
/// a structure the model covers.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomCheck {
    pub left: String,
    pub right: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainConfig {
    /// `[c0, c1]`: CSS at or below `c1` is level 2, at or below `c0` level 1.
    pub css_cutoffs: [f64; 2],
    /// `[l0, l1]`: leverage at or above `l1` is level 2, at or above `l0` level 1.
    pub leverage_cutoffs: [f64; 2],
    /// Default error estimate for uncertainty levels 0-5. Clamping to level 6 keeps the
    /// error of the level it replaced.
    pub errors: [f64; 6],
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

impl DomainConfig {
    pub fn error_for(&self, level: u8) -> f64 {
        self.errors[usize::from(level).min(self.errors.len() - 1)]
    }
}

/// A cache entry shipped with the model file, restored by `reset`/`restore`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub result: QsarResult,
}

/// A fully validated direct (fragment-regression) model.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    pub name: String,
    pub version: u32,
    pub settings: Settings,
    pub inputs: ChemicalInputs,
    pub fragments: Vec<Fragment>,
    pub coefficients: Vec<Vec<f64>>,
    /// Column-wise mean of `coefficients`.
    pub mean_coefficients: Vec<f64>,
    pub training: TrainingSet,
    pub domain: Option<DomainConfig>,
    pub atom_checks: Vec<AtomCheck>,
    pub instructions: Vec<Instruction>,
    pub stored: Vec<StoredEntry>,
    leverage_inverses: HashMap<(usize, usize), DMatrix<f64>>,
}

impl ModelDefinition {
    /// Validates the assembled parts and precomputes every `(X'X)^-1` the model needs.
    ///
    /// `explicit_inverse` is used for the domain range when the model file ships one.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        version: u32,
        settings: Settings,
        inputs: ChemicalInputs,
        fragments: Vec<Fragment>,
        coefficients: Vec<Vec<f64>>,
        training: TrainingSet,
        domain: Option<DomainConfig>,
        atom_checks: Vec<AtomCheck>,
        instructions: Vec<Instruction>,
        stored: Vec<StoredEntry>,
        explicit_inverse: Option<DMatrix<f64>>,
    ) -> Result<Self, DefinitionError> {
        let width = fragments.len();
        if coefficients.is_empty() {
            return Err(DefinitionError::MissingField {
                model: name,
                field: "coefficients",
            });
        }
        for row in &coefficients {
            if row.len() != width {
                return Err(DefinitionError::ShapeMismatch {
                    model: name,
                    what: "coefficient row".to_string(),
                    expected: width,
                    found: row.len(),
                });
            }
        }
        for row in &training.counts {
            if row.len() != width {
                return Err(DefinitionError::ShapeMismatch {
                    model: name,
                    what: "training row".to_string(),
                    expected: width,
                    found: row.len(),
                });
            }
        }
        for (field, len) in [
            ("training.values", training.values.len()),
            ("training.value-similarity", training.value_similarity.len()),
            ("training.folds", training.folds.len()),
        ] {
            if len != training.len() {
                return Err(DefinitionError::InvalidField {
                    model: name,
                    field,
                    message: format!("{} entries for {} training rows", len, training.len()),
                });
            }
        }

        let rows = coefficients.len() as f64;
        let mean_coefficients = (0..width)
            .map(|c| coefficients.iter().map(|row| row[c]).sum::<f64>() / rows)
            .collect();

        let mut definition = Self {
            name,
            version,
            settings,
            inputs,
            fragments,
            coefficients,
            mean_coefficients,
            training,
            domain,
            atom_checks,
            instructions,
            stored,
            leverage_inverses: HashMap::new(),
        };
        definition.precompute_leverage(explicit_inverse)?;
        Ok(definition)
    }

    fn precompute_leverage(
        &mut self,
        explicit_inverse: Option<DMatrix<f64>>,
    ) -> Result<(), DefinitionError> {
        let mut ranges: Vec<Range<usize>> = self
            .instructions
            .iter()
            .filter_map(|instruction| match instruction {
                Instruction::Slice {
                    op: SliceOp::CalculateLeverage,
                    range,
                    ..
                } => Some(range.clone()),
                _ => None,
            })
            .collect();

        let domain_range = self.domain_range();
        if self.domain.is_some() {
            if let Some(inverse) = explicit_inverse {
                let width = domain_range.len();
                if inverse.nrows() != width || inverse.ncols() != width {
                    return Err(DefinitionError::ShapeMismatch {
                        model: self.name.clone(),
                        what: "domain.xtxi".to_string(),
                        expected: width,
                        found: inverse.ncols(),
                    });
                }
                self.leverage_inverses
                    .insert((domain_range.start, domain_range.end), inverse);
            } else {
                ranges.push(domain_range);
            }
        }

        for range in ranges {
            let key = (range.start, range.end);
            if self.leverage_inverses.contains_key(&key) {
                continue;
            }
            let inverse = similarity::gram_inverse(&self.training.counts, range.clone())
                .ok_or_else(|| DefinitionError::SingularTrainingMatrix {
                    model: self.name.clone(),
                    range,
                })?;
            self.leverage_inverses.insert(key, inverse);
        }
        Ok(())
    }

    /// `true` when the first fragment is a constant intercept column.
    pub fn has_intercept(&self) -> bool {
        self.fragments.first().is_some_and(Fragment::is_constant)
    }

    /// Fragment range used by domain checks: every fragment except the intercept.
    pub fn domain_range(&self) -> Range<usize> {
        let start = usize::from(self.has_intercept());
        start..self.fragments.len()
    }

    pub fn stdev(&self) -> Vec<f64> {
        self.fragments.iter().map(|f| f.stdev).collect()
    }

    pub fn leverage_inverse(&self, range: &Range<usize>) -> Option<&DMatrix<f64>> {
        self.leverage_inverses.get(&(range.start, range.end))
    }
}

/// Dependency model names for each chemical role.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dependencies {
    pub solute: Vec<String>,
    pub solvent: Vec<String>,
    pub component: Vec<String>,
}

/// A meta-model: combines the results of other models through a named function.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaDefinition {
    pub name: String,
    pub version: u32,
    pub metadata: Metadata,
    pub inputs: ChemicalInputs,
    pub dependencies: Dependencies,
    pub combiner: String,
    pub stored: Vec<StoredEntry>,
}

/// Either kind of definition, as produced by a model source.
#[derive(Debug, Clone)]
pub enum ModelSpec {
    Direct(Box<ModelDefinition>),
    Meta(MetaDefinition),
}

impl ModelSpec {
    pub fn name(&self) -> &str {
        match self {
            ModelSpec::Direct(d) => &d.name,
            ModelSpec::Meta(m) => &m.name,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::core::models::instruction::default_program;

    /// A small intercept model over two patterns with a four-row training set.
    pub fn simple_definition() -> ModelDefinition {
        let fragments = vec![
            Fragment::constant(1.0),
            Fragment::pattern("[CX4]", 1.0),
            Fragment::pattern("[OX2H]", 0.5),
        ];
        let training = TrainingSet {
            counts: vec![
                vec![1.0, 1.0, 0.0],
                vec![1.0, 2.0, 1.0],
                vec![1.0, 3.0, 1.0],
                vec![1.0, 0.0, 2.0],
            ],
            values: vec![0.5, 1.0, 1.5, 2.0],
            value_similarity: vec![1.0; 4],
            folds: vec![1, 1, 2, 2],
        };
        let settings = Settings {
            metadata: Metadata {
                units: "log units".to_string(),
                endpoint: "test endpoint".to_string(),
                citation: "test citation".to_string(),
                round_digits: Some(2),
                structure_flag: StructureFlag::Organics,
            },
            property: "testprop".to_string(),
            policy: CountingPolicy::Simple,
            preparation: PrepareMode::RemoveHydrogens,
            apply_domain: true,
            extra: BTreeMap::new(),
        };
        let domain = DomainConfig {
            css_cutoffs: [0.75, 0.5],
            leverage_cutoffs: [0.6, 0.9],
            errors: [0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            lower_bound: Some(0.5),
            upper_bound: Some(2.0),
        };
        ModelDefinition::new(
            "testprop".to_string(),
            1,
            settings,
            ChemicalInputs::default(),
            fragments,
            vec![vec![0.1, 0.5, 0.4], vec![0.3, 0.5, 0.6]],
            training,
            Some(domain),
            Vec::new(),
            default_program(3),
            Vec::new(),
            None,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_coefficients_average_over_rows() {
        let definition = fixtures::simple_definition();
        assert_eq!(definition.mean_coefficients.len(), 3);
        assert!((definition.mean_coefficients[0] - 0.2).abs() < 1e-12);
        assert!((definition.mean_coefficients[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn domain_range_skips_intercept_and_has_an_inverse() {
        let definition = fixtures::simple_definition();
        assert!(definition.has_intercept());
        let range = definition.domain_range();
        assert_eq!(range, 1..3);
        assert!(definition.leverage_inverse(&range).is_some());
    }

    #[test]
    fn new_fails_on_coefficient_shape_mismatch() {
        let base = fixtures::simple_definition();
        let result = ModelDefinition::new(
            base.name.clone(),
            1,
            base.settings.clone(),
            base.inputs,
            base.fragments.clone(),
            vec![vec![1.0, 2.0]],
            base.training.clone(),
            None,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        );
        assert!(matches!(
            result,
            Err(DefinitionError::ShapeMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn new_fails_on_singular_training_matrix() {
        let base = fixtures::simple_definition();
        let mut training = base.training.clone();
        for row in &mut training.counts {
            row[2] = row[1] * 2.0;
        }
        let result = ModelDefinition::new(
            base.name.clone(),
            1,
            base.settings.clone(),
            base.inputs,
            base.fragments.clone(),
            base.coefficients.clone(),
            training,
            base.domain.clone(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
        );
        assert!(matches!(
            result,
            Err(DefinitionError::SingularTrainingMatrix { .. })
        ));
    }

    #[test]
    fn fold_slices_group_rows_by_fold() {
        let definition = fixtures::simple_definition();
        let folds = definition.training.fold_slices(1..3);
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].len(), 2);
        assert_eq!(folds[1][0].1, 1.5);
    }

    #[test]
    fn mismatch_notes_follow_input_limits() {
        let single = ChemicalInputs::default();
        assert!(single.accepts(1, 0, 0));
        assert!(!single.accepts(1, 1, 0));
        assert_eq!(
            single.mismatch_note(),
            "chemical input error: mixture specification not allowed"
        );

        let pair = ChemicalInputs {
            solvent_min: 1,
            solvent_max: 1,
            total_min: 2,
            total_max: 2,
            ..ChemicalInputs::default()
        };
        assert_eq!(
            pair.mismatch_note(),
            "chemical input error: mixture specification with one solute and one solvent required"
        );
    }
}
