use crate::core::models::definition::{
    AtomCheck, ChemicalInputs, DefinitionError, Dependencies, DomainConfig, Metadata,
    MetaDefinition, ModelDefinition, ModelSpec, Settings, StoredEntry, StructureFlag, TrainingSet,
};
use crate::core::models::fragment::{CountingPolicy, Fragment};
use crate::core::models::instruction::{Value, default_program, parse_program};
use crate::core::models::result::QsarResult;
use crate::core::models::uncertainty::UncertaintyLevel;
use crate::core::structure::PrepareMode;
use nalgebra::DMatrix;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum RawModelFile {
    Direct(Box<RawDirectModel>),
    Meta(RawMetaModel),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDirectModel {
    settings: RawDirectSettings,
    #[serde(default)]
    inputs: RawChemicalInputs,
    fragments: Vec<RawFragment>,
    coefficients: Vec<Vec<f64>>,
    training: RawTrainingSet,
    #[serde(default)]
    domain: Option<RawDomain>,
    #[serde(default)]
    atom_checks: Vec<RawAtomCheck>,
    #[serde(default)]
    instructions: Option<Vec<Vec<String>>>,
    #[serde(default)]
    stored: Vec<RawStoredEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawDirectSettings {
    #[serde(flatten)]
    metadata: RawMetadata,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    preparation: Option<String>,
    #[serde(default)]
    apply_domain: Option<bool>,
    #[serde(flatten)]
    extra: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawMetadata {
    #[serde(default)]
    units: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    citation: String,
    #[serde(default)]
    round_digits: Option<i32>,
    #[serde(default)]
    structure_flag: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawChemicalInputs {
    solute_min: Option<usize>,
    solute_max: Option<usize>,
    solvent_min: Option<usize>,
    solvent_max: Option<usize>,
    component_min: Option<usize>,
    component_max: Option<usize>,
    total_min: Option<usize>,
    total_max: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFragment {
    constant: Option<f64>,
    pattern: Option<String>,
    descriptor: Option<String>,
    #[serde(default)]
    stdev: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawTrainingSet {
    counts: Vec<Vec<f64>>,
    values: Vec<f64>,
    #[serde(default)]
    value_similarity: Option<Vec<f64>>,
    #[serde(default)]
    folds: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBound {
    Enabled(bool),
    Value(f64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawDomain {
    css_cutoffs: Vec<f64>,
    leverage_cutoffs: Vec<f64>,
    errors: Vec<f64>,
    #[serde(default)]
    lower_bound: Option<RawBound>,
    #[serde(default)]
    upper_bound: Option<RawBound>,
    #[serde(default)]
    xtxi: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAtomCheck {
    left: String,
    right: String,
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Number(u8),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStoredEntry {
    id: String,
    value: f64,
    #[serde(default)]
    level: Option<RawLevel>,
    #[serde(default)]
    error: Option<f64>,
    #[serde(default)]
    note: String,
    #[serde(default)]
    citation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawMetaModel {
    settings: RawMetadata,
    #[serde(default)]
    inputs: RawChemicalInputs,
    #[serde(default)]
    dependencies: RawDependencies,
    combiner: String,
    #[serde(default)]
    stored: Vec<RawStoredEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawDependencies {
    #[serde(default)]
    solute: Vec<String>,
    #[serde(default)]
    solvent: Vec<String>,
    #[serde(default)]
    component: Vec<String>,
}

/// Parses one model file and validates it into a [`ModelSpec`].
pub fn parse_model(
    name: &str,
    version: u32,
    content: &str,
    path_for_error: &str,
) -> Result<ModelSpec, DefinitionError> {
    let raw: RawModelFile = toml::from_str(content).map_err(|e| DefinitionError::Toml {
        path: path_for_error.to_string(),
        source: e,
    })?;
    match raw {
        RawModelFile::Direct(direct) => {
            convert_direct(name, version, *direct).map(|d| ModelSpec::Direct(Box::new(d)))
        }
        RawModelFile::Meta(meta) => convert_meta(name, version, meta).map(ModelSpec::Meta),
    }
}

fn invalid(model: &str, field: &'static str, message: impl Into<String>) -> DefinitionError {
    DefinitionError::InvalidField {
        model: model.to_string(),
        field,
        message: message.into(),
    }
}

fn convert_metadata(model: &str, raw: RawMetadata) -> Result<Metadata, DefinitionError> {
    let structure_flag = match raw.structure_flag {
        Some(flag) => flag
            .parse::<StructureFlag>()
            .map_err(|m| invalid(model, "settings.structure-flag", m))?,
        None => StructureFlag::default(),
    };
    Ok(Metadata {
        units: raw.units,
        endpoint: raw.endpoint,
        citation: raw.citation,
        round_digits: raw.round_digits,
        structure_flag,
    })
}

fn convert_inputs(raw: RawChemicalInputs) -> ChemicalInputs {
    let defaults = ChemicalInputs::default();
    ChemicalInputs {
        solute_min: raw.solute_min.unwrap_or(defaults.solute_min),
        solute_max: raw.solute_max.unwrap_or(defaults.solute_max),
        solvent_min: raw.solvent_min.unwrap_or(defaults.solvent_min),
        solvent_max: raw.solvent_max.unwrap_or(defaults.solvent_max),
        component_min: raw.component_min.unwrap_or(defaults.component_min),
        component_max: raw.component_max.unwrap_or(defaults.component_max),
        total_min: raw.total_min.unwrap_or(defaults.total_min),
        total_max: raw.total_max.unwrap_or(defaults.total_max),
    }
}

fn convert_stored(
    model: &str,
    metadata: &Metadata,
    raw: Vec<RawStoredEntry>,
) -> Result<Vec<StoredEntry>, DefinitionError> {
    raw.into_iter()
        .map(|entry| {
            let level = match entry.level {
                None => UncertaintyLevel::experimental(),
                Some(RawLevel::Number(n)) => n
                    .to_string()
                    .parse()
                    .map_err(|e| invalid(model, "stored.level", format!("{}", e)))?,
                Some(RawLevel::Text(t)) => t
                    .parse()
                    .map_err(|e| invalid(model, "stored.level", format!("{}", e)))?,
            };
            let citation = if entry.citation.is_empty() {
                metadata.citation.clone()
            } else {
                entry.citation
            };
            Ok(StoredEntry {
                id: entry.id,
                result: QsarResult {
                    prediction: Some(entry.value),
                    uncertainty_level: Some(level),
                    error: entry.error,
                    note: entry.note,
                    citation,
                    units: metadata.units.clone(),
                    endpoint: metadata.endpoint.clone(),
                },
            })
        })
        .collect()
}

fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::Integer(i) => Value::Number(*i as f64),
        toml::Value::Float(f) => Value::Number(*f),
        toml::Value::Boolean(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
        toml::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn convert_fragment(model: &str, raw: RawFragment) -> Result<Fragment, DefinitionError> {
    match (raw.constant, raw.pattern, raw.descriptor) {
        (Some(value), None, None) => Ok(Fragment::constant(value)),
        (None, Some(pattern), None) => Ok(Fragment::pattern(&pattern, raw.stdev)),
        (None, None, Some(name)) => Ok(Fragment::holistic(&name, raw.stdev)),
        _ => Err(invalid(
            model,
            "fragments",
            "each fragment needs exactly one of 'constant', 'pattern' or 'descriptor'",
        )),
    }
}

fn convert_bound(
    model: &str,
    field: &'static str,
    raw: Option<RawBound>,
    training_extreme: Option<f64>,
) -> Result<Option<f64>, DefinitionError> {
    match raw {
        None | Some(RawBound::Enabled(false)) => Ok(None),
        Some(RawBound::Enabled(true)) => training_extreme
            .map(Some)
            .ok_or_else(|| invalid(model, field, "bound requested but the training set is empty")),
        Some(RawBound::Value(v)) => Ok(Some(v)),
    }
}

fn convert_domain(
    model: &str,
    raw: RawDomain,
    training: &TrainingSet,
) -> Result<(DomainConfig, Option<DMatrix<f64>>), DefinitionError> {
    let css_cutoffs: [f64; 2] = raw.css_cutoffs.try_into().map_err(|v: Vec<f64>| {
        invalid(
            model,
            "domain.css-cutoffs",
            format!("expected 2 values, found {}", v.len()),
        )
    })?;
    let leverage_cutoffs: [f64; 2] = raw.leverage_cutoffs.try_into().map_err(|v: Vec<f64>| {
        invalid(
            model,
            "domain.leverage-cutoffs",
            format!("expected 2 values, found {}", v.len()),
        )
    })?;
    // A seventh entry for level 6 is accepted and ignored.
    let errors: [f64; 6] = match raw.errors.len() {
        6 | 7 => raw.errors[..6].try_into().map_err(|_| {
            invalid(model, "domain.errors", "expected 6 or 7 values")
        })?,
        n => {
            return Err(invalid(
                model,
                "domain.errors",
                format!("expected 6 or 7 values, found {}", n),
            ));
        }
    };

    let xtxi = match raw.xtxi {
        Some(rows) => {
            let n = rows.len();
            if rows.iter().any(|r| r.len() != n) {
                return Err(invalid(model, "domain.xtxi", "matrix must be square"));
            }
            Some(DMatrix::from_fn(n, n, |r, c| rows[r][c]))
        }
        None => None,
    };

    let domain = DomainConfig {
        css_cutoffs,
        leverage_cutoffs,
        errors,
        lower_bound: convert_bound(
            model,
            "domain.lower-bound",
            raw.lower_bound,
            training.min_value(),
        )?,
        upper_bound: convert_bound(
            model,
            "domain.upper-bound",
            raw.upper_bound,
            training.max_value(),
        )?,
    };
    Ok((domain, xtxi))
}

fn convert_direct(
    name: &str,
    version: u32,
    raw: RawDirectModel,
) -> Result<ModelDefinition, DefinitionError> {
    let metadata = convert_metadata(name, raw.settings.metadata)?;
    let policy = match raw.settings.model_type {
        Some(t) => t
            .parse::<CountingPolicy>()
            .map_err(|m| invalid(name, "settings.model-type", m))?,
        None => CountingPolicy::default(),
    };
    let preparation = match raw.settings.preparation {
        Some(p) => p
            .parse::<PrepareMode>()
            .map_err(|m| invalid(name, "settings.preparation", m))?,
        None => PrepareMode::default(),
    };
    let settings = Settings {
        property: raw.settings.property.unwrap_or_else(|| name.to_string()),
        policy,
        preparation,
        apply_domain: raw.settings.apply_domain.unwrap_or(true),
        extra: raw
            .settings
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_value(v)))
            .collect(),
        metadata,
    };

    let fragments = raw
        .fragments
        .into_iter()
        .map(|f| convert_fragment(name, f))
        .collect::<Result<Vec<_>, _>>()?;

    let rows = raw.training.counts.len();
    let training = TrainingSet {
        counts: raw.training.counts,
        values: raw.training.values,
        value_similarity: raw
            .training
            .value_similarity
            .unwrap_or_else(|| vec![1.0; rows]),
        folds: raw.training.folds.unwrap_or_else(|| vec![0; rows]),
    };

    let (domain, xtxi) = match raw.domain {
        Some(d) => {
            let (domain, xtxi) = convert_domain(name, d, &training)?;
            (Some(domain), xtxi)
        }
        None => (None, None),
    };

    let instructions = match raw.instructions {
        Some(rows) => parse_program(&rows, fragments.len()).map_err(|e| {
            DefinitionError::Instruction {
                model: name.to_string(),
                source: e,
            }
        })?,
        None => default_program(fragments.len()),
    };

    let atom_checks = raw
        .atom_checks
        .into_iter()
        .map(|c| AtomCheck {
            left: c.left,
            right: c.right,
            description: c.description,
        })
        .collect();
    let stored = convert_stored(name, &settings.metadata, raw.stored)?;

    ModelDefinition::new(
        name.to_string(),
        version,
        settings,
        convert_inputs(raw.inputs),
        fragments,
        raw.coefficients,
        training,
        domain,
        atom_checks,
        instructions,
        stored,
        xtxi,
    )
}

fn convert_meta(
    name: &str,
    version: u32,
    raw: RawMetaModel,
) -> Result<MetaDefinition, DefinitionError> {
    let metadata = convert_metadata(name, raw.settings)?;
    if raw.combiner.trim().is_empty() {
        return Err(DefinitionError::MissingField {
            model: name.to_string(),
            field: "combiner",
        });
    }
    let stored = convert_stored(name, &metadata, raw.stored)?;
    Ok(MetaDefinition {
        name: name.to_string(),
        version,
        metadata,
        inputs: convert_inputs(raw.inputs),
        dependencies: Dependencies {
            solute: raw.dependencies.solute,
            solvent: raw.dependencies.solvent,
            component: raw.dependencies.component,
        },
        combiner: raw.combiner,
        stored,
    })
}

#[cfg(test)]
pub(crate) mod samples {
    pub const DIRECT: &str = r#"
kind = "direct"
coefficients = [[0.2, 0.5, 0.5]]

[settings]
units = "log units"
endpoint = "test endpoint"
citation = "test citation"
round-digits = 2
model-type = "mlrx"
preparation = "add-hydrogens"
structure-flag = "neutrals"
scale = 2.5

[[fragments]]
constant = 1.0

[[fragments]]
pattern = "[CX4]"
stdev = 1.0

[[fragments]]
pattern = "[OX2H]"
stdev = 0.5

[training]
counts = [[1, 1, 0], [1, 2, 1], [1, 3, 1], [1, 0, 2]]
values = [0.5, 1.0, 1.5, 2.0]
folds = [1, 1, 2, 2]

[domain]
css-cutoffs = [0.75, 0.5]
leverage-cutoffs = [0.6, 0.9]
errors = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]
lower-bound = true
upper-bound = 1.8

[[atom-checks]]
left = "[#8]"
right = "[OX2H]"
description = "oxygen not covered by hydroxyl fragment"

[[stored]]
id = "O"
value = 0.0
level = "E"
note = "experimental value"
"#;

    pub const META: &str = r#"
kind = "meta"
combiner = "mv-liquid"

[settings]
units = "cm^3/mol"
round-digits = 2

[dependencies]
solute = ["MVsolid", "MVliqcorr"]
"#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::instruction::Instruction;

    #[test]
    fn parses_direct_model_with_domain_and_settings() {
        let spec = parse_model("testprop", 2, samples::DIRECT, "test.toml").unwrap();
        let ModelSpec::Direct(definition) = spec else {
            panic!("expected a direct model");
        };
        assert_eq!(definition.version, 2);
        assert_eq!(definition.settings.policy, CountingPolicy::NonOverlapping);
        assert_eq!(definition.settings.preparation, PrepareMode::AddHydrogens);
        assert_eq!(
            definition.settings.metadata.structure_flag,
            StructureFlag::Neutrals
        );
        assert_eq!(
            definition.settings.extra.get("scale"),
            Some(&Value::Number(2.5))
        );
        let domain = definition.domain.as_ref().unwrap();
        assert_eq!(domain.lower_bound, Some(0.5));
        assert_eq!(domain.upper_bound, Some(1.8));
        assert_eq!(definition.atom_checks.len(), 1);
        assert_eq!(definition.training.value_similarity, vec![1.0; 4]);
        assert_eq!(definition.instructions.len(), 2);
        assert!(matches!(definition.instructions[0], Instruction::Define { .. }));
        assert_eq!(definition.stored[0].result.prediction, Some(0.0));
        assert_eq!(definition.stored[0].result.citation, "test citation");
    }

    #[test]
    fn parses_meta_model() {
        let spec = parse_model("MVliquid", 1, samples::META, "meta.toml").unwrap();
        let ModelSpec::Meta(meta) = spec else {
            panic!("expected a meta model");
        };
        assert_eq!(meta.combiner, "mv-liquid");
        assert_eq!(meta.dependencies.solute, vec!["MVsolid", "MVliqcorr"]);
        assert_eq!(meta.inputs, ChemicalInputs::default());
    }

    #[test]
    fn rejects_fragment_with_two_kinds() {
        let content = samples::DIRECT.replace(
            "constant = 1.0",
            "constant = 1.0\npattern = \"[C]\"",
        );
        let result = parse_model("bad", 1, &content, "bad.toml");
        assert!(matches!(
            result,
            Err(DefinitionError::InvalidField { field: "fragments", .. })
        ));
    }

    #[test]
    fn rejects_wrong_number_of_domain_errors() {
        let content = samples::DIRECT.replace(
            "errors = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]",
            "errors = [0.1, 0.2]",
        );
        let result = parse_model("bad", 1, &content, "bad.toml");
        assert!(matches!(
            result,
            Err(DefinitionError::InvalidField { field: "domain.errors", .. })
        ));
    }

    #[test]
    fn level_six_error_entry_is_optional() {
        let content = samples::DIRECT.replace(
            "errors = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]",
            "errors = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]",
        );
        assert!(parse_model("six", 1, &content, "six.toml").is_ok());
    }

    #[test]
    fn rejects_malformed_instructions_at_load() {
        let bad = samples::DIRECT.replace(
            "kind = \"direct\"\n",
            "kind = \"direct\"\ninstructions = [[\"<applycoeff>\", \"0\", \"7\", \"<addto>\", \"RETURN\"]]\n",
        );
        let result = parse_model("bad", 1, &bad, "bad.toml");
        assert!(matches!(result, Err(DefinitionError::Instruction { .. })));
    }

    #[test]
    fn reports_toml_errors_with_path() {
        let result = parse_model("bad", 1, "kind = ", "broken.toml");
        assert!(matches!(result, Err(DefinitionError::Toml { path, .. }) if path == "broken.toml"));
    }
}
