use crate::core::models::result::QsarResult;
use crate::core::models::uncertainty::UncertaintyLevel;
use phf::{Map, phf_map};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CombineError {
    #[error("{role} {index} has no result for dependency '{name}'")]
    MissingDependency {
        role: &'static str,
        index: usize,
        name: String,
    },
}

/// Dependency results for one chemical, in the order the meta-model lists them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyResults {
    entries: Vec<(String, QsarResult)>,
}

impl DependencyResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, result: QsarResult) {
        self.entries.push((name.to_string(), result));
    }

    pub fn get(&self, name: &str) -> Option<&QsarResult> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QsarResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// `"name=level"` for every dependency that reported a level.
    pub fn level_summary(&self) -> Vec<String> {
        self.iter()
            .filter_map(|(name, r)| r.uncertainty_level.map(|ul| format!("{}={}", name, ul)))
            .collect()
    }
}

/// Everything a combination function may read.
#[derive(Debug, Clone, Copy)]
pub struct CombineInputs<'a> {
    pub solutes: &'a [DependencyResults],
    pub solvents: &'a [DependencyResults],
    pub components: &'a [DependencyResults],
    /// `"solute 1 dependency ULs: ..."` segments joined with `"; "`; may be empty.
    pub propagated_notes: &'a str,
}

impl<'a> CombineInputs<'a> {
    pub fn solute(&self, index: usize, name: &str) -> Result<&'a QsarResult, CombineError> {
        self.solutes
            .get(index)
            .and_then(|deps| deps.get(name))
            .ok_or_else(|| CombineError::MissingDependency {
                role: "solute",
                index: index + 1,
                name: name.to_string(),
            })
    }

    fn solute_value(&self, name: &str) -> Result<(f64, &'a QsarResult), CombineError> {
        let result = self.solute(0, name)?;
        Ok((result.prediction.unwrap_or(f64::NAN), result))
    }
}

/// A pure function from dependency results to the meta-model's own result. Metadata and
/// rounding are applied by the registry afterwards.
pub type CombineFn = fn(&CombineInputs<'_>) -> Result<QsarResult, CombineError>;

pub static BUILTIN_COMBINERS: Map<&'static str, CombineFn> = phf_map! {
    "logkow-pplfer" => logkow_pplfer as CombineFn,
    "logkoa-pplfer" => logkoa_pplfer as CombineFn,
    "logkaw-pplfer" => logkaw_pplfer as CombineFn,
    "hl-biodeg" => hl_biodeg as CombineFn,
    "mv-liquid" => mv_liquid as CombineFn,
    "density-liquid" => density_liquid as CombineFn,
    "tm-consensus" => tm_consensus as CombineFn,
};

fn join_notes<'n>(notes: impl IntoIterator<Item = &'n str>) -> String {
    notes
        .into_iter()
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// System parameters of a PPLFER equation `sS + aA + bB + vV + lL + c` and the squared
/// uncertainty of each.
struct PplferSystem {
    coefficients: [f64; 6],
    variances: [f64; 6],
}

const PPLFER_KOW: PplferSystem = PplferSystem {
    coefficients: [0.69 - 2.26, 3.56 - 3.72, 0.73 - 4.78, 0.52 + 2.19, 0.79 - 0.38, -0.26 + 0.64],
    variances: [
        0.05 * 0.05 + 0.05 * 0.05,
        0.04 * 0.04 + 0.04 * 0.04,
        0.04 * 0.04 + 0.04 * 0.04,
        0.08 * 0.08 + 0.06 * 0.06,
        0.02 * 0.02 + 0.02 * 0.02,
        0.03 * 0.03 + 0.03 * 0.03,
    ],
};

const PPLFER_KOA: PplferSystem = PplferSystem {
    coefficients: [0.69, 3.56, 0.73, 0.52, 0.79, -0.26],
    variances: [0.05 * 0.05, 0.04 * 0.04, 0.04 * 0.04, 0.08 * 0.08, 0.02 * 0.02, 0.03 * 0.03],
};

const PPLFER_KAW: PplferSystem = PplferSystem {
    coefficients: [-2.26, -3.72, -4.78, 2.19, -0.38, 0.64],
    variances: [0.05 * 0.05, 0.04 * 0.04, 0.04 * 0.04, 0.06 * 0.06, 0.02 * 0.02, 0.03 * 0.03],
};

/// Folds a descriptor level for PPLFER aggregation: level 4 (no fragment overlap) counts
/// as 1, or 2 for L; levels above 4 count as 3.
fn fold_descriptor_level(level: u8, is_l: bool) -> u8 {
    match level {
        0..=3 => level,
        4 if is_l => 2,
        4 => 1,
        _ => 3,
    }
}

fn pplfer(system: &PplferSystem, inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    let names = ["S", "A", "B", "V", "L"];
    let mut values = [0.0; 5];
    let mut sigmas = [0.0; 5];
    let mut levels = Vec::with_capacity(4);
    let mut tags = UncertaintyLevel::default();

    for (i, name) in names.iter().enumerate() {
        let (value, result) = inputs.solute_value(name)?;
        values[i] = value;
        sigmas[i] = result.error.unwrap_or(0.0);
        if let Some(ul) = result.uncertainty_level {
            tags.experimental |= ul.experimental;
            tags.user |= ul.user;
            if *name != "V" {
                levels.push(fold_descriptor_level(ul.level.unwrap_or(0), *name == "L"));
            }
        } else if *name != "V" {
            levels.push(0);
        }
    }

    let c = &system.coefficients;
    let var = &system.variances;
    let prediction = values
        .iter()
        .zip(c.iter())
        .map(|(x, k)| x * k)
        .sum::<f64>()
        + c[5];

    let [s, a, b, v, l] = values;
    let mut err2 = v * v * var[3] + c[4] * c[4] * sigmas[4] * sigmas[4] + l * l * var[4] + var[5];
    for (i, x) in [s, a, b].into_iter().enumerate() {
        if x != 0.0 {
            err2 += c[i] * c[i] * sigmas[i] * sigmas[i] + x * x * var[i];
        }
    }

    let sum_squares: f64 = levels.iter().map(|&l| f64::from(l).powi(2)).sum();
    let aggregate = (sum_squares / levels.len().max(1) as f64).sqrt().ceil() as u8;
    let ad_note = if aggregate <= 1 {
        "aggregate solute descriptor UL is in the AD"
    } else {
        "aggregate solute descriptor UL is out of the AD"
    };

    Ok(QsarResult {
        prediction: Some(prediction),
        uncertainty_level: Some(UncertaintyLevel {
            level: Some(aggregate),
            ..tags
        }),
        error: Some(err2.sqrt()),
        note: join_notes([inputs.propagated_notes, ad_note]),
        ..QsarResult::default()
    })
}

fn logkow_pplfer(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    pplfer(&PPLFER_KOW, inputs)
}

fn logkoa_pplfer(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    pplfer(&PPLFER_KOA, inputs)
}

fn logkaw_pplfer(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    pplfer(&PPLFER_KAW, inputs)
}

/// Biodegradation half-life in hours from the BIOWIN3 and BIOWIN4 survey models.
fn hl_biodeg(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    let (b3x, _) = inputs.solute_value("biowin3usmmlrx")?;
    let (b3a, _) = inputs.solute_value("biowin3usmmlra")?;
    let (b4x, _) = inputs.solute_value("biowin4psmmlrx")?;
    let (b4a, _) = inputs.solute_value("biowin4psmmlra")?;
    let biowin3 = b3x + b3a;
    let biowin4 = b4x + b4a;
    let log_days = ((biowin3 * -1.07 + 4.2) + (biowin4 * -1.46 + 6.51)) / 2.0;
    Ok(QsarResult {
        prediction: Some(24.0 * 10f64.powf(log_days)),
        error: Some(10f64.powf(1.11 * 1.96)),
        note: "generic error estimated from uncertainties of model fits".to_string(),
        ..QsarResult::default()
    })
}

fn mv_liquid(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    let (solid, _) = inputs.solute_value("MVsolid")?;
    let (correction, _) = inputs.solute_value("MVliqcorr")?;
    Ok(QsarResult {
        prediction: Some(solid * correction),
        error: Some(0.0),
        note: inputs.propagated_notes.to_string(),
        ..QsarResult::default()
    })
}

fn density_liquid(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    let (mw, _) = inputs.solute_value("MW")?;
    let (mv, _) = inputs.solute_value("MVliquid")?;
    Ok(QsarResult {
        prediction: Some(mw / mv),
        error: Some(0.0),
        note: inputs.propagated_notes.to_string(),
        ..QsarResult::default()
    })
}

/// Mean of two melting-point models. A tagged (experimental or user) value wins over an
/// untagged one; level 4 counts as 2.
fn tm_consensus(inputs: &CombineInputs<'_>) -> Result<QsarResult, CombineError> {
    let (tm, tm_result) = inputs.solute_value("tm")?;
    let (pp, pp_result) = inputs.solute_value("tmpplfer")?;
    let soften = |ul: Option<UncertaintyLevel>| {
        ul.map(|mut ul| {
            if ul.level == Some(4) {
                ul.level = Some(2);
            }
            ul
        })
    };
    let tm_ul = soften(tm_result.uncertainty_level);
    let pp_ul = soften(pp_result.uncertainty_level);
    let tagged = |ul: Option<UncertaintyLevel>| ul.is_some_and(|ul| ul.is_tagged());

    let (prediction, level, error) = match (tagged(tm_ul), tagged(pp_ul)) {
        (true, false) => (tm, tm_ul, tm_result.error),
        (false, true) => (pp, pp_ul, pp_result.error),
        _ => {
            let e1 = tm_result.error.unwrap_or(0.0);
            let e2 = pp_result.error.unwrap_or(0.0);
            (
                (tm + pp) / 2.0,
                UncertaintyLevel::aggregate([tm_ul, pp_ul]),
                Some(((0.5 * e1).powi(2) + (0.5 * e2).powi(2)).sqrt()),
            )
        }
    };

    Ok(QsarResult {
        prediction: Some(prediction),
        uncertainty_level: level,
        error,
        note: inputs.propagated_notes.to_string(),
        ..QsarResult::default()
    })
}
