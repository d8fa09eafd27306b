use super::context::InterpreterError;
use crate::core::models::definition::{DomainConfig, ModelDefinition};
use crate::core::models::result::round_to;
use crate::core::similarity;
use tracing::debug;

pub const LEVEL_VIOLATION: u8 = 5;
pub const LEVEL_CLAMPED: u8 = 6;

/// Outcome of the applicability-domain check for one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainAssessment {
    pub prediction: f64,
    pub level: u8,
    pub error: f64,
    pub note: String,
}

/// Levels 0-4 from the fragment sum, CSS and leverage, first match wins.
pub fn base_level(
    config: &DomainConfig,
    fragment_sum: f64,
    css: f64,
    leverage: f64,
) -> (u8, Vec<&'static str>) {
    let [css_low, css_out] = config.css_cutoffs;
    let [lev_high, lev_outlier] = config.leverage_cutoffs;

    if fragment_sum == 0.0 {
        return (4, vec!["no fragment overlap with training dataset"]);
    }
    if leverage >= 1.0 {
        return (3, vec!["leverage > 1"]);
    }

    // Levels use inclusive cutoffs; notes only name metrics strictly past them.
    let mut notes = Vec::new();
    if css <= css_out || leverage >= lev_outlier {
        if css < css_out {
            notes.push("out of domain");
        }
        if leverage > lev_outlier {
            notes.push("structural outlier");
        }
        return (2, notes);
    }
    if css <= css_low || leverage >= lev_high {
        if css < css_low {
            notes.push("low similarity");
        }
        if leverage > lev_high {
            notes.push("high leverage");
        }
        return (1, notes);
    }
    (0, notes)
}

/// Classifies a raw prediction against the model's training set.
///
/// Atom-check violations override levels 0-4 with level 5, and a prediction outside the
/// declared bounds is clamped and forced to level 6 with the prior level noted. The error
/// stays that of the prior level.
pub fn classify(
    definition: &ModelDefinition,
    config: &DomainConfig,
    counts: &[f64],
    prediction: f64,
    violations: &[String],
) -> Result<DomainAssessment, InterpreterError> {
    let range = definition.domain_range();
    let query = &counts[range.clone()];
    let fragment_sum: f64 = query.iter().sum();

    let (mut level, notes) = if fragment_sum == 0.0 {
        base_level(config, fragment_sum, 0.0, 0.0)
    } else {
        let inverse = definition
            .leverage_inverse(&range)
            .ok_or_else(|| InterpreterError::MissingLeverageMatrix(range.clone()))?;
        let leverage = similarity::leverage(query, inverse);
        let stdev = definition.stdev();
        let css = similarity::chemical_similarity_score(
            query,
            definition.training.slices(range.clone()),
            &stdev[range.clone()],
            similarity::CSS_TOP_N,
        );
        debug!(model = %definition.name, css, leverage, "Domain metrics");
        base_level(config, fragment_sum, css, leverage)
    };
    let mut notes: Vec<String> = notes.into_iter().map(str::to_string).collect();

    if !violations.is_empty() {
        level = LEVEL_VIOLATION;
        notes.extend(violations.iter().cloned());
    }

    let error = config.error_for(level);
    let mut prediction = prediction;
    let digits = definition.settings.metadata.round_digits.unwrap_or(2);
    if let Some(lower) = config.lower_bound.filter(|&lb| prediction < lb) {
        notes.push(format!(
            "prediction ({}) less than smallest value in training set, original aggregate UL: {}",
            round_to(prediction, digits),
            level
        ));
        prediction = lower;
        level = LEVEL_CLAMPED;
    } else if let Some(upper) = config.upper_bound.filter(|&ub| prediction > ub) {
        notes.push(format!(
            "prediction ({}) greater than largest value in training set, original aggregate UL: {}",
            round_to(prediction, digits),
            level
        ));
        prediction = upper;
        level = LEVEL_CLAMPED;
    }

    debug!(model = %definition.name, level, "Assigned uncertainty level");
    Ok(DomainAssessment {
        prediction,
        level,
        error,
        note: notes.join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::definition::fixtures::simple_definition;

    fn config() -> DomainConfig {
        simple_definition().domain.unwrap()
    }

    #[test]
    fn zero_fragment_sum_is_level_four_regardless_of_metrics() {
        let (level, notes) = base_level(&config(), 0.0, 1.0, 0.0);
        assert_eq!(level, 4);
        assert_eq!(notes, vec!["no fragment overlap with training dataset"]);

        let definition = simple_definition();
        let assessment = classify(&definition, &config(), &[1.0, 0.0, 0.0], 1.0, &[]).unwrap();
        assert_eq!(assessment.level, 4);
        assert_eq!(assessment.error, 0.5);
    }

    #[test]
    fn identical_training_row_is_in_domain() {
        let definition = simple_definition();
        // Four training rows pad the five-neighbor CSS with weak matches, so the cutoffs
        // are loosened to isolate the identical row.
        let mut config = config();
        config.css_cutoffs = [0.3, 0.2];
        config.leverage_cutoffs = [0.9, 0.95];
        let assessment =
            classify(&definition, &config, &[1.0, 2.0, 1.0], 1.0, &[]).unwrap();
        assert_eq!(assessment.level, 0);
        assert_eq!(assessment.note, "");
        assert_eq!(assessment.error, 0.1);
    }

    #[test]
    fn leverage_at_or_above_one_is_level_three() {
        let (level, notes) = base_level(&config(), 3.0, 0.99, 1.0);
        assert_eq!(level, 3);
        assert_eq!(notes, vec!["leverage > 1"]);
    }

    #[test]
    fn both_out_of_domain_notes_are_appended() {
        let (level, notes) = base_level(&config(), 3.0, 0.4, 0.95);
        assert_eq!(level, 2);
        assert_eq!(notes, vec!["out of domain", "structural outlier"]);

        let (level, notes) = base_level(&config(), 3.0, 0.7, 0.7);
        assert_eq!(level, 1);
        assert_eq!(notes, vec!["low similarity", "high leverage"]);
    }

    #[test]
    fn metrics_exactly_at_cutoffs_set_the_level_without_a_note() {
        let config = config();
        let (level, notes) = base_level(&config, 3.0, 0.5, 0.0);
        assert_eq!(level, 2);
        assert!(notes.is_empty());

        let (level, notes) = base_level(&config, 3.0, 0.99, 0.9);
        assert_eq!(level, 2);
        assert!(notes.is_empty());

        let (level, notes) = base_level(&config, 3.0, 0.75, 0.6);
        assert_eq!(level, 1);
        assert!(notes.is_empty());
    }

    #[test]
    fn degrading_css_never_lowers_the_level() {
        let config = config();
        for leverage in [0.0, 0.3, 0.65, 0.92] {
            let mut previous = 0;
            for step in (0..=100).rev() {
                let css = step as f64 / 100.0;
                let (level, _) = base_level(&config, 2.0, css, leverage);
                assert!(level >= previous, "css {} lev {}", css, leverage);
                previous = level;
            }
        }
    }

    #[test]
    fn atom_violations_escalate_to_level_five() {
        let definition = simple_definition();
        let violations = vec!["unmatched nitro".to_string()];
        let assessment =
            classify(&definition, &config(), &[1.0, 0.0, 0.0], 1.0, &violations).unwrap();
        assert_eq!(assessment.level, 5);
        assert_eq!(assessment.error, 0.6);
        assert_eq!(
            assessment.note,
            "no fragment overlap with training dataset, unmatched nitro"
        );
    }

    #[test]
    fn prediction_above_bound_is_clamped_to_level_six() {
        let definition = simple_definition();
        let mut config = config();
        config.lower_bound = Some(0.0);
        config.upper_bound = Some(9.0);
        let assessment = classify(&definition, &config, &[1.0, 0.0, 0.0], 9.8, &[]).unwrap();
        assert_eq!(assessment.prediction, 9.0);
        assert_eq!(assessment.level, 6);
        assert_eq!(assessment.error, config.errors[4]);
        assert!(assessment.note.contains("9.8"));
        assert!(assessment.note.contains("original aggregate UL: 4"));
    }

    #[test]
    fn prediction_below_bound_is_clamped() {
        let definition = simple_definition();
        let assessment =
            classify(&definition, &config(), &[1.0, 0.0, 0.0], 0.1234, &[]).unwrap();
        assert_eq!(assessment.prediction, 0.5);
        assert!(assessment.note.contains(
            "prediction (0.12) less than smallest value in training set, original aggregate UL: 4"
        ));
    }
}
