use crate::core::models::definition::StructureFlag;
use crate::core::models::ids::ModelId;
use crate::core::models::result::QsarResult;
use crate::core::structure::{StructureMatcher, has_charged_atom};
use crate::engine::config::{ApplyConfig, InputTableConfig, OutputConfig, OutputField, OutputShape};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::registry::ModelRegistry;
use itertools::Itertools;
use tracing::{info, instrument, warn};

const NOTE_SEPARATORS: [&str; 4] = [",", ";", "|", "~"];
const NO_VALUE: &str = "nan";

/// Everything produced for one input structure.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureReport {
    pub input: String,
    /// Empty when the structure could not be read or a neutral-only model rejected it.
    pub canonical_id: String,
    pub structure_note: String,
    /// One result per requested model, in request order, labelled by model name.
    pub results: Vec<(String, QsarResult)>,
}

/// A structure or mixture read from its notation.
#[derive(Debug, Clone)]
pub struct ParsedInput<H> {
    pub solutes: Vec<H>,
    pub solvents: Vec<H>,
    pub canonical_id: String,
    pub note: String,
    pub success: bool,
}

fn append_note(note: &mut String, addition: &str) {
    if addition.is_empty() {
        return;
    }
    if !note.is_empty() {
        note.push_str(", ");
    }
    note.push_str(addition);
}

/// Splits `{tag}text{tag}text` into tags (braces included) and the text between them.
fn split_mixture(notation: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = notation;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let close = open + close;
        if open > 0 {
            segments.push(&rest[..open]);
        }
        segments.push(&rest[open..=close]);
        rest = &rest[close + 1..];
    }
    if !rest.is_empty() {
        segments.push(rest);
    }
    segments
}

fn is_mixture(notation: &str) -> bool {
    notation
        .find('{')
        .is_some_and(|open| notation[open..].contains('}'))
}

/// Parses a single structure or a `{solute}X{solvent}Y` mixture.
///
/// Mixture components are parsed one by one. Their canonical ids are concatenated behind
/// their tags, and each component's parse note is prefixed with its role and notation.
pub fn parse_input<M: StructureMatcher>(matcher: &M, notation: &str) -> ParsedInput<M::Handle> {
    let mut parsed = ParsedInput {
        solutes: Vec::new(),
        solvents: Vec::new(),
        canonical_id: String::new(),
        note: String::new(),
        success: false,
    };

    if !is_mixture(notation) {
        match matcher.parse(notation) {
            Ok(handle) => {
                parsed.canonical_id = matcher.canonical_id(&handle);
                parsed.solutes.push(handle);
                parsed.success = true;
            }
            Err(e) => parsed.note = e.to_string(),
        }
        return parsed;
    }

    #[derive(Clone, Copy)]
    enum Next {
        Tag,
        Solute,
        Solvent,
    }

    let mut next = Next::Tag;
    let mut all_parsed = true;
    for segment in split_mixture(notation) {
        match next {
            Next::Solute | Next::Solvent => {
                let (tag, role) = match next {
                    Next::Solute => ("{solute}", "Solute"),
                    _ => ("{solvent}", "Solvent"),
                };
                match matcher.parse(segment) {
                    Ok(handle) => {
                        parsed.canonical_id.push_str(tag);
                        parsed.canonical_id.push_str(&matcher.canonical_id(&handle));
                        match next {
                            Next::Solute => parsed.solutes.push(handle),
                            _ => parsed.solvents.push(handle),
                        }
                    }
                    Err(e) => {
                        all_parsed = false;
                        append_note(
                            &mut parsed.note,
                            &format!("Notes for {} ({}): {}", role, segment, e),
                        );
                    }
                }
                next = Next::Tag;
            }
            Next::Tag => {
                let inner = segment.trim_start_matches('{').trim_end_matches('}');
                match inner.split(',').next().unwrap_or_default() {
                    "solute" => next = Next::Solute,
                    "solvent" => next = Next::Solvent,
                    _ => append_note(
                        &mut parsed.note,
                        "SMILES error: invalid component type specification",
                    ),
                }
            }
        }
    }
    parsed.success = all_parsed && !parsed.canonical_id.is_empty();
    parsed
}

/// Replaces the output separator and end-of-line inside free text, so a note can never
/// break the table layout.
pub fn sanitize_note(note: &str, separator: &str, end_of_line: &str) -> String {
    let mut replacements: Vec<&str> = NOTE_SEPARATORS.to_vec();
    let mut text = note.to_string();
    if let Some(pos) = replacements.iter().position(|s| *s == separator) {
        replacements.remove(pos);
        text = text.replace(separator, replacements[0]);
    }
    if let Some(pos) = replacements.iter().position(|s| *s == end_of_line) {
        replacements.remove(pos);
        text = text.replace(end_of_line, replacements[1]);
    }
    text
}

/// Applies every model in `models` to one structure or mixture.
///
/// Unreadable input and neutral-only models meeting a charged structure yield results with
/// no values; only model definition and evaluation faults are returned as errors.
#[instrument(skip_all, name = "apply_models_to_structure")]
pub fn apply_models_to_structure<M: StructureMatcher>(
    registry: &mut ModelRegistry,
    matcher: &M,
    models: &[ModelId],
    notation: &str,
) -> Result<StructureReport, EngineError> {
    let parsed = parse_input(matcher, notation);
    let charged = has_charged_atom(&parsed.canonical_id);
    let mut neutral_rejected = false;
    let mut results = Vec::with_capacity(models.len());

    for &id in models {
        registry.load(id)?;
        let name = registry
            .catalog_entry(id)
            .map(|c| c.name.clone())
            .unwrap_or_default();

        if registry.structure_flag(id) == Some(StructureFlag::Neutrals) && charged {
            neutral_rejected = true;
            results.push((name, QsarResult::default()));
            continue;
        }
        if !parsed.success {
            results.push((name, QsarResult::default()));
            continue;
        }
        let result = registry.apply_model(id, matcher, &parsed.solutes, &parsed.solvents, &[])?;
        results.push((name, result));
    }

    let mut report = StructureReport {
        input: notation.to_string(),
        canonical_id: parsed.canonical_id,
        structure_note: parsed.note,
        results,
    };
    if neutral_rejected {
        report.canonical_id.clear();
        report.structure_note = format!("error: neutral structure required, {}", report.structure_note);
    }
    Ok(report)
}

fn format_number(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => format!("{:?}", v),
        _ => NO_VALUE.to_string(),
    }
}

fn structure_value(report: &StructureReport, field: OutputField, output: &OutputConfig) -> String {
    match field {
        OutputField::InputNotation => report.input.clone(),
        OutputField::CanonicalId => report.canonical_id.clone(),
        OutputField::StructureNote => {
            sanitize_note(&report.structure_note, &output.separator, &output.end_of_line)
        }
        _ => String::new(),
    }
}

fn model_value(result: &QsarResult, field: OutputField, output: &OutputConfig) -> String {
    match field {
        OutputField::Units => result.units.clone(),
        OutputField::Prediction => format_number(result.prediction),
        OutputField::UncertaintyLevel => result
            .uncertainty_level
            .map(|ul| ul.to_string())
            .unwrap_or_else(|| NO_VALUE.to_string()),
        OutputField::Error => format_number(result.error),
        OutputField::Note => sanitize_note(&result.note, &output.separator, &output.end_of_line),
        _ => String::new(),
    }
}

/// `(label, value)` for every selected cell of a report, structure fields first.
fn cells(report: &StructureReport, output: &OutputConfig) -> Vec<(String, String)> {
    let structure = output
        .fields
        .iter()
        .filter(|f| !f.is_per_model())
        .map(|&f| (f.label().to_string(), structure_value(report, f, output)));
    let per_model = report.results.iter().flat_map(|(name, result)| {
        output
            .fields
            .iter()
            .filter(|f| f.is_per_model())
            .map(move |&f| (format!("{} {}", name, f.label()), model_value(result, f, output)))
    });
    structure.chain(per_model).collect()
}

/// Renders one report as lines without end-of-line markers.
///
/// Rows produce an optional header line and one value line. Columns produce one line per
/// cell, prefixed with its label when `header` is set.
pub fn format_report(report: &StructureReport, output: &OutputConfig, header: bool) -> Vec<String> {
    let cells = cells(report, output);
    match output.shape {
        OutputShape::Rows => {
            let mut lines = Vec::with_capacity(2);
            if header {
                lines.push(cells.iter().map(|(label, _)| label).join(&output.separator));
            }
            lines.push(cells.iter().map(|(_, value)| value).join(&output.separator));
            lines
        }
        OutputShape::Columns => cells
            .into_iter()
            .map(|(label, value)| {
                if header {
                    format!("{}{}{}", label, output.separator, value)
                } else {
                    value
                }
            })
            .collect(),
    }
}

/// Applies the configured models to every notation and renders the combined table.
///
/// In row layout each structure adds one line; in column layout each structure adds one
/// column to every line. The header, if enabled, comes from the first structure.
#[instrument(skip_all, name = "apply_models_to_structure_list")]
pub fn apply_models_to_structure_list<M: StructureMatcher>(
    registry: &mut ModelRegistry,
    matcher: &M,
    config: &ApplyConfig,
    notations: &[String],
    reporter: &ProgressReporter,
) -> Result<Vec<String>, EngineError> {
    let models = registry.select_models(config.models.as_slice())?;
    let output = &config.output;
    info!(
        structures = notations.len(),
        models = models.len(),
        "Applying models to structure list"
    );
    reporter.report(Progress::BatchStart {
        total: notations.len() as u64,
    });

    let mut lines: Vec<String> = Vec::new();
    for (index, notation) in notations.iter().enumerate() {
        let report = apply_models_to_structure(registry, matcher, &models, notation)?;
        let rendered = format_report(&report, output, output.header && index == 0);
        match output.shape {
            OutputShape::Rows => lines.extend(rendered),
            OutputShape::Columns if index == 0 => lines = rendered,
            OutputShape::Columns => {
                if rendered.len() != lines.len() {
                    return Err(EngineError::Internal(format!(
                        "structure '{}' produced {} lines, expected {}",
                        notation,
                        rendered.len(),
                        lines.len()
                    )));
                }
                for (line, value) in lines.iter_mut().zip(rendered) {
                    line.push_str(&output.separator);
                    line.push_str(&value);
                }
            }
        }
        reporter.report(Progress::StructureDone);
    }

    reporter.report(Progress::BatchFinish);
    Ok(lines)
}

/// An input table: its non-empty lines and the notation taken from each data row.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTable {
    pub lines: Vec<String>,
    pub notations: Vec<String>,
}

/// Reads a delimited table, locating the notation column by name in the target header row
/// (case-insensitive). The first column is used when no header matches.
pub fn read_input_table(content: &str, config: &InputTableConfig) -> InputTable {
    let lines: Vec<String> = content
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let column = config
        .header_target_row
        .checked_sub(1)
        .and_then(|row| lines.get(row))
        .and_then(|header| {
            header
                .split(config.separator.as_str())
                .position(|name| name.trim().eq_ignore_ascii_case(&config.notation_column))
        })
        .unwrap_or(0);

    let notations = lines
        .iter()
        .skip(config.header_rows)
        .map(|line| {
            line.split(config.separator.as_str())
                .nth(column)
                .unwrap_or_default()
                .to_string()
        })
        .collect();

    InputTable { lines, notations }
}

/// Appends result rows to the input table rows.
///
/// With a header, the result header joins the target header row and the other header rows
/// are padded with empty cells.
pub fn merge_with_input(table: &InputTable, input: &InputTableConfig, output: &OutputConfig, results: &[String]) -> Vec<String> {
    let sep = output.separator.as_str();
    let mut merged = table.lines.clone();
    let mut offset = 0;
    if output.header {
        if let Some(header) = results.first() {
            let padding = sep.repeat(header.matches(sep).count());
            for (i, line) in merged.iter_mut().take(input.header_rows).enumerate() {
                if i + 1 == input.header_target_row {
                    *line = format!("{}{}{}", line, sep, header);
                } else {
                    *line = format!("{}{}{}", line, sep, padding);
                }
            }
            offset = 1;
        }
    }
    for (line, result) in merged
        .iter_mut()
        .skip(input.header_rows)
        .zip(results.iter().skip(offset))
    {
        *line = format!("{}{}{}", line, sep, result);
    }
    merged
}

/// Reads a table, applies the configured models and returns the output text.
///
/// Input columns are echoed only in row layout; the flag is ignored with a warning for
/// column layout.
pub fn apply_models_to_table<M: StructureMatcher>(
    registry: &mut ModelRegistry,
    matcher: &M,
    config: &ApplyConfig,
    content: &str,
    reporter: &ProgressReporter,
) -> Result<String, EngineError> {
    let table = read_input_table(content, &config.input);
    let lines = apply_models_to_structure_list(registry, matcher, config, &table.notations, reporter)?;
    let output = &config.output;
    let lines = match (output.include_input, output.shape) {
        (true, OutputShape::Rows) => merge_with_input(&table, &config.input, output, &lines),
        (true, OutputShape::Columns) => {
            warn!("Input columns can only be echoed in row layout");
            lines
        }
        (false, _) => lines,
    };
    Ok(render(&lines, &output.end_of_line))
}

/// Joins lines with `end_of_line`, terminating the last one.
pub fn render(lines: &[String], end_of_line: &str) -> String {
    let mut text = lines.join(end_of_line);
    if !lines.is_empty() {
        text.push_str(end_of_line);
    }
    text
}
