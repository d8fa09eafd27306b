use super::context::{EvaluationContext, InterpreterError, Namespace};
use crate::core::models::instruction::{BinaryOp, Comparator, Instruction, Operand, SliceOp, Value};
use crate::core::models::result::round_to;
use crate::core::similarity;
use std::cmp::Ordering;
use std::ops::Range;
use tracing::trace;

/// Values left in the reserved variables after a program has run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramOutput {
    pub prediction: f64,
    /// `Some` only when the program set both `WARN` and `ERROR`.
    pub level: Option<u8>,
    pub error: Option<f64>,
    pub note: Option<String>,
}

/// Runs a model's instruction list over a fresh namespace.
///
/// Execution keeps a stack of block-active flags starting at `[true]`. Ordinary
/// instructions run only while the top flag is set; `if`, `else` and `endif` always run.
pub struct Interpreter<'a> {
    ctx: EvaluationContext<'a>,
    namespace: Namespace,
    blocks: Vec<bool>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: EvaluationContext<'a>) -> Self {
        Self {
            ctx,
            namespace: Namespace::seeded(&ctx.definition.settings.extra),
            blocks: vec![true],
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn run(mut self) -> Result<ProgramOutput, InterpreterError> {
        for instruction in &self.ctx.definition.instructions {
            self.execute(instruction)?;
        }
        self.finish()
    }

    fn active(&self) -> bool {
        self.blocks.last().copied().unwrap_or(true)
    }

    pub fn execute(&mut self, instruction: &Instruction) -> Result<(), InterpreterError> {
        match instruction {
            Instruction::If {
                left,
                comparator,
                right,
            } => {
                let outer = self.active();
                let holds = outer && self.compare(left, *comparator, right)?;
                self.blocks.push(holds);
            }
            Instruction::Else => {
                let len = self.blocks.len();
                if len >= 2 {
                    self.blocks[len - 1] = !self.blocks[len - 1] && self.blocks[len - 2];
                }
            }
            Instruction::EndIf => {
                if self.blocks.len() > 1 {
                    self.blocks.pop();
                }
            }
            _ if !self.active() => {}
            Instruction::Define { name, value } => self.namespace.set(name, value.clone()),
            Instruction::Slice {
                op,
                range,
                mode,
                target,
            } => {
                let amount = self.slice_value(*op, range)?;
                trace!(?op, ?range, amount, target = %target, "Slice instruction");
                self.namespace.accumulate(target, *mode, amount)?;
            }
            Instruction::CheckAtomViolations {
                level_var,
                note_var,
            } => {
                let violated = !self.ctx.violations.is_empty();
                self.namespace
                    .set(level_var, Value::Number(if violated { 1.0 } else { 0.0 }));
                self.namespace
                    .set(note_var, Value::Text(self.ctx.violations.join(", ")));
            }
            Instruction::Binary {
                op,
                target,
                left,
                right,
            } => {
                let l = self.namespace.resolve_number(left)?;
                let r = self.namespace.resolve_number(right)?;
                let value = match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Multiply => l * r,
                    BinaryOp::Power => l.powf(r),
                    BinaryOp::Logarithm => {
                        if l <= 0.0 || l == 1.0 {
                            return Err(InterpreterError::MathDomain {
                                op: "logarithm base",
                                operand: l,
                            });
                        }
                        if r <= 0.0 {
                            return Err(InterpreterError::MathDomain {
                                op: "logarithm",
                                operand: r,
                            });
                        }
                        r.ln() / l.ln()
                    }
                    BinaryOp::Round => round_to(l, r as i32),
                };
                self.namespace.set(target, Value::Number(value));
            }
            Instruction::Concat {
                target,
                left,
                right,
            } => {
                let joined = format!(
                    "{}{}",
                    self.namespace.resolve_text(left),
                    self.namespace.resolve_text(right)
                );
                self.namespace.set(target, Value::Text(joined));
            }
            Instruction::Ln { target, operand } => {
                let x = self.namespace.resolve_number(operand)?;
                if x <= 0.0 {
                    return Err(InterpreterError::MathDomain {
                        op: "ln",
                        operand: x,
                    });
                }
                self.namespace.set(target, Value::Number(x.ln()));
            }
        }
        Ok(())
    }

    fn compare(
        &self,
        left: &Operand,
        comparator: Comparator,
        right: &Operand,
    ) -> Result<bool, InterpreterError> {
        let l = self.namespace.resolve_text(left);
        let r = self.namespace.resolve_text(right);
        let ordering = match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ if comparator == Comparator::EqualTo => return Ok(false),
            (Value::Text(t), _) | (_, Value::Text(t)) => {
                return Err(InterpreterError::TypeMismatch {
                    name: t.clone(),
                    value: t.clone(),
                });
            }
        };
        Ok(match comparator {
            Comparator::GreaterThan => ordering == Some(Ordering::Greater),
            Comparator::LessThan => ordering == Some(Ordering::Less),
            Comparator::EqualTo => ordering == Some(Ordering::Equal),
        })
    }

    fn slice_value(&self, op: SliceOp, range: &Range<usize>) -> Result<f64, InterpreterError> {
        let definition = self.ctx.definition;
        let query = self.ctx.slice(range);
        match op {
            SliceOp::ApplyCoefficients => {
                let rows = definition.coefficients.len() as f64;
                Ok(definition
                    .coefficients
                    .iter()
                    .map(|row| {
                        query
                            .iter()
                            .zip(&row[range.clone()])
                            .map(|(c, w)| c * w)
                            .sum::<f64>()
                    })
                    .sum::<f64>()
                    / rows)
            }
            SliceOp::SumCounts => Ok(query.iter().sum()),
            SliceOp::CalculateCss => {
                let stdev = definition.stdev();
                Ok(similarity::chemical_similarity_score(
                    query,
                    definition.training.slices(range.clone()),
                    &stdev[range.clone()],
                    similarity::CSS_TOP_N,
                ))
            }
            SliceOp::CalculateLeverage => {
                let inverse = definition
                    .leverage_inverse(range)
                    .ok_or_else(|| InterpreterError::MissingLeverageMatrix(range.clone()))?;
                Ok(similarity::leverage(query, inverse))
            }
            SliceOp::ApplySimilarity => {
                let stdev = definition.stdev();
                let folds = definition.training.fold_slices(range.clone());
                similarity::readacross(query, &folds, &stdev[range.clone()])
                    .ok_or(InterpreterError::EmptyTrainingSet("applySimilarity"))
            }
        }
    }

    fn finish(self) -> Result<ProgramOutput, InterpreterError> {
        let prediction = self.namespace.number("RETURN")?;
        if self.namespace.contains("WARN") && self.namespace.contains("ERROR") {
            let warn = self.namespace.number("WARN")?;
            let error = self.namespace.number("ERROR")?;
            let note = self
                .namespace
                .get("NOTE")
                .map(|v| v.to_string())
                .unwrap_or_default();
            Ok(ProgramOutput {
                prediction,
                level: Some(warn.trunc().clamp(0.0, 6.0) as u8),
                error: Some(error),
                note: Some(note),
            })
        } else {
            Ok(ProgramOutput {
                prediction,
                level: None,
                error: None,
                note: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::definition::fixtures::simple_definition;
    use crate::core::models::instruction::parse_program;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn program(rows: &[&[&str]]) -> Vec<Instruction> {
        let rows: Vec<Vec<String>> = rows
            .iter()
            .map(|r| r.iter().map(|t| t.to_string()).collect())
            .collect();
        parse_program(&rows, 3).unwrap()
    }

    fn run_program(rows: &[&[&str]], counts: &[f64], violations: &[String]) -> Result<ProgramOutput, InterpreterError> {
        let mut definition = simple_definition();
        definition.instructions = program(rows);
        let ctx = EvaluationContext::new(&definition, counts, violations);
        Interpreter::new(ctx).run()
    }

    #[test]
    fn default_program_applies_mean_coefficients() {
        let definition = simple_definition();
        let counts = [1.0, 2.0, 1.0];
        let output = Interpreter::new(EvaluationContext::new(&definition, &counts, &[]))
            .run()
            .unwrap();
        assert!(f64_approx_equal(output.prediction, 1.7));
        assert_eq!(output.level, None);
        assert_eq!(output.error, None);
    }

    #[test]
    fn else_branch_never_runs_inside_inactive_outer_block() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "0"],
                &["<if>", "1", "<greaterthan>", "2"],
                &["<if>", "1", "<greaterthan>", "2"],
                &["<define>", "RETURN", "1"],
                &["<else>"],
                &["<define>", "RETURN", "2"],
                &["<endif>"],
                &["<endif>"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.prediction, 0.0);
    }

    #[test]
    fn else_branch_runs_when_condition_fails_in_active_block() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "0"],
                &["<if>", "1", "<greaterthan>", "2"],
                &["<define>", "RETURN", "1"],
                &["<else>"],
                &["<define>", "RETURN", "2"],
                &["<endif>"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.prediction, 2.0);
    }

    #[test]
    fn arithmetic_instructions_compute_expected_values() {
        let output = run_program(
            &[
                &["<define>", "A", "8"],
                &["<logarithm>", "B", "2", "A"],
                &["<power>", "C", "B", "2"],
                &["<multiply>", "D", "C", "0.5"],
                &["<add>", "E", "D", "-0.25"],
                &["<round>", "RETURN", "E", "1"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert!(f64_approx_equal(output.prediction, 4.3));
    }

    #[test]
    fn arithmetic_on_unresolved_name_is_fatal() {
        let result = run_program(
            &[&["<add>", "RETURN", "missing", "1"]],
            &[1.0, 0.0, 0.0],
            &[],
        );
        assert!(matches!(
            result,
            Err(InterpreterError::UnresolvedVariable(name)) if name == "missing"
        ));
    }

    #[test]
    fn ln_of_non_positive_value_is_a_domain_error() {
        let result = run_program(&[&["<ln>", "RETURN", "0"]], &[1.0, 0.0, 0.0], &[]);
        assert!(matches!(result, Err(InterpreterError::MathDomain { op: "ln", .. })));
    }

    #[test]
    fn warn_error_and_note_are_reported() {
        let violations = vec!["unmatched ester".to_string()];
        let output = run_program(
            &[
                &["<define>", "RETURN", "1.5"],
                &["<define>", "ERROR", "0.3"],
                &["<checkatomviolations>", "WARN", "AV"],
                &["<concat>", "NOTE", "violations: ", "AV"],
            ],
            &[1.0, 0.0, 0.0],
            &violations,
        )
        .unwrap();
        assert_eq!(output.level, Some(1));
        assert_eq!(output.error, Some(0.3));
        assert_eq!(output.note.as_deref(), Some("violations: unmatched ester"));
    }

    #[test]
    fn fractional_warn_is_truncated() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "1.5"],
                &["<define>", "ERROR", "0.3"],
                &["<define>", "WARN", "2.7"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.level, Some(2));

        let output = run_program(
            &[
                &["<define>", "RETURN", "1.5"],
                &["<define>", "ERROR", "0.3"],
                &["<define>", "WARN", "9.4"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.level, Some(6));
    }

    #[test]
    fn namespace_holds_settings_but_not_counts() {
        let mut definition = simple_definition();
        definition
            .settings
            .extra
            .insert("SCALE".to_string(), Value::Number(2.0));
        let counts = [1.0, 2.0, 1.0];
        let interpreter = Interpreter::new(EvaluationContext::new(&definition, &counts, &[]));
        assert_eq!(interpreter.namespace().number("SCALE"), Ok(2.0));
        assert!(!interpreter.namespace().contains("RETURN"));
        assert_eq!(interpreter.ctx.slice(&(1..3)), &[2.0, 1.0]);
    }

    #[test]
    fn slice_instructions_accumulate_into_existing_targets() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "10"],
                &["<sumcounts>", "1", "3", "<subfrom>", "RETURN"],
            ],
            &[1.0, 2.0, 1.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.prediction, 7.0);

        let missing_target = run_program(
            &[&["<sumcounts>", "1", "3", "<addto>", "RETURN"]],
            &[1.0, 2.0, 1.0],
            &[],
        );
        assert!(missing_target.is_err());
    }

    #[test]
    fn css_and_leverage_slices_use_training_set() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "0"],
                &["<define>", "LEV", "0"],
                &["<calculatecss>", "1", "3", "<addto>", "RETURN"],
                &["<calculateleverage>", "1", "3", "<addto>", "LEV"],
            ],
            &[1.0, 2.0, 1.0],
            &[],
        )
        .unwrap();
        assert!(output.prediction > 0.0 && output.prediction <= 1.0);
    }

    #[test]
    fn readacross_averages_fold_nearest_values() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "0"],
                &["<applysimil>", "1", "3", "<addto>", "RETURN"],
            ],
            &[1.0, 2.0, 1.0],
            &[],
        )
        .unwrap();
        // Fold 1 nearest is the identical row (1.0); fold 2 nearest is [3, 1] (1.5).
        assert!(f64_approx_equal(output.prediction, 1.25));
    }

    #[test]
    fn text_comparison_with_unknown_names_treats_them_as_literals() {
        let output = run_program(
            &[
                &["<define>", "RETURN", "0"],
                &["<define>", "MODE", "fast"],
                &["<if>", "MODE", "<equalto>", "fast"],
                &["<define>", "RETURN", "1"],
                &["<endif>"],
            ],
            &[1.0, 0.0, 0.0],
            &[],
        )
        .unwrap();
        assert_eq!(output.prediction, 1.0);
    }
}
