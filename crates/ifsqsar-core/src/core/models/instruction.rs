use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// A scalar held in the interpreter namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Reads a literal token, preferring a number when the token parses as one.
    pub fn from_token(token: &str) -> Self {
        match token.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(token.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// An instruction argument: a numeric literal, or a name that resolves through the
/// namespace and otherwise stands for itself as text.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Name(String),
}

impl Operand {
    fn from_token(token: &str) -> Self {
        match Value::from_token(token) {
            Value::Number(n) => Operand::Number(n),
            Value::Text(s) => Operand::Name(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulate {
    AddTo,
    SubtractFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    GreaterThan,
    LessThan,
    EqualTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Multiply,
    Power,
    /// `log(right) / log(left)`: the left operand is the base.
    Logarithm,
    /// Rounds the left operand to `right` decimal places.
    Round,
}

/// Which fragment-slice computation an accumulating instruction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOp {
    ApplyCoefficients,
    SumCounts,
    ApplySimilarity,
    CalculateCss,
    CalculateLeverage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Define {
        name: String,
        value: Value,
    },
    /// Computes a quantity over `range` of the fragment vector and adds it to (or
    /// subtracts it from) `target`.
    Slice {
        op: SliceOp,
        range: Range<usize>,
        mode: Accumulate,
        target: String,
    },
    CheckAtomViolations {
        level_var: String,
        note_var: String,
    },
    Binary {
        op: BinaryOp,
        target: String,
        left: Operand,
        right: Operand,
    },
    Concat {
        target: String,
        left: Operand,
        right: Operand,
    },
    Ln {
        target: String,
        operand: Operand,
    },
    If {
        left: Operand,
        comparator: Comparator,
        right: Operand,
    },
    Else,
    EndIf,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstructionParseError {
    #[error("instruction {index}: empty instruction row")]
    Empty { index: usize },
    #[error("instruction {index}: unknown opcode '{opcode}'")]
    UnknownOpcode { index: usize, opcode: String },
    #[error("instruction {index} ('{opcode}'): expected {expected} arguments, found {found}")]
    Arity {
        index: usize,
        opcode: String,
        expected: usize,
        found: usize,
    },
    #[error("instruction {index} ('{opcode}'): {message}")]
    InvalidArgument {
        index: usize,
        opcode: String,
        message: String,
    },
    #[error("unbalanced conditional: {0}")]
    Unbalanced(String),
}

fn strip_tag(token: &str) -> &str {
    token
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
}

/// Builds the typed instruction list from token rows such as
/// `["<applycoeff>", "0", "12", "<addto>", "RETURN"]`.
///
/// Fragment ranges are checked against `fragment_count` and conditionals must balance.
pub fn parse_program(
    rows: &[Vec<String>],
    fragment_count: usize,
) -> Result<Vec<Instruction>, InstructionParseError> {
    let mut program = Vec::with_capacity(rows.len());
    let mut depth = 0usize;

    for (index, row) in rows.iter().enumerate() {
        let Some(first) = row.first() else {
            return Err(InstructionParseError::Empty { index });
        };
        let opcode = strip_tag(first).to_ascii_lowercase();
        let args = &row[1..];
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(InstructionParseError::Arity {
                    index,
                    opcode: opcode.clone(),
                    expected,
                    found: args.len(),
                })
            }
        };
        let invalid = |message: String| InstructionParseError::InvalidArgument {
            index,
            opcode: opcode.clone(),
            message,
        };

        let instruction = match opcode.as_str() {
            "define" => {
                arity(2)?;
                Instruction::Define {
                    name: args[0].clone(),
                    value: Value::from_token(&args[1]),
                }
            }
            "applycoeff" | "sumcounts" | "applysimil" | "calculatecss" | "calculateleverage" => {
                arity(4)?;
                let op = match opcode.as_str() {
                    "applycoeff" => SliceOp::ApplyCoefficients,
                    "sumcounts" => SliceOp::SumCounts,
                    "applysimil" => SliceOp::ApplySimilarity,
                    "calculatecss" => SliceOp::CalculateCss,
                    _ => SliceOp::CalculateLeverage,
                };
                let lo: usize = args[0]
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not a fragment index", args[0])))?;
                let hi: usize = args[1]
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not a fragment index", args[1])))?;
                if lo > hi || hi > fragment_count {
                    return Err(invalid(format!(
                        "range {}..{} is outside the {} fragments",
                        lo, hi, fragment_count
                    )));
                }
                let mode = match strip_tag(&args[2]) {
                    "addto" => Accumulate::AddTo,
                    "subfrom" => Accumulate::SubtractFrom,
                    other => return Err(invalid(format!("unknown accumulation '{}'", other))),
                };
                Instruction::Slice {
                    op,
                    range: lo..hi,
                    mode,
                    target: args[3].clone(),
                }
            }
            "checkatomviolations" => {
                arity(2)?;
                Instruction::CheckAtomViolations {
                    level_var: args[0].clone(),
                    note_var: args[1].clone(),
                }
            }
            "add" | "multiply" | "power" | "logarithm" | "round" => {
                arity(3)?;
                let op = match opcode.as_str() {
                    "add" => BinaryOp::Add,
                    "multiply" => BinaryOp::Multiply,
                    "power" => BinaryOp::Power,
                    "logarithm" => BinaryOp::Logarithm,
                    _ => BinaryOp::Round,
                };
                Instruction::Binary {
                    op,
                    target: args[0].clone(),
                    left: Operand::from_token(&args[1]),
                    right: Operand::from_token(&args[2]),
                }
            }
            "concat" => {
                arity(3)?;
                // Concatenation is textual, so numeric-looking tokens stay as written.
                Instruction::Concat {
                    target: args[0].clone(),
                    left: Operand::Name(args[1].clone()),
                    right: Operand::Name(args[2].clone()),
                }
            }
            "ln" => {
                arity(2)?;
                Instruction::Ln {
                    target: args[0].clone(),
                    operand: Operand::from_token(&args[1]),
                }
            }
            "if" => {
                arity(3)?;
                let comparator = match strip_tag(&args[1]) {
                    "greaterthan" => Comparator::GreaterThan,
                    "lessthan" => Comparator::LessThan,
                    "equalto" => Comparator::EqualTo,
                    other => return Err(invalid(format!("unknown comparator '{}'", other))),
                };
                depth += 1;
                Instruction::If {
                    left: Operand::from_token(&args[0]),
                    comparator,
                    right: Operand::from_token(&args[2]),
                }
            }
            "else" => {
                if depth == 0 {
                    return Err(InstructionParseError::Unbalanced(format!(
                        "'else' at instruction {} has no matching 'if'",
                        index
                    )));
                }
                Instruction::Else
            }
            "endif" => {
                if depth == 0 {
                    return Err(InstructionParseError::Unbalanced(format!(
                        "'endif' at instruction {} has no matching 'if'",
                        index
                    )));
                }
                depth -= 1;
                Instruction::EndIf
            }
            _ => {
                return Err(InstructionParseError::UnknownOpcode {
                    index,
                    opcode: first.clone(),
                });
            }
        };
        program.push(instruction);
    }

    if depth != 0 {
        return Err(InstructionParseError::Unbalanced(format!(
            "{} 'if' block(s) are never closed",
            depth
        )));
    }
    Ok(program)
}

/// The program used by models that declare no instructions: the mean coefficient row
/// applied to every fragment.
pub fn default_program(fragment_count: usize) -> Vec<Instruction> {
    vec![
        Instruction::Define {
            name: "RETURN".to_string(),
            value: Value::Number(0.0),
        },
        Instruction::Slice {
            op: SliceOp::ApplyCoefficients,
            range: 0..fragment_count,
            mode: Accumulate::AddTo,
            target: "RETURN".to_string(),
        },
    ]
}
