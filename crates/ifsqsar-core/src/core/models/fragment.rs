use std::fmt;
use std::str::FromStr;

/// What a single regression input measures.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentKind {
    /// A literal value, typically the intercept column (1.0).
    Constant(f64),
    /// A substructure pattern whose matches are counted.
    Pattern(String),
    /// A whole-structure scalar such as ring count or molecular weight.
    Holistic(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub kind: FragmentKind,
    /// Training-set standard deviation of this fragment's count, used by similarity scoring.
    pub stdev: f64,
}

impl Fragment {
    pub fn constant(value: f64) -> Self {
        Self {
            kind: FragmentKind::Constant(value),
            stdev: 0.0,
        }
    }

    pub fn pattern(pattern: &str, stdev: f64) -> Self {
        Self {
            kind: FragmentKind::Pattern(pattern.to_string()),
            stdev,
        }
    }

    pub fn holistic(name: &str, stdev: f64) -> Self {
        Self {
            kind: FragmentKind::Holistic(name.to_string()),
            stdev,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, FragmentKind::Constant(_))
    }

    pub fn label(&self) -> String {
        match &self.kind {
            FragmentKind::Constant(v) => format!("constant({})", v),
            FragmentKind::Pattern(p) => p.clone(),
            FragmentKind::Holistic(n) => n.clone(),
        }
    }
}

/// How pattern matches are turned into counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CountingPolicy {
    /// Every match counts, overlapping or not.
    #[default]
    Simple,
    /// A match counts only if none of its atoms were claimed by an earlier accepted match.
    NonOverlapping,
    /// 1 when the pattern matches at all, else 0.
    Presence,
}

impl fmt::Display for CountingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CountingPolicy::Simple => "mlr",
            CountingPolicy::NonOverlapping => "mlrx",
            CountingPolicy::Presence => "mlra",
        };
        f.write_str(label)
    }
}

impl FromStr for CountingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mlr" => Ok(CountingPolicy::Simple),
            "mlrx" => Ok(CountingPolicy::NonOverlapping),
            "mlra" => Ok(CountingPolicy::Presence),
            other => Err(format!("unknown model type '{}'", other)),
        }
    }
}
