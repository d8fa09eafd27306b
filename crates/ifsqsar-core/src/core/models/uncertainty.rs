use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The highest numeric uncertainty level.
pub const MAX_LEVEL: u8 = 6;

/// Discrete confidence classification attached to a prediction.
///
/// A level is normally a plain integer 0-6. Values supplied by a user or taken from
/// experimental data carry a `U` or `E` tag, and meta-models that blend tagged and
/// predicted inputs produce composites such as `E2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UncertaintyLevel {
    pub experimental: bool,
    pub user: bool,
    pub level: Option<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UncertaintyParseError {
    #[error("User-defined UL must be E, U, int 0-6 or combination thereof (got '{0}')")]
    Invalid(String),
}

impl UncertaintyLevel {
    pub fn new(level: u8) -> Self {
        Self {
            level: Some(level.min(MAX_LEVEL)),
            ..Self::default()
        }
    }

    pub fn user() -> Self {
        Self {
            user: true,
            ..Self::default()
        }
    }

    pub fn experimental() -> Self {
        Self {
            experimental: true,
            ..Self::default()
        }
    }

    pub fn is_tagged(&self) -> bool {
        self.experimental || self.user
    }

    /// `true` for a level that is exactly `U`, with no experimental tag or number.
    pub fn is_user_only(&self) -> bool {
        self.user && !self.experimental && self.level.is_none()
    }

    /// `true` for a level that is exactly `E`, with no user tag or number.
    pub fn is_experimental_only(&self) -> bool {
        self.experimental && !self.user && self.level.is_none()
    }

    /// Merges several levels into one.
    ///
    /// Tags are unioned. The numeric part is the ceiling of the root-mean-square of the
    /// numeric levels present, except that any level 5 (an atom-count violation) forces 5.
    /// Returns `None` when no input carries a tag or a number.
    pub fn aggregate<I>(levels: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<UncertaintyLevel>>,
    {
        let mut merged = UncertaintyLevel::default();
        let mut sum_squares = 0.0;
        let mut count = 0usize;
        let mut has_violation = false;

        for ul in levels.into_iter().flatten() {
            merged.experimental |= ul.experimental;
            merged.user |= ul.user;
            if let Some(level) = ul.level {
                has_violation |= level == 5;
                sum_squares += f64::from(level).powi(2);
                count += 1;
            }
        }

        if count > 0 {
            merged.level = Some(if has_violation {
                5
            } else {
                let rms = (sum_squares / count as f64).sqrt();
                (rms.ceil() as u8).min(MAX_LEVEL)
            });
        }

        if merged.level.is_none() && !merged.is_tagged() {
            None
        } else {
            Some(merged)
        }
    }
}

impl From<u8> for UncertaintyLevel {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl fmt::Display for UncertaintyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.experimental {
            f.write_str("E")?;
        }
        if self.user {
            f.write_str("U")?;
        }
        if let Some(level) = self.level {
            write!(f, "{}", level)?;
        }
        Ok(())
    }
}

impl FromStr for UncertaintyLevel {
    type Err = UncertaintyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UncertaintyParseError::Invalid(s.to_string());
        let text = s.trim();
        if text.is_empty() {
            return Err(invalid());
        }

        let mut parsed = UncertaintyLevel::default();
        for c in text.chars() {
            match c {
                'E' if !parsed.experimental => parsed.experimental = true,
                'U' if !parsed.user => parsed.user = true,
                '0'..='6' if parsed.level.is_none() => {
                    parsed.level = Some(c as u8 - b'0');
                }
                _ => return Err(invalid()),
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_concatenates_tags_then_level() {
        assert_eq!(UncertaintyLevel::new(3).to_string(), "3");
        assert_eq!(UncertaintyLevel::user().to_string(), "U");
        let composite = UncertaintyLevel {
            experimental: true,
            user: false,
            level: Some(2),
        };
        assert_eq!(composite.to_string(), "E2");
    }

    #[test]
    fn parse_accepts_each_symbol_at_most_once() {
        assert_eq!("E".parse::<UncertaintyLevel>(), Ok(UncertaintyLevel::experimental()));
        assert_eq!("4".parse::<UncertaintyLevel>(), Ok(UncertaintyLevel::new(4)));
        let eu2: UncertaintyLevel = "EU2".parse().unwrap();
        assert!(eu2.experimental && eu2.user);
        assert_eq!(eu2.level, Some(2));
    }

    #[test]
    fn parse_rejects_repeats_and_foreign_characters() {
        for bad in ["", "EE", "7", "12", "X", "U-1", "e"] {
            assert!(
                bad.parse::<UncertaintyLevel>().is_err(),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn aggregate_takes_ceiling_of_root_mean_square() {
        let merged =
            UncertaintyLevel::aggregate([Some(UncertaintyLevel::new(1)), Some(UncertaintyLevel::new(2))])
                .unwrap();
        // sqrt((1 + 4) / 2) = 1.58
        assert_eq!(merged.level, Some(2));
    }

    #[test]
    fn aggregate_is_dominated_by_level_five() {
        let merged = UncertaintyLevel::aggregate([
            Some(UncertaintyLevel::new(0)),
            Some(UncertaintyLevel::new(5)),
            Some(UncertaintyLevel::new(0)),
        ])
        .unwrap();
        assert_eq!(merged.level, Some(5));
    }

    #[test]
    fn aggregate_unions_tags_and_skips_missing_levels() {
        let merged = UncertaintyLevel::aggregate([
            Some(UncertaintyLevel::experimental()),
            None,
            Some(UncertaintyLevel::new(2)),
        ])
        .unwrap();
        assert_eq!(merged.to_string(), "E2");
        assert_eq!(UncertaintyLevel::aggregate([None, None]), None);
    }
}
