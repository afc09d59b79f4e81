//! Allow-list and numeric bound validation for string-encoded values.

/// Numeric relation used by [`ValueComparator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Greater,
    GreaterOrEqual,
    Equal,
    LessOrEqual,
    Less,
}

impl Comparator {
    fn holds(self, value: f64, bound: f64) -> bool {
        match self {
            Self::Greater => value > bound,
            Self::GreaterOrEqual => value >= bound,
            #[allow(clippy::float_cmp)]
            Self::Equal => value == bound,
            Self::LessOrEqual => value <= bound,
            Self::Less => value < bound,
        }
    }
}

/// A single numeric bound, e.g. `>= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueComparator<'a> {
    pub comparator: Comparator,
    /// Bound in its string form, parsed as a number when checked
    pub value: &'a str,
}

impl<'a> ValueComparator<'a> {
    pub const fn new(comparator: Comparator, value: &'a str) -> Self {
        Self { comparator, value }
    }
}

/// Validator attached to a data item.
///
/// An unconfigured checker accepts every value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidValueChecker<'a> {
    #[default]
    Unconfigured,
    /// The value must equal one of the listed strings
    Strings(&'a [&'a str]),
    /// The value must parse as a number satisfying at least one comparator
    Comparators(&'a [ValueComparator<'a>]),
}

impl<'a> ValidValueChecker<'a> {
    pub const fn new() -> Self {
        Self::Unconfigured
    }

    pub const fn with_strings(valid: &'a [&'a str]) -> Self {
        Self::Strings(valid)
    }

    pub const fn with_comparators(comparators: &'a [ValueComparator<'a>]) -> Self {
        Self::Comparators(comparators)
    }

    pub const fn is_configured(&self) -> bool {
        !matches!(self, Self::Unconfigured)
    }

    /// Check a string-encoded value against the configured rule.
    pub fn is_valid_str(&self, value: &str) -> bool {
        match self {
            Self::Unconfigured => true,
            Self::Strings(valid) => {
                let found = valid.iter().any(|candidate| *candidate == value);
                if !found {
                    log_warn!("\"{}\" is not an allowed value", value);
                }
                found
            }
            Self::Comparators(comparators) => {
                let Ok(number) = value.trim().parse::<f64>() else {
                    log_warn!("\"{}\" is not numeric", value);
                    return false;
                };
                let found = comparators.iter().any(|bound| {
                    bound
                        .value
                        .trim()
                        .parse::<f64>()
                        .is_ok_and(|limit| bound.comparator.holds(number, limit))
                });
                if !found {
                    log_warn!("\"{}\" is outside every bound", value);
                }
                found
            }
        }
    }
}
