use std::error::Error;
use std::fmt;

/// Errors that can occur while building or mutating a classifier.
///
/// None of these are fatal to the process; callers decide retry policy.
#[derive(Debug)]
pub enum ClassifierError {
    /// A flow or packet could not be projected into a [`crate::rule::Rule`]
    /// because its match encoding was malformed: a field wider than the
    /// classifier's point width, or a value/mask pair with mismatched
    /// lengths.
    InvalidRule { reason: String },

    /// A [`crate::range_tree::RangeTree`] insertion hit a pair of distinct,
    /// overlapping (but not identical) intervals at some level. This is
    /// recoverable: `PartitionSort` catches it and opens a new tree for the
    /// rejected rule rather than propagating the error further.
    ForbiddenOverlap,

    /// A deletion referenced a rule id that is not present in the
    /// classifier.
    RuleNotFound,

    /// An allocation failed while growing an arena. Exists for
    /// completeness and for lower-level callers that want to distinguish
    /// this from the other two variants; in practice `Vec` allocation
    /// failure aborts the process per Rust's global allocator contract,
    /// so this is exercised directly in tests rather than induced.
    OutOfMemory,
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRule { reason } => write!(f, "invalid rule: {}", reason),
            Self::ForbiddenOverlap => {
                write!(f, "rule overlaps an existing, non-identical interval")
            }
            Self::RuleNotFound => write!(f, "rule id not found"),
            Self::OutOfMemory => write!(f, "allocation failed"),
        }
    }
}

impl Error for ClassifierError {}
