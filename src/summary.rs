//! Run outcome tally

use std::fmt;

/// Success/warning/error counts of a run
///
/// Per-resource failures never abort a run; they are logged where they happen
/// and counted here so the final report reflects them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl RunSummary {
    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn warning(&mut self) {
        self.warnings += 1;
    }

    pub fn error(&mut self) {
        self.errors += 1;
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.warnings += other.warnings;
        self.errors += other.errors;
    }

    /// No warnings and no errors
    pub fn is_clean(&self) -> bool {
        self.warnings == 0 && self.errors == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} warnings, {} errors",
            self.succeeded, self.warnings, self.errors
        )
    }
}
