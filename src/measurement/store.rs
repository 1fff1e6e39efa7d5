//! Append-only result store for one run.

use super::{Family, MeasurementResult};

/// Ordered collection of every result produced in a run.
///
/// Results are only ever appended; iteration order is completion order, which
/// for the sequential executor equals submission order.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    results: Vec<MeasurementResult>,
}

impl ResultStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed result.
    pub fn append(&mut self, result: MeasurementResult) {
        self.results.push(result);
    }

    /// All results in completion order.
    pub fn iter(&self) -> impl Iterator<Item = &MeasurementResult> {
        self.results.iter()
    }

    /// Results of one family, in completion order.
    pub fn by_family(&self, family: Family) -> impl Iterator<Item = &MeasurementResult> {
        self.results.iter().filter(move |r| r.family() == family)
    }

    /// Number of error-bearing results.
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    /// Number of stored results
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True if no unit has completed
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResultStore {
    type Item = &'a MeasurementResult;
    type IntoIter = std::slice::Iter<'a, MeasurementResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl FromIterator<MeasurementResult> for ResultStore {
    fn from_iter<I: IntoIterator<Item = MeasurementResult>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}
