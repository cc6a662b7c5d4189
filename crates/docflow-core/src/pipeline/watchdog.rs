//! Detects documents stuck in Parsing.

use std::collections::HashSet;
use std::time::Duration;

/// A document that crossed the stall threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledDocument {
    pub document_id: String,
    pub elapsed: Duration,
}

/// Warns once per document that stays in Parsing longer than a threshold.
///
/// Owned by one engine; state is not shared between instances.
#[derive(Debug)]
pub struct ParsingWatchdog {
    threshold: Duration,
    warned: HashSet<String>,
}

impl ParsingWatchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            warned: HashSet::new(),
        }
    }

    /// Check the currently parsing documents and return the newly stalled ones.
    ///
    /// Ids absent from `parsing` have left Parsing (or were deleted) and their
    /// flag is cleared.
    pub fn scan(&mut self, parsing: &[(String, Duration)]) -> Vec<StalledDocument> {
        self.warned
            .retain(|id| parsing.iter().any(|(parsing_id, _)| parsing_id == id));

        let mut stalled = Vec::new();
        for (id, elapsed) in parsing {
            if *elapsed > self.threshold && self.warned.insert(id.clone()) {
                stalled.push(StalledDocument {
                    document_id: id.clone(),
                    elapsed: *elapsed,
                });
            }
        }
        stalled
    }

    pub fn is_warned(&self, document_id: &str) -> bool {
        self.warned.contains(document_id)
    }
}
