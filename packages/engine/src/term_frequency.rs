use crate::pipeline::PendingStep;

/// Lifecycle of one column's term-frequency table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TfState {
    NotQueued,
    Queued,
    Materialized,
}

/// Pending term-frequency steps, one per queued column. Unlike the main
/// deferred pipeline this queue survives materializations: draining removes
/// only the requested column's entry.
#[derive(Debug, Default)]
pub struct TermFrequencyQueue {
    steps: Vec<PendingStep>,
}

impl TermFrequencyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tf_templated_name: &str) -> bool {
        self.steps
            .iter()
            .any(|step| step.output_table_name_templated == tf_templated_name)
    }

    /// No-op when the column is already queued.
    pub fn enqueue(&mut self, step: PendingStep) {
        if !self.contains(&step.output_table_name_templated) {
            self.steps.push(step);
        }
    }

    pub fn drain(&mut self, tf_templated_name: &str) -> Option<PendingStep> {
        let index = self
            .steps
            .iter()
            .position(|step| step.output_table_name_templated == tf_templated_name)?;
        Some(self.steps.remove(index))
    }

    pub fn queued_table_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|step| step.output_table_name_templated.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn reset(&mut self) {
        self.steps.clear();
    }
}
