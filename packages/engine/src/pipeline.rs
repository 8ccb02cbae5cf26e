use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{invalid_step_error, unknown_target_error};
use crate::naming::{is_valid_identifier, physical_name};
use crate::StitchError;

/// One not-yet-executed transformation. Later steps in the queue may
/// reference earlier steps' templated output names as table expressions, so
/// queue order is dependency order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PendingStep {
    pub sql: String,
    pub output_table_name: String,
    pub output_table_name_templated: String,
}

impl PendingStep {
    pub fn new(sql: impl Into<String>, templated_name: &str, run_uid: &str) -> Self {
        Self {
            sql: sql.into(),
            output_table_name: physical_name(templated_name, run_uid),
            output_table_name_templated: templated_name.to_string(),
        }
    }
}

/// A chain of queued steps folded into one statement: every step before the
/// target becomes a named CTE, the target's SQL is the final select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedStatement {
    pub sql: String,
    pub output_table_name: String,
    pub output_table_name_templated: String,
    /// Steps folded into `sql`, in enqueue order, target last.
    pub folded: Vec<PendingStep>,
}

#[derive(Debug, Default)]
pub struct SqlPipeline {
    queue: Vec<PendingStep>,
}

impl SqlPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued_steps(&self) -> &[PendingStep] {
        &self.queue
    }

    pub fn contains(&self, templated_name: &str) -> bool {
        self.queue
            .iter()
            .any(|step| step.output_table_name_templated == templated_name)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn enqueue(&mut self, step: PendingStep) -> Result<(), StitchError> {
        if !is_valid_identifier(&step.output_table_name_templated) {
            return Err(invalid_step_error(format!(
                "`{}` is not a valid output table name",
                step.output_table_name_templated
            )));
        }
        if self.contains(&step.output_table_name_templated) {
            return Err(invalid_step_error(format!(
                "a pending step already produces `{}`",
                step.output_table_name_templated
            )));
        }
        let dialect = GenericDialect {};
        Parser::parse_sql(&dialect, &step.sql).map_err(|err| {
            invalid_step_error(format!(
                "step for `{}` is not parsable SQL: {err}",
                step.output_table_name_templated
            ))
        })?;
        self.queue.push(step);
        Ok(())
    }

    /// Fold all queued steps up to and including the one producing
    /// `target_templated_name`. Does not mutate the queue: steps stay pending
    /// until `reset`, so a failed execution leaves the pipeline untouched.
    pub fn combine_to(&self, target_templated_name: &str) -> Result<CombinedStatement, StitchError> {
        let target_index = self
            .queue
            .iter()
            .position(|step| step.output_table_name_templated == target_templated_name)
            .ok_or_else(|| unknown_target_error(target_templated_name))?;

        let chain = &self.queue[..=target_index];
        let target = &chain[target_index];

        let sql = if chain.len() == 1 {
            target.sql.clone()
        } else {
            let ctes = chain[..target_index]
                .iter()
                .map(|step| format!("{} AS ({})", step.output_table_name_templated, step.sql))
                .collect::<Vec<_>>()
                .join(",\n");
            format!("WITH {ctes}\n{}", target.sql)
        };

        Ok(CombinedStatement {
            sql,
            output_table_name: target.output_table_name.clone(),
            output_table_name_templated: target.output_table_name_templated.clone(),
            folded: chain.to_vec(),
        })
    }

    pub fn reset(&mut self) {
        self.queue.clear();
    }
}
