use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::cache::{IntermediateTableCache, StitchTable, TableHandle};
use crate::error::{config_error, execution_error};
use crate::estimate::{estimate_for_comparison, UEstimateReport};
use crate::naming::{
    is_valid_identifier, physical_name, term_frequency_table_name, DF_BLOCKED, DF_CONCAT,
    DF_CONCAT_WITH_TF, DF_ESTIMATION_PAIRS, DF_ESTIMATION_VECTORS,
};
use crate::pipeline::{PendingStep, SqlPipeline};
use crate::settings::{LinkType, ModelSnapshot, Settings};
use crate::sql::{gamma_column_name, generate_step, InputTable, StepKind, TfLookup};
use crate::term_frequency::{TermFrequencyQueue, TfState};
use crate::uid::generate_run_uid;
use crate::{QueryResult, StitchBackend, StitchError, Value};

/// A cached concat-with-term-frequencies table is a strict superset
/// computation of the plain concatenated input, so either satisfies a
/// request for the latter. This is a deliberate, documented cache-equivalence
/// rule, not a fallback.
const CONCAT_SATISFIERS: &[&str] = &[DF_CONCAT, DF_CONCAT_WITH_TF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterializeMode {
    /// Fold the pending chain into one statement; a materialization is a
    /// single backend call.
    #[default]
    Folded,
    /// Execute each pending step as its own table, named by its templated
    /// name, so every intermediate is inspectable in the backend.
    StepByStep,
}

pub struct EngineArgs {
    pub backend: Box<dyn StitchBackend>,
    pub settings: Settings,
    pub inputs: Vec<InputTable>,
    pub materialize_mode: MaterializeMode,
}

impl EngineArgs {
    pub fn new(
        backend: Box<dyn StitchBackend>,
        settings: Settings,
        inputs: Vec<InputTable>,
    ) -> Self {
        Self {
            backend,
            settings,
            inputs,
            materialize_mode: MaterializeMode::default(),
        }
    }

    /// Restore a saved model: the persisted run uid is carried over so the
    /// new instance generates the same physical table names it did when the
    /// model was saved.
    pub fn with_snapshot(
        backend: Box<dyn StitchBackend>,
        snapshot: ModelSnapshot,
        inputs: Vec<InputTable>,
    ) -> Self {
        let mut settings = snapshot.settings;
        settings.run_uid = Some(snapshot.run_uid);
        Self::new(backend, settings, inputs)
    }
}

/// One linkage run: owns the backend, the intermediate-table cache, the
/// deferred SQL pipeline and the term-frequency request queue. Mutating
/// operations take `&mut self`; exclusive ownership is what makes the
/// at-most-one-computation-per-table invariant hold without locks.
pub struct Engine {
    backend: Box<dyn StitchBackend>,
    settings: Settings,
    inputs: Vec<InputTable>,
    run_uid: String,
    mode: MaterializeMode,
    cache: IntermediateTableCache,
    pipeline: SqlPipeline,
    tf_queue: TermFrequencyQueue,
}

impl Engine {
    pub fn new(args: EngineArgs) -> Result<Self, StitchError> {
        let EngineArgs {
            backend,
            settings,
            inputs,
            materialize_mode,
        } = args;

        if inputs.is_empty() {
            return Err(config_error("at least one input table is required"));
        }
        if matches!(
            settings.link_type,
            LinkType::LinkOnly | LinkType::LinkAndDedupe
        ) && inputs.len() < 2
        {
            return Err(config_error(
                "linking requires at least two input tables",
            ));
        }
        let mut sources = BTreeSet::new();
        for input in &inputs {
            if !is_valid_identifier(&input.table_name) {
                return Err(config_error(format!(
                    "`{}` is not a valid input table name",
                    input.table_name
                )));
            }
            if !sources.insert(input.source_dataset.as_str()) {
                return Err(config_error(format!(
                    "duplicate source dataset name `{}`",
                    input.source_dataset
                )));
            }
        }
        for column in settings.comparison_columns() {
            if !is_valid_identifier(column) {
                return Err(config_error(format!(
                    "`{column}` is not a valid comparison column name"
                )));
            }
        }
        settings.validate()?;

        let run_uid = settings
            .run_uid
            .clone()
            .unwrap_or_else(generate_run_uid);

        Ok(Self {
            backend,
            settings,
            inputs,
            run_uid,
            mode: materialize_mode,
            cache: IntermediateTableCache::new(),
            pipeline: SqlPipeline::new(),
            tf_queue: TermFrequencyQueue::new(),
        })
    }

    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_materialize_mode(&mut self, mode: MaterializeMode) {
        self.mode = mode;
    }

    pub fn pipeline(&self) -> &SqlPipeline {
        &self.pipeline
    }

    pub fn term_frequency_queue(&self) -> &TermFrequencyQueue {
        &self.tf_queue
    }

    pub fn cache(&self) -> &IntermediateTableCache {
        &self.cache
    }

    pub fn model_snapshot(&self) -> ModelSnapshot {
        ModelSnapshot::new(self.run_uid.clone(), self.settings.clone())
    }

    /// The concatenated input tables.
    pub async fn ensure_concat(
        &mut self,
        materialise: bool,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        if let Some(handle) = self.cached_any(CONCAT_SATISFIERS) {
            return Ok(handle);
        }
        let step = generate_step(&self.settings, &self.inputs, &self.run_uid, StepKind::Concat)?;
        self.enqueue_unless_pending(step)?;
        if materialise {
            self.materialize(DF_CONCAT).await
        } else {
            Ok(self.lazy_handle(DF_CONCAT))
        }
    }

    /// The concatenated input tables with term-frequency columns folded on.
    pub async fn ensure_concat_with_term_frequencies(
        &mut self,
        materialise: bool,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        if let Some(handle) = self.cache.get(DF_CONCAT_WITH_TF) {
            return Ok(handle);
        }
        self.enqueue_concat_with_tf_chain()?;
        if materialise {
            self.materialize(DF_CONCAT_WITH_TF).await
        } else {
            Ok(self.lazy_handle(DF_CONCAT_WITH_TF))
        }
    }

    /// Candidate record pairs admissible under the configured link type and
    /// blocking rules.
    pub async fn ensure_blocked_candidates(
        &mut self,
        materialise: bool,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        if let Some(handle) = self.cache.get(DF_BLOCKED) {
            return Ok(handle);
        }
        let source = self.concat_expression()?;
        let step = generate_step(
            &self.settings,
            &self.inputs,
            &self.run_uid,
            StepKind::BlockedCandidates { source: &source },
        )?;
        self.enqueue_unless_pending(step)?;
        if materialise {
            self.materialize(DF_BLOCKED).await
        } else {
            Ok(self.lazy_handle(DF_BLOCKED))
        }
    }

    /// Queue term-frequency table steps for the given columns. Re-queueing a
    /// column that is already queued or materialized is a no-op; the returned
    /// states reflect each column after the call.
    pub fn queue_term_frequency_tables(
        &mut self,
        columns: &[&str],
    ) -> Result<Vec<(String, TfState)>, StitchError> {
        let mut states = Vec::with_capacity(columns.len());
        for column in columns {
            let tf_name = term_frequency_table_name(column);
            let state = if self.cache.contains(&tf_name) {
                TfState::Materialized
            } else if self.tf_queue.contains(&tf_name) || self.pipeline.contains(&tf_name) {
                TfState::Queued
            } else {
                let source = self.tf_source_expression();
                let step = generate_step(
                    &self.settings,
                    &self.inputs,
                    &self.run_uid,
                    StepKind::TermFrequency {
                        column,
                        source: &source,
                    },
                )?;
                self.tf_queue.enqueue(step);
                TfState::Queued
            };
            states.push((column.to_string(), state));
        }
        Ok(states)
    }

    /// Materialize the term-frequency table for one column, draining only
    /// that column's entry from the request queue. Cached results are
    /// returned without touching the backend.
    pub async fn compute_term_frequency_table(
        &mut self,
        column: &str,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        let tf_name = term_frequency_table_name(column);
        if let Some(handle) = self.cache.get(&tf_name) {
            return Ok(handle);
        }
        // The queued step's source expression may predate later
        // materializations, so regenerate instead of replaying it.
        let _ = self.tf_queue.drain(&tf_name);
        if !self.pipeline.contains(&tf_name) {
            let source = self.concat_expression()?;
            let step = generate_step(
                &self.settings,
                &self.inputs,
                &self.run_uid,
                StepKind::TermFrequency {
                    column,
                    source: &source,
                },
            )?;
            self.pipeline.enqueue(step)?;
        }
        self.materialize(&tf_name).await
    }

    /// Register an externally computed term-frequency table for `column`.
    /// The column transitions straight to materialized; no backend call is
    /// made.
    pub fn register_term_frequency_lookup(
        &mut self,
        physical_table: &str,
        column: &str,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        let tf_name = term_frequency_table_name(column);
        let handle: Arc<dyn TableHandle> =
            Arc::new(StitchTable::materialized(&tf_name, physical_table));
        self.cache.put(&tf_name, handle.clone())?;
        let _ = self.tf_queue.drain(&tf_name);
        Ok(handle)
    }

    /// Register an externally computed concat-with-term-frequencies table.
    pub fn register_concat_with_term_frequencies(
        &mut self,
        physical_table: &str,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        let handle: Arc<dyn TableHandle> =
            Arc::new(StitchTable::materialized(DF_CONCAT_WITH_TF, physical_table));
        self.cache.put(DF_CONCAT_WITH_TF, handle.clone())?;
        Ok(handle)
    }

    /// Forget every cached table and pending step. Physical tables are not
    /// dropped; the next request for any previously cached name recomputes
    /// from scratch.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
        self.pipeline.reset();
        self.tf_queue.reset();
    }

    /// Run ad-hoc SQL through the same cache-checking materializer as the
    /// built-in tables.
    pub async fn query_to_table(
        &mut self,
        sql: &str,
        templated_name: &str,
        materialise: bool,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        if let Some(handle) = self.cache.get(templated_name) {
            return Ok(handle);
        }
        let step = PendingStep::new(sql, templated_name, &self.run_uid);
        self.enqueue_unless_pending(step)?;
        if materialise {
            self.materialize(templated_name).await
        } else {
            Ok(self.lazy_handle(templated_name))
        }
    }

    pub async fn read_table(
        &self,
        handle: &dyn TableHandle,
    ) -> Result<QueryResult, StitchError> {
        if !handle.is_materialized() {
            return Err(execution_error(format!(
                "`{}` has not been materialized",
                handle.templated_name()
            )));
        }
        self.backend
            .execute(&format!("SELECT * FROM {}", handle.physical_name()), &[])
            .await
    }

    /// Release a physical table. Consumers call this explicitly; cache
    /// invalidation never does.
    pub async fn drop_table(&mut self, handle: &dyn TableHandle) -> Result<(), StitchError> {
        self.backend
            .execute(
                &format!("DROP TABLE IF EXISTS {}", handle.physical_name()),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Direct u-probability estimation: counts comparison-vector outcomes
    /// over all pairs admissible under the link type (blocking rules are
    /// ignored here) and writes the estimates back into the settings.
    pub async fn estimate_u_probabilities(&mut self) -> Result<UEstimateReport, StitchError> {
        if self.settings.comparisons.is_empty() {
            return Err(config_error("no comparisons configured"));
        }

        let vectors = match self.cache.get(DF_ESTIMATION_VECTORS) {
            Some(handle) => handle,
            None => {
                let source = self.concat_expression()?;
                let pairs_expression = match self.cache.get(DF_ESTIMATION_PAIRS) {
                    Some(handle) => handle.physical_name().to_string(),
                    None => {
                        let step = generate_step(
                            &self.settings,
                            &self.inputs,
                            &self.run_uid,
                            StepKind::EstimationPairs { source: &source },
                        )?;
                        self.enqueue_unless_pending(step)?;
                        DF_ESTIMATION_PAIRS.to_string()
                    }
                };
                let step = generate_step(
                    &self.settings,
                    &self.inputs,
                    &self.run_uid,
                    StepKind::EstimationVectors {
                        source: &pairs_expression,
                    },
                )?;
                self.enqueue_unless_pending(step)?;
                self.materialize(DF_ESTIMATION_VECTORS).await?
            }
        };

        let mut comparisons = Vec::with_capacity(self.settings.comparisons.len());
        for index in 0..self.settings.comparisons.len() {
            let gamma = gamma_column_name(&self.settings.comparisons[index].column);
            let sql = format!(
                "SELECT {gamma} AS vector_value, COUNT(*) AS pair_count FROM {} GROUP BY {gamma}",
                vectors.physical_name()
            );
            let result = self.backend.execute(&sql, &[]).await?;
            let counts = vector_counts(&result)?;
            let estimate = estimate_for_comparison(&self.settings.comparisons[index], &counts)?;
            for level_estimate in &estimate.levels {
                if let Some(level) = self.settings.comparisons[index]
                    .levels
                    .iter_mut()
                    .find(|level| level.vector_value == level_estimate.vector_value)
                {
                    level.u_probability = Some(level_estimate.u_probability);
                }
            }
            comparisons.push(estimate);
        }

        Ok(UEstimateReport { comparisons })
    }

    fn cached_any(&self, templated_names: &[&str]) -> Option<Arc<dyn TableHandle>> {
        templated_names
            .iter()
            .find_map(|name| self.cache.get(name))
    }

    fn lazy_handle(&self, templated_name: &str) -> Arc<dyn TableHandle> {
        Arc::new(StitchTable::lazy(
            templated_name,
            physical_name(templated_name, &self.run_uid),
        ))
    }

    /// Cache check precedes every enqueue: a step for an already cached or
    /// already queued table is never added.
    fn enqueue_unless_pending(&mut self, step: PendingStep) -> Result<(), StitchError> {
        if self.cache.contains(&step.output_table_name_templated)
            || self.pipeline.contains(&step.output_table_name_templated)
        {
            return Ok(());
        }
        self.pipeline.enqueue(step)
    }

    /// Table expression for the concatenated input: a cached physical table
    /// when one exists, otherwise the templated name after queueing the
    /// defining step.
    fn concat_expression(&mut self) -> Result<String, StitchError> {
        if let Some(handle) = self.cached_any(CONCAT_SATISFIERS) {
            return Ok(handle.physical_name().to_string());
        }
        let step = generate_step(&self.settings, &self.inputs, &self.run_uid, StepKind::Concat)?;
        self.enqueue_unless_pending(step)?;
        Ok(DF_CONCAT.to_string())
    }

    /// Like `concat_expression` but without queueing anything; queueing a
    /// term-frequency request must not dirty the main pipeline.
    fn tf_source_expression(&self) -> String {
        self.cached_any(CONCAT_SATISFIERS)
            .map(|handle| handle.physical_name().to_string())
            .unwrap_or_else(|| DF_CONCAT.to_string())
    }

    fn enqueue_concat_with_tf_chain(&mut self) -> Result<(), StitchError> {
        if self.pipeline.contains(DF_CONCAT_WITH_TF) {
            return Ok(());
        }
        let source = self.concat_expression()?;
        let tf_columns: Vec<String> = self
            .settings
            .term_frequency_columns()
            .iter()
            .map(|column| column.to_string())
            .collect();

        let mut lookups = Vec::with_capacity(tf_columns.len());
        for column in &tf_columns {
            let tf_name = term_frequency_table_name(column);
            let expression = match self.cache.get(&tf_name) {
                Some(handle) => handle.physical_name().to_string(),
                None => {
                    if !self.pipeline.contains(&tf_name) {
                        let step = generate_step(
                            &self.settings,
                            &self.inputs,
                            &self.run_uid,
                            StepKind::TermFrequency {
                                column,
                                source: &source,
                            },
                        )?;
                        self.pipeline.enqueue(step)?;
                    }
                    tf_name.clone()
                }
            };
            lookups.push(TfLookup {
                column: column.clone(),
                table_expression: expression,
            });
        }

        let step = generate_step(
            &self.settings,
            &self.inputs,
            &self.run_uid,
            StepKind::ConcatWithTermFrequencies {
                source: &source,
                lookups: &lookups,
            },
        )?;
        self.enqueue_unless_pending(step)
    }

    /// Fold the pending chain ending at `target_templated` and execute it.
    /// The pipeline is reset only after the backend call succeeds, so a
    /// failed execution leaves cache and pipeline exactly as they were.
    async fn materialize(
        &mut self,
        target_templated: &str,
    ) -> Result<Arc<dyn TableHandle>, StitchError> {
        let combined = self.pipeline.combine_to(target_templated)?;
        let physical = match self.mode {
            MaterializeMode::Folded => {
                self.backend
                    .create_table_as(&combined.output_table_name, &combined.sql)
                    .await?;
                combined.output_table_name.clone()
            }
            MaterializeMode::StepByStep => {
                for step in &combined.folded {
                    self.backend
                        .create_table_as(&step.output_table_name_templated, &step.sql)
                        .await?;
                }
                combined.output_table_name_templated.clone()
            }
        };

        let handle: Arc<dyn TableHandle> =
            Arc::new(StitchTable::materialized(target_templated, physical));
        self.cache.put(target_templated, handle.clone())?;
        self.pipeline.reset();
        Ok(handle)
    }
}

fn vector_counts(result: &QueryResult) -> Result<BTreeMap<i64, u64>, StitchError> {
    let mut counts = BTreeMap::new();
    for row in &result.rows {
        let vector_value = row
            .first()
            .and_then(Value::as_integer)
            .ok_or_else(|| execution_error("vector count query returned a non-integer value"))?;
        let pair_count = row
            .get(1)
            .and_then(Value::as_integer)
            .ok_or_else(|| execution_error("vector count query returned a non-integer count"))?;
        counts.insert(vector_value, pair_count as u64);
    }
    Ok(counts)
}
