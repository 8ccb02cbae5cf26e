mod backend;
pub mod backends;
mod cache;
mod engine;
mod error;
mod estimate;
pub mod naming;
mod pipeline;
mod settings;
mod sql;
mod term_frequency;
mod types;
mod uid;

pub use backend::{SqlDialect, StitchBackend};
pub use cache::{IntermediateTableCache, StitchTable, TableHandle};
pub use engine::{Engine, EngineArgs, MaterializeMode};
pub use error::{ErrorCode, StitchError};
pub use estimate::{ComparisonUEstimate, LevelUEstimate, UEstimateReport, NULL_VECTOR_VALUE};
pub use pipeline::{CombinedStatement, PendingStep, SqlPipeline};
pub use settings::{ComparisonLevel, ComparisonSpec, LinkType, ModelSnapshot, Settings};
pub use sql::{generate_step, InputTable, StepKind, TfLookup};
pub use term_frequency::{TermFrequencyQueue, TfState};
pub use types::{QueryResult, Value};
pub use uid::generate_run_uid;
