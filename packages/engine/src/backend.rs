use async_trait::async_trait;

use crate::{QueryResult, StitchError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlDialect {
    Sqlite,
    DuckDb,
    Postgres,
}

/// Execution seam between the engine and a concrete SQL store.
///
/// `create_table_as` is the single call a materialization makes; it must
/// replace any same-named table left behind by an earlier run so that a
/// recomputation after cache invalidation cannot collide with a stale
/// physical table.
#[async_trait(?Send)]
pub trait StitchBackend: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StitchError>;

    async fn create_table_as(
        &self,
        physical_name: &str,
        select_sql: &str,
    ) -> Result<(), StitchError>;
}
