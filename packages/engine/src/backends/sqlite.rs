use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::execution_error;
use crate::{QueryResult, SqlDialect, StitchBackend, StitchError, Value};

#[derive(Debug, Clone, Default)]
pub struct SqliteConfig {
    /// Database file path; `None` opens an in-memory database.
    pub filename: Option<String>,
}

impl SqliteConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
        }
    }
}

/// In-process SQLite executor. Comparison levels may call `levenshtein`,
/// which is registered as a deterministic scalar function on every
/// connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(config: SqliteConfig) -> Result<Self, StitchError> {
        let conn = match &config.filename {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|err| execution_error(format!("failed to open sqlite database: {err}")))?;
        register_levenshtein(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait(?Send)]
impl StitchBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, StitchError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut statement = conn
            .prepare(sql)
            .map_err(|err| execution_error(format!("failed to prepare statement: {err}")))?;

        let bound_params = rusqlite::params_from_iter(params.iter().map(to_sqlite_value));
        if statement.column_count() == 0 {
            statement
                .execute(bound_params)
                .map_err(|err| execution_error(format!("failed to execute statement: {err}")))?;
            return Ok(QueryResult::default());
        }

        let columns: Vec<String> = statement
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let column_count = columns.len();

        let mut rows = statement
            .query(bound_params)
            .map_err(|err| execution_error(format!("failed to run query: {err}")))?;
        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| execution_error(format!("failed to read row: {err}")))?
        {
            let mut record = Vec::with_capacity(column_count);
            for index in 0..column_count {
                let value = row
                    .get_ref(index)
                    .map_err(|err| execution_error(format!("failed to read column: {err}")))?;
                record.push(from_sqlite_value(value)?);
            }
            out.push(record);
        }

        Ok(QueryResult { columns, rows: out })
    }

    async fn create_table_as(
        &self,
        physical_name: &str,
        select_sql: &str,
    ) -> Result<(), StitchError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let batch = format!(
            "DROP TABLE IF EXISTS {physical_name};\nCREATE TABLE {physical_name} AS {select_sql};"
        );
        conn.execute_batch(&batch)
            .map_err(|err| execution_error(format!("failed to materialize `{physical_name}`: {err}")))
    }
}

fn to_sqlite_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(value) => rusqlite::types::Value::Integer(*value),
        Value::Real(value) => rusqlite::types::Value::Real(*value),
        Value::Text(value) => rusqlite::types::Value::Text(value.clone()),
        Value::Blob(value) => rusqlite::types::Value::Blob(value.clone()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> Result<Value, StitchError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| execution_error(format!("non-utf8 text value: {err}")))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

fn register_levenshtein(conn: &Connection) -> Result<(), StitchError> {
    conn.create_scalar_function(
        "levenshtein",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let left = ctx.get::<String>(0)?;
            let right = ctx.get::<String>(1)?;
            Ok(levenshtein(&left, &right) as i64)
        },
    )
    .map_err(|err| execution_error(format!("failed to register levenshtein: {err}")))
}

fn levenshtein(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0; right.len() + 1];

    for (i, lc) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, rc) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lc != rc);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}
