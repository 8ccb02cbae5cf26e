use crate::error::config_error;
use crate::naming::{
    escape_sql_string, term_frequency_table_name, DF_BLOCKED, DF_CONCAT, DF_CONCAT_WITH_TF,
    DF_ESTIMATION_PAIRS, DF_ESTIMATION_VECTORS,
};
use crate::pipeline::PendingStep;
use crate::settings::{LinkType, Settings};
use crate::StitchError;

pub const UNIQUE_ID_COLUMN: &str = "unique_id";
pub const SOURCE_DATASET_COLUMN: &str = "source_dataset";

/// A physical table already present in the backend, used as a linkage input.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InputTable {
    pub table_name: String,
    pub source_dataset: String,
}

impl InputTable {
    pub fn new(table_name: impl Into<String>, source_dataset: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            source_dataset: source_dataset.into(),
        }
    }
}

/// Lookup table reference used when folding term-frequency columns onto the
/// concatenated input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfLookup {
    pub column: String,
    pub table_expression: String,
}

/// One logical transformation the pipeline knows how to produce. `source`
/// fields are table expressions resolved by the caller: a cached physical
/// name, or a templated name queued earlier in the same chain.
#[derive(Debug, Clone)]
pub enum StepKind<'a> {
    Concat,
    TermFrequency { column: &'a str, source: &'a str },
    ConcatWithTermFrequencies { source: &'a str, lookups: &'a [TfLookup] },
    BlockedCandidates { source: &'a str },
    EstimationPairs { source: &'a str },
    EstimationVectors { source: &'a str },
}

pub fn generate_step(
    settings: &Settings,
    inputs: &[InputTable],
    run_uid: &str,
    kind: StepKind<'_>,
) -> Result<PendingStep, StitchError> {
    let multi_source = inputs.len() > 1;
    let columns = settings.comparison_columns();

    let (sql, templated_name) = match kind {
        StepKind::Concat => (concat_sql(inputs, &columns)?, DF_CONCAT.to_string()),
        StepKind::TermFrequency { column, source } => (
            term_frequency_sql(column, source),
            term_frequency_table_name(column),
        ),
        StepKind::ConcatWithTermFrequencies { source, lookups } => (
            concat_with_tf_sql(source, lookups),
            DF_CONCAT_WITH_TF.to_string(),
        ),
        StepKind::BlockedCandidates { source } => (
            pairs_sql(
                source,
                &columns,
                settings.link_type,
                multi_source,
                &settings.blocking_rules,
            ),
            DF_BLOCKED.to_string(),
        ),
        StepKind::EstimationPairs { source } => (
            pairs_sql(source, &columns, settings.link_type, multi_source, &[]),
            DF_ESTIMATION_PAIRS.to_string(),
        ),
        StepKind::EstimationVectors { source } => (
            comparison_vectors_sql(source, settings, multi_source),
            DF_ESTIMATION_VECTORS.to_string(),
        ),
    };

    Ok(PendingStep::new(sql, &templated_name, run_uid))
}

pub(crate) fn gamma_column_name(column: &str) -> String {
    format!("gamma_{column}")
}

pub(crate) fn tf_column_name(column: &str) -> String {
    format!("tf_{column}")
}

fn concat_sql(inputs: &[InputTable], columns: &[&str]) -> Result<String, StitchError> {
    if inputs.is_empty() {
        return Err(config_error("at least one input table is required"));
    }

    let column_list = std::iter::once(UNIQUE_ID_COLUMN)
        .chain(columns.iter().copied())
        .collect::<Vec<_>>()
        .join(", ");

    if inputs.len() == 1 {
        return Ok(format!(
            "SELECT {column_list} FROM {}",
            inputs[0].table_name
        ));
    }

    let selects = inputs
        .iter()
        .map(|input| {
            format!(
                "SELECT '{}' AS {SOURCE_DATASET_COLUMN}, {column_list} FROM {}",
                escape_sql_string(&input.source_dataset),
                input.table_name
            )
        })
        .collect::<Vec<_>>();
    Ok(selects.join("\nUNION ALL\n"))
}

fn term_frequency_sql(column: &str, source: &str) -> String {
    let tf_column = tf_column_name(column);
    format!(
        "SELECT {column}, CAST(COUNT(*) AS REAL) / (SELECT CAST(COUNT({column}) AS REAL) FROM {source}) AS {tf_column} \
         FROM {source} WHERE {column} IS NOT NULL GROUP BY {column}"
    )
}

fn concat_with_tf_sql(source: &str, lookups: &[TfLookup]) -> String {
    if lookups.is_empty() {
        return format!("SELECT c.* FROM {source} AS c");
    }

    let tf_selects = lookups
        .iter()
        .enumerate()
        .map(|(index, lookup)| {
            format!("t{index}.{}", tf_column_name(&lookup.column))
        })
        .collect::<Vec<_>>()
        .join(", ");

    let joins = lookups
        .iter()
        .enumerate()
        .map(|(index, lookup)| {
            format!(
                "LEFT JOIN {} AS t{index} ON c.{column} = t{index}.{column}",
                lookup.table_expression,
                column = lookup.column
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("SELECT c.*, {tf_selects}\nFROM {source} AS c\n{joins}")
}

fn pair_predicate(link_type: LinkType) -> &'static str {
    match link_type {
        LinkType::DedupeOnly => "l.unique_id < r.unique_id",
        LinkType::LinkOnly => "l.source_dataset < r.source_dataset",
        LinkType::LinkAndDedupe => {
            "(l.source_dataset < r.source_dataset \
             OR (l.source_dataset = r.source_dataset AND l.unique_id < r.unique_id))"
        }
    }
}

fn pairs_sql(
    source: &str,
    columns: &[&str],
    link_type: LinkType,
    multi_source: bool,
    blocking_rules: &[String],
) -> String {
    let mut select_columns = vec![
        format!("l.{UNIQUE_ID_COLUMN} AS {UNIQUE_ID_COLUMN}_l"),
        format!("r.{UNIQUE_ID_COLUMN} AS {UNIQUE_ID_COLUMN}_r"),
    ];
    if multi_source {
        select_columns.push(format!(
            "l.{SOURCE_DATASET_COLUMN} AS {SOURCE_DATASET_COLUMN}_l"
        ));
        select_columns.push(format!(
            "r.{SOURCE_DATASET_COLUMN} AS {SOURCE_DATASET_COLUMN}_r"
        ));
    }
    for column in columns {
        select_columns.push(format!("l.{column} AS {column}_l"));
        select_columns.push(format!("r.{column} AS {column}_r"));
    }

    let mut condition = pair_predicate(link_type).to_string();
    if !blocking_rules.is_empty() {
        let rules = blocking_rules
            .iter()
            .map(|rule| format!("({rule})"))
            .collect::<Vec<_>>()
            .join(" OR ");
        condition = format!("{condition} AND ({rules})");
    }

    format!(
        "SELECT {}\nFROM {source} AS l\nINNER JOIN {source} AS r\nON {condition}",
        select_columns.join(", ")
    )
}

fn comparison_vectors_sql(source: &str, settings: &Settings, multi_source: bool) -> String {
    let mut select_columns = vec![
        format!("{UNIQUE_ID_COLUMN}_l"),
        format!("{UNIQUE_ID_COLUMN}_r"),
    ];
    if multi_source {
        select_columns.push(format!("{SOURCE_DATASET_COLUMN}_l"));
        select_columns.push(format!("{SOURCE_DATASET_COLUMN}_r"));
    }

    for comparison in &settings.comparisons {
        let column = comparison.column.as_str();
        let mut case = format!(
            "CASE WHEN {column}_l IS NULL OR {column}_r IS NULL THEN -1"
        );
        let mut else_value = 0;
        for level in &comparison.levels {
            match &level.condition {
                Some(condition) => {
                    case.push_str(&format!(" WHEN {condition} THEN {}", level.vector_value));
                }
                None => else_value = level.vector_value,
            }
        }
        case.push_str(&format!(" ELSE {else_value} END AS {}", gamma_column_name(column)));
        select_columns.push(case);
    }

    format!("SELECT {}\nFROM {source}", select_columns.join(",\n  "))
}
