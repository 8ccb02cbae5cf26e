#![cfg(feature = "sqlite")]

use stitch_engine::backends::{SqliteBackend, SqliteConfig};
use stitch_engine::naming::DF_ESTIMATION_PAIRS;
use stitch_engine::{
    ComparisonSpec, Engine, EngineArgs, InputTable, LinkType, MaterializeMode, Settings,
    StitchBackend, Value,
};

async fn seed_table(backend: &SqliteBackend, table: &str, names: &[&str]) {
    backend
        .execute(
            &format!("CREATE TABLE {table} (unique_id INTEGER, name TEXT)"),
            &[],
        )
        .await
        .expect("create input table");
    for (index, name) in names.iter().enumerate() {
        backend
            .execute(
                &format!("INSERT INTO {table} VALUES (?1, ?2)"),
                &[
                    Value::Integer(index as i64 + 1),
                    Value::Text(name.to_string()),
                ],
            )
            .await
            .expect("insert input row");
    }
}

#[tokio::test]
async fn dedupe_u_probabilities_count_all_unordered_pairs() {
    let backend = SqliteBackend::open(SqliteConfig::in_memory()).expect("open backend");
    seed_table(
        &backend,
        "people",
        &["Amanda", "Robin", "Robyn", "David", "Eve", "Amanda"],
    )
    .await;

    let mut settings = Settings::new(LinkType::DedupeOnly);
    settings.comparisons = vec![ComparisonSpec::levenshtein_within("name", 2)];
    settings.blocking_rules = vec!["l.name = r.name".to_string()];

    let mut engine = Engine::new(EngineArgs::new(
        Box::new(backend),
        settings,
        vec![InputTable::new("people", "people")],
    ))
    .expect("construct engine");

    let report = engine
        .estimate_u_probabilities()
        .await
        .expect("estimate u probabilities");

    // 6 records -> 15 unordered pairs, blocking rules ignored for estimation.
    let denom = (6.0 * 5.0) / 2.0;
    assert_eq!(report.comparisons[0].observed_pairs, 15);

    let comparison = &engine.settings().comparisons[0];
    let u = |value: i64| {
        comparison
            .level_by_value(value)
            .expect("level present")
            .u_probability
            .expect("u estimated")
    };
    // Amanda/Amanda is the only exact pair; Robin/Robyn the only near one.
    assert_eq!(u(2), 1.0 / denom);
    assert_eq!(u(1), 1.0 / denom);
    assert_eq!(u(0), (denom - 2.0) / denom);

    // Re-running estimation reuses the cached vector table and reproduces
    // the exact same counts.
    let repeat = engine
        .estimate_u_probabilities()
        .await
        .expect("repeat estimation");
    assert_eq!(repeat, report);
}

#[tokio::test]
async fn link_only_candidates_never_pair_records_from_one_source() {
    let backend = SqliteBackend::open(SqliteConfig::in_memory()).expect("open backend");
    seed_table(
        &backend,
        "people_left",
        &["Amanda", "Robin", "Robyn", "David", "Eve", "Amanda", "Stuart"],
    )
    .await;
    seed_table(
        &backend,
        "people_right",
        &["Eva", "David", "Sophie", "Jimmy", "Stuart", "Jimmy"],
    )
    .await;

    let mut settings = Settings::new(LinkType::LinkOnly);
    settings.comparisons = vec![ComparisonSpec::levenshtein_within("name", 2)];

    let mut args = EngineArgs::new(
        Box::new(backend),
        settings,
        vec![
            InputTable::new("people_left", "left"),
            InputTable::new("people_right", "right"),
        ],
    );
    // Step-by-step materialization leaves every intermediate inspectable
    // under its templated name.
    args.materialize_mode = MaterializeMode::StepByStep;
    let mut engine = Engine::new(args).expect("construct engine");

    let report = engine
        .estimate_u_probabilities()
        .await
        .expect("estimate u probabilities");

    // 7 x 6 cross-source candidate pairs.
    let denom = 42.0;
    assert_eq!(report.comparisons[0].observed_pairs, 42);

    let comparison = &engine.settings().comparisons[0];
    let u = |value: i64| {
        comparison
            .level_by_value(value)
            .expect("level present")
            .u_probability
            .expect("u estimated")
    };
    // David and Stuart appear on both sides; Eve/Eva is one edit apart.
    assert_eq!(u(2), 2.0 / denom);
    assert_eq!(u(1), 1.0 / denom);
    assert_eq!(u(0), (denom - 3.0) / denom);

    let same_source = engine
        .query_to_table(
            &format!(
                "SELECT COUNT(*) AS pair_count FROM {DF_ESTIMATION_PAIRS} \
                 WHERE source_dataset_l = source_dataset_r"
            ),
            "stitch_check_same_source_pairs",
            true,
        )
        .await
        .expect("count same-source pairs");
    let result = engine
        .read_table(same_source.as_ref())
        .await
        .expect("read count");
    assert_eq!(result.rows, vec![vec![Value::Integer(0)]]);
    engine
        .drop_table(same_source.as_ref())
        .await
        .expect("drop scratch table");

    // The blocked-candidates table (no blocking rules configured) is the
    // same admissible set: cross-source pairs only.
    let blocked = engine
        .ensure_blocked_candidates(true)
        .await
        .expect("materialize blocked candidates");
    let blocked_rows = engine
        .read_table(blocked.as_ref())
        .await
        .expect("read blocked candidates");
    assert_eq!(blocked_rows.rows.len(), 42);
    let source_l = blocked_rows
        .columns
        .iter()
        .position(|column| column == "source_dataset_l")
        .expect("source_dataset_l column");
    let source_r = blocked_rows
        .columns
        .iter()
        .position(|column| column == "source_dataset_r")
        .expect("source_dataset_r column");
    for row in &blocked_rows.rows {
        assert_ne!(row[source_l], row[source_r]);
    }
}
