#![cfg(feature = "sqlite")]

use stitch_engine::backends::{SqliteBackend, SqliteConfig};
use stitch_engine::{
    ComparisonSpec, Engine, EngineArgs, InputTable, LinkType, Settings, StitchBackend, Value,
};

async fn seeded_engine() -> Engine {
    let backend = SqliteBackend::open(SqliteConfig::in_memory()).expect("open backend");
    backend
        .execute("CREATE TABLE people (unique_id INTEGER, name TEXT)", &[])
        .await
        .expect("create input table");
    for (id, name) in [
        (1, "Amanda"),
        (2, "Robin"),
        (3, "Robyn"),
        (4, "David"),
        (5, "Eve"),
        (6, "Amanda"),
    ] {
        backend
            .execute(
                "INSERT INTO people VALUES (?1, ?2)",
                &[Value::Integer(id), Value::Text(name.to_string())],
            )
            .await
            .expect("insert input row");
    }

    let mut settings = Settings::new(LinkType::DedupeOnly);
    settings.comparisons = vec![ComparisonSpec::exact_match_with_term_frequencies("name")];

    Engine::new(EngineArgs::new(
        Box::new(backend),
        settings,
        vec![InputTable::new("people", "people")],
    ))
    .expect("construct engine")
}

fn real_value(value: &Value) -> f64 {
    match value {
        Value::Real(value) => *value,
        other => panic!("expected a real value, got {other:?}"),
    }
}

#[tokio::test]
async fn concat_with_tf_materializes_and_survives_invalidation() {
    let mut engine = seeded_engine().await;

    let handle = engine
        .ensure_concat_with_term_frequencies(true)
        .await
        .expect("materialize concat_with_tf");
    let result = engine
        .read_table(handle.as_ref())
        .await
        .expect("read concat_with_tf");
    assert_eq!(result.rows.len(), 6);

    // Amanda appears twice in six records.
    let records = result.as_records();
    let amanda = records
        .iter()
        .find(|record| record["name"] == Value::Text("Amanda".to_string()))
        .expect("Amanda row");
    assert!((real_value(&amanda["tf_name"]) - 2.0 / 6.0).abs() < 1e-12);

    // Repeat requests resolve to the same physical table.
    let again = engine
        .ensure_concat_with_term_frequencies(true)
        .await
        .expect("cache hit");
    assert_eq!(again.physical_name(), handle.physical_name());

    // After invalidation the same-named physical table still exists in the
    // backend; the recomputation must replace it rather than collide.
    engine.invalidate_cache();
    let recomputed = engine
        .ensure_concat_with_term_frequencies(true)
        .await
        .expect("recompute after invalidation");
    assert_eq!(recomputed.physical_name(), handle.physical_name());
    let result = engine
        .read_table(recomputed.as_ref())
        .await
        .expect("read recomputed table");
    assert_eq!(result.rows.len(), 6);
}

#[tokio::test]
async fn term_frequency_tables_count_relative_frequencies() {
    let mut engine = seeded_engine().await;

    let handle = engine
        .compute_term_frequency_table("name")
        .await
        .expect("compute tf table");
    let result = engine
        .read_table(handle.as_ref())
        .await
        .expect("read tf table");

    // Five distinct names over six records.
    assert_eq!(result.rows.len(), 5);
    let records = result.as_records();
    let tf_for = |name: &str| {
        records
            .iter()
            .find(|record| record["name"] == Value::Text(name.to_string()))
            .map(|record| real_value(&record["tf_name"]))
            .expect("tf row")
    };
    assert!((tf_for("Amanda") - 2.0 / 6.0).abs() < 1e-12);
    assert!((tf_for("Robin") - 1.0 / 6.0).abs() < 1e-12);
}

#[tokio::test]
async fn lazy_then_materialized_chain_reads_back() {
    let mut engine = seeded_engine().await;

    let lazy = engine
        .ensure_concat_with_term_frequencies(false)
        .await
        .expect("lazy request");
    assert!(!lazy.is_materialized());
    assert!(engine.read_table(lazy.as_ref()).await.is_err());

    let concat = engine.ensure_concat(true).await.expect("materialize concat");
    let result = engine
        .read_table(concat.as_ref())
        .await
        .expect("read concat");
    assert_eq!(result.columns, vec!["unique_id", "name"]);
    assert_eq!(result.rows.len(), 6);
}
