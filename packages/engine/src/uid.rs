use xxhash_rust::xxh3::xxh3_64;

/// Fresh run-scope token: a uuid v7 folded through xxh3 into a short
/// identifier-safe suffix for generated table names.
pub fn generate_run_uid() -> String {
    let seed = uuid::Uuid::now_v7();
    format!("{:016x}", xxh3_64(seed.as_bytes()))
}
