pub const DF_CONCAT: &str = "stitch_internal_df_concat";
pub const DF_CONCAT_WITH_TF: &str = "stitch_internal_df_concat_with_tf";
pub const DF_BLOCKED: &str = "stitch_internal_df_blocked";
pub const DF_ESTIMATION_PAIRS: &str = "stitch_internal_df_estimation_pairs";
pub const DF_ESTIMATION_VECTORS: &str = "stitch_internal_df_estimation_vectors";

const TF_TABLE_PREFIX: &str = "stitch_internal_df_tf_";

pub fn term_frequency_table_name(column: &str) -> String {
    format!("{TF_TABLE_PREFIX}{}", sanitize_identifier(column))
}

/// Physical name of a logical (templated) table under one run scope.
pub fn physical_name(templated_name: &str, run_uid: &str) -> String {
    format!("{templated_name}_{run_uid}")
}

pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

pub fn quote_ident(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}
