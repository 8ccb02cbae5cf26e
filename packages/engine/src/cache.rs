use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::type_mismatch_error;
use crate::naming::is_valid_identifier;
use crate::StitchError;

/// Capability contract every cached value must satisfy. Concrete backends may
/// carry richer handle types; the cache only relies on these accessors.
pub trait TableHandle: Send + Sync {
    /// Logical name the handle answers for, independent of run scope.
    fn templated_name(&self) -> &str;

    /// Name of the physical table in the backend.
    fn physical_name(&self) -> &str;

    /// Whether the physical table actually exists, as opposed to a lazy
    /// handle over still-pending SQL.
    fn is_materialized(&self) -> bool;
}

/// Default handle implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchTable {
    templated_name: String,
    physical_name: String,
    materialized: bool,
}

impl StitchTable {
    pub fn materialized(templated_name: impl Into<String>, physical_name: impl Into<String>) -> Self {
        Self {
            templated_name: templated_name.into(),
            physical_name: physical_name.into(),
            materialized: true,
        }
    }

    pub fn lazy(templated_name: impl Into<String>, physical_name: impl Into<String>) -> Self {
        Self {
            templated_name: templated_name.into(),
            physical_name: physical_name.into(),
            materialized: false,
        }
    }
}

impl TableHandle for StitchTable {
    fn templated_name(&self) -> &str {
        &self.templated_name
    }

    fn physical_name(&self) -> &str {
        &self.physical_name
    }

    fn is_materialized(&self) -> bool {
        self.materialized
    }
}

/// Memoizes materialized results by logical table name. At most one physical
/// computation per (run uid, logical table) for the life of the instance.
#[derive(Default)]
pub struct IntermediateTableCache {
    entries: BTreeMap<String, Arc<dyn TableHandle>>,
}

impl IntermediateTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, templated_name: &str) -> Option<Arc<dyn TableHandle>> {
        self.entries.get(templated_name).cloned()
    }

    pub fn contains(&self, templated_name: &str) -> bool {
        self.entries.contains_key(templated_name)
    }

    /// Inserts a handle after checking the capability contract. A rejected
    /// insert leaves prior entries untouched.
    pub fn put(
        &mut self,
        templated_name: &str,
        handle: Arc<dyn TableHandle>,
    ) -> Result<(), StitchError> {
        validate_handle(handle.as_ref())?;
        self.entries.insert(templated_name.to_string(), handle);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn TableHandle>)> {
        self.entries
            .iter()
            .map(|(name, handle)| (name.as_str(), handle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn validate_handle(handle: &dyn TableHandle) -> Result<(), StitchError> {
    if !handle.is_materialized() {
        return Err(type_mismatch_error(format!(
            "`{}` is not a materialized table handle",
            handle.templated_name()
        )));
    }
    if !is_valid_identifier(handle.physical_name()) {
        return Err(type_mismatch_error(format!(
            "`{}` is not a valid physical table name",
            handle.physical_name()
        )));
    }
    if handle.templated_name().is_empty() {
        return Err(type_mismatch_error(
            "table handle has no logical name".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{IntermediateTableCache, StitchTable, TableHandle};
    use crate::error::ErrorCode;

    struct NotReallyATable;

    impl TableHandle for NotReallyATable {
        fn templated_name(&self) -> &str {
            ""
        }

        fn physical_name(&self) -> &str {
            "30"
        }

        fn is_materialized(&self) -> bool {
            false
        }
    }

    #[test]
    fn put_and_get_round_trip() {
        let mut cache = IntermediateTableCache::new();
        let handle = Arc::new(StitchTable::materialized("df_concat", "df_concat_abc"));
        cache.put("df_concat", handle).expect("valid handle");

        let fetched = cache.get("df_concat").expect("cached entry");
        assert_eq!(fetched.physical_name(), "df_concat_abc");
        assert!(cache.get("df_other").is_none());
    }

    #[test]
    fn rejected_insert_leaves_cache_untouched() {
        let mut cache = IntermediateTableCache::new();
        cache
            .put(
                "df_concat",
                Arc::new(StitchTable::materialized("df_concat", "df_concat_abc")),
            )
            .expect("valid handle");

        let error = cache
            .put("not_a_table", Arc::new(NotReallyATable))
            .expect_err("contract violation");
        assert!(error.is(ErrorCode::TypeMismatch));

        // Only valid handles remain observable.
        assert_eq!(cache.len(), 1);
        for (_, handle) in cache.iter() {
            assert!(handle.is_materialized());
            assert!(!handle.templated_name().is_empty());
        }
    }

    #[test]
    fn lazy_handles_are_not_cacheable() {
        let mut cache = IntermediateTableCache::new();
        let error = cache
            .put(
                "df_concat",
                Arc::new(StitchTable::lazy("df_concat", "df_concat_abc")),
            )
            .expect_err("lazy handle");
        assert!(error.is(ErrorCode::TypeMismatch));
        assert!(cache.is_empty());
    }
}
