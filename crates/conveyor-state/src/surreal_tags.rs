//! SurrealDB-backed TagRegistry implementation

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::schema::TagRow;
use crate::storage_traits::{StorageResult, TagRecord, TagRegistry};

/// SurrealDB-backed implementation of [`TagRegistry`].
///
/// Each key is its own record (`tags:⟨key⟩`) and `put` is an `UPSERT`, so a
/// write replaces the previous value without reading it first.
#[derive(Clone)]
pub struct SurrealTagRegistry {
    db: Surreal<Any>,
}

impl SurrealTagRegistry {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }
}

fn row_to_record(row: TagRow) -> TagRecord {
    TagRecord {
        key: row.key,
        value: row.value,
        updated_at: row.updated_at,
    }
}

#[async_trait]
impl TagRegistry for SurrealTagRegistry {
    #[instrument(skip(self, value), fields(key = %key))]
    async fn put(&self, key: &str, value: &str) -> StorageResult<TagRecord> {
        let row = TagRow {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        let key_owned = key.to_string();

        debug!("upserting tag");
        let mut res = self
            .db
            .query("UPSERT type::thing('tags', $key) CONTENT $row RETURN AFTER")
            .bind(("key", key_owned))
            .bind(("row", row))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<TagRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter()
            .next()
            .map(row_to_record)
            .ok_or_else(|| StorageError::Backend(format!("upsert of tag '{}' returned no row", key)))
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> StorageResult<TagRecord> {
        let key_owned = key.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('tags', $key)")
            .bind(("key", key_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<TagRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        rows.into_iter()
            .next()
            .map(row_to_record)
            .ok_or_else(|| StorageError::TagNotFound {
                key: key.to_string(),
            })
    }
}
