use sha2::{Digest, Sha256};
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::classification::DocumentKind;

stored_object!(FileChangeRecord, "file_change_record", {
    file_path: String,
    content_hash: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    last_scanned_at: DateTime<Utc>,
    ruleset_tag: String,
    document_kind: DocumentKind
});

impl FileChangeRecord {
    /// Record ids are a digest of the file path, so every scan of the same
    /// path lands on the same row. The record is a durable cache, never a
    /// queue: rows are upserted on change and touched on every scan, but
    /// never deleted.
    pub fn stable_id(file_path: &str) -> String {
        format!("{:x}", Sha256::digest(file_path.as_bytes()))
    }

    pub fn new(
        file_path: String,
        content_hash: String,
        ruleset_tag: String,
        document_kind: DocumentKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::stable_id(&file_path),
            created_at: now,
            updated_at: now,
            file_path,
            content_hash,
            last_scanned_at: now,
            ruleset_tag,
            document_kind,
        }
    }

    pub async fn find_by_path(
        file_path: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(&Self::stable_id(file_path)).await?)
    }

    /// Upserts the record with a freshly computed hash. An existing row's
    /// `created_at` is carried forward, so the first-seen timestamp survives
    /// hash changes.
    pub async fn record_scan(mut self, db: &SurrealDbClient) -> Result<(), AppError> {
        if let Some(existing) = Self::find_by_path(&self.file_path, db).await? {
            self.created_at = existing.created_at;
        }
        db.upsert_item(self).await?;
        Ok(())
    }

    /// Marks an unchanged file as seen without touching the stored hash.
    pub async fn touch_scanned(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET last_scanned_at = $now, updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }
}
