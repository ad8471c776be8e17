use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use sarpras_core::domain::booking::{ResourceKind, ResourceRef};

use super::{decode_field, optional_text, text, RepositoryError};
use crate::DbPool;

/// A bookable room or vehicle from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub capacity: Option<u32>,
    pub plate_number: Option<String>,
}

impl ResourceRecord {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef { kind: self.kind, id: self.id.clone(), name: self.name.clone() }
    }
}

#[derive(Clone)]
pub struct SqlResourceRepository {
    pool: DbPool,
}

impl SqlResourceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Option<ResourceRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT kind, id, name, capacity, plate_number FROM resource WHERE kind = ? AND id = ?",
        )
        .bind(kind.as_str())
        .bind(id.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_resource).transpose()
    }

    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT kind, id, name, capacity, plate_number FROM resource
             WHERE kind = ? ORDER BY id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_resource).collect()
    }
}

fn row_to_resource(row: &SqliteRow) -> Result<ResourceRecord, RepositoryError> {
    let capacity: Option<i64> = row
        .try_get("capacity")
        .map_err(|error| RepositoryError::Decode(format!("capacity: {error}")))?;

    Ok(ResourceRecord {
        kind: decode_field("kind", &text(row, "kind")?)?,
        id: text(row, "id")?,
        name: text(row, "name")?,
        capacity: capacity.and_then(|value| u32::try_from(value).ok()),
        plate_number: optional_text(row, "plate_number")?,
    })
}
