use chrono::{DateTime, Utc};
use harvest_core::error::AppError;
use harvest_core::models::RawRecord;
use harvest_core::traits::RecordStore;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};

/// Raw record persistence in PostgreSQL.
///
/// Records are keyed by their provider-assigned id; storing a record that
/// already exists replaces its source, data and collection time.
#[derive(Clone)]
pub struct RawRecordRepository {
    pool: Pool<Postgres>,
}

impl RawRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, record: &RawRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO raw_records (id, source, data, collected_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET source = EXCLUDED.source,
                data = EXCLUDED.data,
                collected_at = EXCLUDED.collected_at,
                updated_at = NOW()
            "#,
        )
        .bind(&record.id)
        .bind(&record.source)
        .bind(Json(&record.data))
        .bind(record.collected_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(record_id = %record.id, source = %record.source, "Stored raw record");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<RawRecord, AppError> {
        let row = sqlx::query_as::<_, RawRecordRow>(
            r#"
            SELECT id, source, data, collected_at
            FROM raw_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Into::into)
            .ok_or_else(|| AppError::RecordNotFound(id.to_string()))
    }

    /// Most recently collected records for a source, newest first.
    pub async fn list_by_source(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<RawRecord>, AppError> {
        let rows = sqlx::query_as::<_, RawRecordRow>(
            r#"
            SELECT id, source, data, collected_at
            FROM raw_records
            WHERE source = $1
            ORDER BY collected_at DESC, id
            LIMIT $2
            "#,
        )
        .bind(source)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_by_source(&self, source: &str) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM raw_records WHERE source = $1")
            .bind(source)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RawRecordRow {
    id: String,
    source: String,
    data: Json<Map<String, Value>>,
    collected_at: DateTime<Utc>,
}

impl From<RawRecordRow> for RawRecord {
    fn from(row: RawRecordRow) -> Self {
        RawRecord {
            id: row.id,
            source: row.source,
            data: row.data.0,
            collected_at: row.collected_at,
        }
    }
}

// -- Trait implementation --

impl RecordStore for RawRecordRepository {
    async fn store_raw_record(&self, record: &RawRecord) -> Result<(), AppError> {
        self.upsert(record).await
    }

    async fn get_raw_record(&self, id: &str) -> Result<RawRecord, AppError> {
        self.get(id).await
    }
}
