//! PostgreSQL + pgvector implementation of the vector store.
//!
//! Entries live in `semantic_cache_entries`, indexed for cosine (`<=>`)
//! nearest-neighbor search within a `(tenant_id, plan_sig)` partition.
//! The table is created at startup; expired rows are filtered on read and
//! reaped by `cleanup_expired`.

use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{
    NewSemanticEntry, SemanticMatch, VectorBackend, VectorStoreError, VectorStoreResult,
};

pub struct PgvectorStore {
    pool: PgPool,
    dimensions: usize,
}

impl PgvectorStore {
    pub fn new(pool: PgPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    /// Enable the pgvector extension and create the entries table and
    /// indexes. Called once during startup.
    pub async fn initialize(&self) -> VectorStoreResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS semantic_cache_entries (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                tenant_id TEXT NOT NULL,
                plan_sig TEXT NOT NULL,
                request_hash TEXT NOT NULL,
                prompt_text TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                response_json JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            self.dimensions
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS semantic_cache_entries_partition_idx \
             ON semantic_cache_entries (tenant_id, plan_sig, expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS semantic_cache_entries_embedding_idx \
             ON semantic_cache_entries USING ivfflat (embedding vector_cosine_ops) \
             WITH (lists = 100)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        info!(dimensions = self.dimensions, "pgvector store initialized");
        Ok(())
    }

    fn check_dimensions(&self, vec: &[f64]) -> VectorStoreResult<()> {
        if vec.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vec.len(),
            });
        }
        Ok(())
    }

    /// pgvector accepts the literal form `'[1,2,3]'::vector`.
    fn vec_literal(vec: &[f64]) -> String {
        let mut out = String::with_capacity(vec.len() * 10 + 2);
        out.push('[');
        for (i, x) in vec.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&format!("{x:.6}"));
        }
        out.push(']');
        out
    }
}

#[async_trait::async_trait]
impl VectorBackend for PgvectorStore {
    async fn semantic_lookup(
        &self,
        tenant_id: &str,
        plan_sig: &str,
        query: &[f64],
    ) -> VectorStoreResult<Option<SemanticMatch>> {
        self.check_dimensions(query)?;
        let qvec = Self::vec_literal(query);

        let row = sqlx::query(
            r#"
            SELECT
              id::text AS id,
              response_json,
              (1 - (embedding <=> $3::vector)) AS similarity
            FROM semantic_cache_entries
            WHERE tenant_id = $1
              AND plan_sig = $2
              AND expires_at > now()
            ORDER BY embedding <=> $3::vector
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(plan_sig)
        .bind(&qvec)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let m = SemanticMatch {
            id: row
                .try_get("id")
                .map_err(|e| VectorStoreError::Database(e.to_string()))?,
            response_json: row
                .try_get("response_json")
                .map_err(|e| VectorStoreError::Database(e.to_string()))?,
            similarity: row
                .try_get("similarity")
                .map_err(|e| VectorStoreError::Database(e.to_string()))?,
        };
        debug!(entry_id = %m.id, similarity = m.similarity, "semantic candidate");
        Ok(Some(m))
    }

    async fn semantic_store(&self, entry: NewSemanticEntry<'_>) -> VectorStoreResult<String> {
        self.check_dimensions(entry.embedding)?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(entry.ttl)
                .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO semantic_cache_entries
              (tenant_id, plan_sig, request_hash, prompt_text, embedding, response_json, expires_at)
            VALUES
              ($1, $2, $3, $4, $5::vector, $6, $7)
            RETURNING id::text AS id
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.plan_sig)
        .bind(entry.request_hash)
        .bind(entry.prompt_text)
        .bind(Self::vec_literal(entry.embedding))
        .bind(entry.response)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Database(e.to_string()))?;

        row.try_get("id")
            .map_err(|e| VectorStoreError::Database(e.to_string()))
    }

    async fn cleanup_expired(&self) -> VectorStoreResult<u64> {
        let result = sqlx::query("DELETE FROM semantic_cache_entries WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> VectorStoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Database(e.to_string()))?;
        Ok(())
    }
}
