use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::Row;
use tracing::{instrument, warn};

use crate::database_ops::db::Db;

/// One row of `game_rankings_cache`: the store-assigned id plus the raw
/// payload blob. `data` is kept untyped here; callers validate it into a
/// `RankingPayload` before acting on it.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub id: i64,
    pub data: Value,
}

/// Typed view of a cached ranking payload. Only the fields this job acts on
/// are named; everything else the upstream publisher wrote (title, tags,
/// pricing, review stats, mood scores, ...) is carried in `rest` so a save
/// never drops a field it does not understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingPayload {
    /// Steam app id as stored upstream; both JSON numbers and strings occur.
    #[serde(rename = "appId", default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<Value>,
    /// AI enrichment result. Absent, `null`, or empty values all mean "not
    /// yet analyzed"; anything else must never be overwritten by this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl RankingPayload {
    /// Validate a raw payload blob. Anything that is not a JSON object is
    /// corrupt from this job's point of view and yields `None`.
    pub fn from_value(data: &Value) -> Option<Self> {
        if !data.is_object() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    /// Idempotency signal: true when the row already carries a usable
    /// analysis. Empty strings, objects, and arrays count as absent so a
    /// half-written value does not block re-enrichment forever.
    pub fn has_analysis(&self) -> bool {
        match &self.analysis {
            None => false,
            Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }

    /// Rebuild the full payload with `analysis` set, leaving every other
    /// field exactly as it was read.
    pub fn into_enriched(self, analysis: Value) -> Value {
        let mut map = Map::new();
        if let Some(app_id) = self.app_id {
            map.insert("appId".to_string(), app_id);
        }
        for (key, value) in self.rest {
            map.insert(key, value);
        }
        map.insert("analysis".to_string(), analysis);
        Value::Object(map)
    }
}

/// Store seam for the rankings cache. The orchestrator only ever needs point
/// lookup and whole-payload replace; tests swap in an in-memory fake.
#[async_trait::async_trait]
pub trait RankingsCacheStore: Send + Sync {
    /// At most one record whose `payload.appId` equals the given id,
    /// string-compared. `None` is the expected no-row condition, not an error.
    async fn find_by_app_id(&self, app_id: i64) -> Result<Option<CacheRecord>>;
    /// Atomic full replacement of the payload for one row.
    async fn save_payload(&self, record_id: i64, payload: &Value) -> Result<()>;
}

pub struct PgRankingsCacheStore {
    db: Db,
}

impl PgRankingsCacheStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// App ids of rows that still lack an analysis, oldest rows first. Rows
    /// whose appId is not numeric are skipped with a warning; the per-row
    /// check in the backfill re-validates everything this query matched.
    #[instrument(skip(self))]
    pub async fn app_ids_missing_analysis(&self, limit: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id, data->>'appId' AS app_id
             FROM game_rankings_cache
             WHERE data IS NOT NULL
               AND (
                 data->'analysis' IS NULL
                 OR data->'analysis' = 'null'::jsonb
                 OR data->'analysis' = '\"\"'::jsonb
                 OR data->'analysis' = '{}'::jsonb
                 OR data->'analysis' = '[]'::jsonb
               )
             ORDER BY id ASC
             LIMIT $1",
        )
        .bind(limit)
        .persistent(false)
        .fetch_all(&self.db.pool)
        .await?;

        let mut app_ids: Vec<i64> = Vec::with_capacity(rows.len());
        for row in rows {
            let record_id: i64 = row.try_get("id")?;
            let raw: Option<String> = row.try_get("app_id")?;
            match raw.as_deref().map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
                Some(app_id) => app_ids.push(app_id),
                None => {
                    warn!(record_id, app_id = ?raw, "cache row has non-numeric appId; skipping")
                }
            }
        }
        Ok(app_ids)
    }
}

#[async_trait::async_trait]
impl RankingsCacheStore for PgRankingsCacheStore {
    // `data->>'appId'` yields text for JSON numbers and strings alike, so one
    // comparison covers both storage shapes. Lowest id wins when duplicates
    // exist, keeping re-runs deterministic.
    #[instrument(skip(self))]
    async fn find_by_app_id(&self, app_id: i64) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(
            "SELECT id, data FROM game_rankings_cache
             WHERE data->>'appId' = $1
             ORDER BY id ASC
             LIMIT 1",
        )
        .bind(app_id.to_string())
        .persistent(false)
        .fetch_optional(&self.db.pool)
        .await?;

        match row {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let data: Option<Value> = row.try_get("data")?;
                Ok(Some(CacheRecord {
                    id,
                    data: data.unwrap_or(Value::Null),
                }))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, payload))]
    async fn save_payload(&self, record_id: i64, payload: &Value) -> Result<()> {
        let result = sqlx::query("UPDATE game_rankings_cache SET data = $1 WHERE id = $2")
            .bind(payload)
            .bind(record_id)
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("no game_rankings_cache row with id {record_id}");
        }
        Ok(())
    }
}
