use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock, waygate_common::GatewayError};

use crate::record::{SessionRecord, SessionStatus, now_ms};

/// Repository contract for session records.
///
/// The gateway mutates records through the narrow setters so concurrent
/// writers never clobber fields they don't own.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>, GatewayError>;

    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError>;

    async fn set_status(
        &self,
        tenant_id: &str,
        status: SessionStatus,
    ) -> Result<(), GatewayError>;

    async fn set_bound_device(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn set_subscribed_events(
        &self,
        tenant_id: &str,
        events: &[String],
    ) -> Result<(), GatewayError>;

    async fn set_webhook_url(
        &self,
        tenant_id: &str,
        url: Option<&str>,
    ) -> Result<(), GatewayError>;

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<(), GatewayError>;

    /// Records flagged for startup reconciliation.
    async fn list_active(&self) -> Result<Vec<SessionRecord>, GatewayError>;
}

fn storage_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Storage(e.to_string())
}

// ── SQLite repository ───────────────────────────────────────────────────────

/// SQLite-backed session repository.
pub struct SqliteSessionRepository {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    tenant_id: String,
    status: String,
    bound_device_id: Option<String>,
    webhook_url: Option<String>,
    subscribed_events: String,
    active: i32,
    created_at: i64,
    updated_at: i64,
}

impl From<SessionRow> for SessionRecord {
    fn from(r: SessionRow) -> Self {
        Self {
            tenant_id: r.tenant_id,
            status: SessionStatus::parse(&r.status),
            bound_device_id: r.bound_device_id,
            webhook_url: r.webhook_url,
            subscribed_events: serde_json::from_str(&r.subscribed_events).unwrap_or_default(),
            active: r.active != 0,
            created_at: r.created_at as u64,
            updated_at: r.updated_at as u64,
        }
    }
}

impl SqliteSessionRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `sessions` table if it doesn't exist.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<(), GatewayError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sessions (
                tenant_id         TEXT PRIMARY KEY,
                status            TEXT NOT NULL DEFAULT 'disconnected',
                bound_device_id   TEXT,
                webhook_url       TEXT,
                subscribed_events TEXT NOT NULL DEFAULT '[]',
                active            INTEGER NOT NULL DEFAULT 0,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn touch_column(
        &self,
        tenant_id: &str,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<(), GatewayError> {
        let now = now_ms() as i64;
        sqlx::query(sql)
            .bind(bind)
            .bind(now)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>, GatewayError> {
        let row =
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(row.map(Into::into))
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError> {
        let now = now_ms() as i64;
        let events = serde_json::to_string(&record.subscribed_events).map_err(storage_err)?;
        sqlx::query(
            r#"INSERT INTO sessions
                 (tenant_id, status, bound_device_id, webhook_url,
                  subscribed_events, active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(tenant_id) DO UPDATE SET
                 status            = excluded.status,
                 bound_device_id   = excluded.bound_device_id,
                 webhook_url       = excluded.webhook_url,
                 subscribed_events = excluded.subscribed_events,
                 active            = excluded.active,
                 updated_at        = excluded.updated_at"#,
        )
        .bind(&record.tenant_id)
        .bind(record.status.as_str())
        .bind(&record.bound_device_id)
        .bind(&record.webhook_url)
        .bind(&events)
        .bind(record.active as i32)
        .bind(record.created_at as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn set_status(
        &self,
        tenant_id: &str,
        status: SessionStatus,
    ) -> Result<(), GatewayError> {
        self.touch_column(
            tenant_id,
            "UPDATE sessions SET status = ?, updated_at = ? WHERE tenant_id = ?",
            Some(status.as_str()),
        )
        .await
    }

    async fn set_bound_device(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.touch_column(
            tenant_id,
            "UPDATE sessions SET bound_device_id = ?, updated_at = ? WHERE tenant_id = ?",
            device_id,
        )
        .await
    }

    async fn set_subscribed_events(
        &self,
        tenant_id: &str,
        events: &[String],
    ) -> Result<(), GatewayError> {
        let json = serde_json::to_string(events).map_err(storage_err)?;
        self.touch_column(
            tenant_id,
            "UPDATE sessions SET subscribed_events = ?, updated_at = ? WHERE tenant_id = ?",
            Some(json.as_str()),
        )
        .await
    }

    async fn set_webhook_url(
        &self,
        tenant_id: &str,
        url: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.touch_column(
            tenant_id,
            "UPDATE sessions SET webhook_url = ?, updated_at = ? WHERE tenant_id = ?",
            url,
        )
        .await
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<(), GatewayError> {
        let now = now_ms() as i64;
        sqlx::query("UPDATE sessions SET active = ?, updated_at = ? WHERE tenant_id = ?")
            .bind(active as i32)
            .bind(now)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SessionRecord>, GatewayError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE active = 1 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ── In-memory repository ────────────────────────────────────────────────────

/// In-memory repository for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySessionRepository {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, tenant_id: &str, f: F) -> Result<(), GatewayError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(tenant_id) {
            f(record);
            record.updated_at = now_ms();
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn get(&self, tenant_id: &str) -> Result<Option<SessionRecord>, GatewayError> {
        Ok(self.records.read().await.get(tenant_id).cloned())
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<(), GatewayError> {
        self.records
            .write()
            .await
            .insert(record.tenant_id.clone(), record.clone());
        Ok(())
    }

    async fn set_status(
        &self,
        tenant_id: &str,
        status: SessionStatus,
    ) -> Result<(), GatewayError> {
        self.update(tenant_id, |r| r.status = status).await
    }

    async fn set_bound_device(
        &self,
        tenant_id: &str,
        device_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let device_id = device_id.map(str::to_string);
        self.update(tenant_id, |r| r.bound_device_id = device_id).await
    }

    async fn set_subscribed_events(
        &self,
        tenant_id: &str,
        events: &[String],
    ) -> Result<(), GatewayError> {
        let events = events.to_vec();
        self.update(tenant_id, |r| r.subscribed_events = events).await
    }

    async fn set_webhook_url(
        &self,
        tenant_id: &str,
        url: Option<&str>,
    ) -> Result<(), GatewayError> {
        let url = url.map(str::to_string);
        self.update(tenant_id, |r| r.webhook_url = url).await
    }

    async fn set_active(&self, tenant_id: &str, active: bool) -> Result<(), GatewayError> {
        self.update(tenant_id, |r| r.active = active).await
    }

    async fn list_active(&self) -> Result<Vec<SessionRecord>, GatewayError> {
        let mut active: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }
}
