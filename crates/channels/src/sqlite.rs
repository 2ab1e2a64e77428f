//! SQLite-backed store implementations.

use {anyhow::Result, async_trait::async_trait, sqlx::SqlitePool};

use crate::{
    model::{
        ChannelPatch, ChannelStatus, ConversationEntry, LocalChannel, NewChannel,
        NewConversationEntry, SyncStatus, SyncStatusPatch, now_ms,
    },
    store::{ChannelStore, ConversationStore, SyncStatusStore},
};

/// Initialize the schema. Used by tests and the CLI's first run.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS channels (
            id                TEXT    PRIMARY KEY,
            organization_id   TEXT    NOT NULL,
            external_group_id TEXT    NOT NULL,
            name              TEXT    NOT NULL,
            status            TEXT    NOT NULL,
            config            TEXT    NOT NULL,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL,
            UNIQUE (organization_id, external_group_id)
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS sync_status (
            organization_id TEXT    PRIMARY KEY,
            last_sync_at    INTEGER,
            in_progress     INTEGER NOT NULL DEFAULT 0,
            group_count     INTEGER NOT NULL DEFAULT 0,
            active_count    INTEGER NOT NULL DEFAULT 0
        )"#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS conversations (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id TEXT    NOT NULL,
            role       TEXT    NOT NULL,
            sender     TEXT,
            body       TEXT    NOT NULL,
            created_at INTEGER NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

// ── Channels ─────────────────────────────────────────────────────────────────

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: String,
    organization_id: String,
    external_group_id: String,
    name: String,
    status: String,
    config: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<ChannelRow> for LocalChannel {
    type Error = anyhow::Error;

    fn try_from(r: ChannelRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            organization_id: r.organization_id,
            external_group_id: r.external_group_id,
            name: r.name,
            status: ChannelStatus::parse(&r.status)?,
            config: serde_json::from_str(&r.config)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// SQLite-backed channel store.
pub struct SqliteChannelStore {
    pool: SqlitePool,
}

impl SqliteChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelStore for SqliteChannelStore {
    async fn list(&self, organization_id: &str) -> Result<Vec<LocalChannel>> {
        let rows = sqlx::query_as::<_, ChannelRow>(
            "SELECT * FROM channels WHERE organization_id = ? ORDER BY created_at",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find(
        &self,
        organization_id: &str,
        external_group_id: &str,
    ) -> Result<Option<LocalChannel>> {
        let row = sqlx::query_as::<_, ChannelRow>(
            "SELECT * FROM channels WHERE organization_id = ? AND external_group_id = ?",
        )
        .bind(organization_id)
        .bind(external_group_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn create(&self, channel: NewChannel) -> Result<LocalChannel> {
        let now = now_ms();
        let created = LocalChannel {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: channel.organization_id,
            external_group_id: channel.external_group_id,
            name: channel.name,
            status: channel.status,
            config: channel.config,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            r#"INSERT INTO channels
               (id, organization_id, external_group_id, name, status, config, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&created.id)
        .bind(&created.organization_id)
        .bind(&created.external_group_id)
        .bind(&created.name)
        .bind(created.status.as_str())
        .bind(serde_json::to_string(&created.config)?)
        .bind(created.created_at)
        .bind(created.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update(&self, id: &str, patch: ChannelPatch) -> Result<()> {
        let config_json = patch
            .config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"UPDATE channels SET
                 name       = COALESCE(?, name),
                 status     = COALESCE(?, status),
                 config     = COALESCE(?, config),
                 updated_at = ?
               WHERE id = ?"#,
        )
        .bind(patch.name)
        .bind(patch.status.map(ChannelStatus::as_str))
        .bind(config_json)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Sync status ──────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct SyncStatusRow {
    organization_id: String,
    last_sync_at: Option<i64>,
    in_progress: bool,
    group_count: i64,
    active_count: i64,
}

impl From<SyncStatusRow> for SyncStatus {
    fn from(r: SyncStatusRow) -> Self {
        Self {
            organization_id: r.organization_id,
            last_sync_at: r.last_sync_at,
            in_progress: r.in_progress,
            group_count: r.group_count,
            active_count: r.active_count,
        }
    }
}

/// SQLite-backed sync status store.
pub struct SqliteSyncStatusStore {
    pool: SqlitePool,
}

impl SqliteSyncStatusStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStatusStore for SqliteSyncStatusStore {
    async fn find(&self, organization_id: &str) -> Result<Option<SyncStatus>> {
        let row = sqlx::query_as::<_, SyncStatusRow>(
            "SELECT * FROM sync_status WHERE organization_id = ?",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert(&self, organization_id: &str, patch: SyncStatusPatch) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sync_status
                 (organization_id, last_sync_at, in_progress, group_count, active_count)
               VALUES (?, ?, COALESCE(?, 0), COALESCE(?, 0), COALESCE(?, 0))
               ON CONFLICT(organization_id) DO UPDATE SET
                 last_sync_at = COALESCE(excluded.last_sync_at, sync_status.last_sync_at),
                 in_progress  = COALESCE(?, sync_status.in_progress),
                 group_count  = COALESCE(?, sync_status.group_count),
                 active_count = COALESCE(?, sync_status.active_count)"#,
        )
        .bind(organization_id)
        .bind(patch.last_sync_at)
        .bind(patch.in_progress)
        .bind(patch.group_count)
        .bind(patch.active_count)
        .bind(patch.in_progress)
        .bind(patch.group_count)
        .bind(patch.active_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Conversations ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    channel_id: String,
    role: String,
    sender: Option<String>,
    body: String,
    created_at: i64,
}

impl From<ConversationRow> for ConversationEntry {
    fn from(r: ConversationRow) -> Self {
        Self {
            id: r.id,
            channel_id: r.channel_id,
            role: r.role,
            sender: r.sender,
            body: r.body,
            created_at: r.created_at,
        }
    }
}

/// SQLite-backed conversation store.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, entry: NewConversationEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (channel_id, role, sender, body, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.channel_id)
        .bind(&entry.role)
        .bind(&entry.sender)
        .bind(&entry.body)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, channel_id: &str, limit: u32) -> Result<Vec<ConversationEntry>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"SELECT * FROM (
                 SELECT * FROM conversations WHERE channel_id = ? ORDER BY id DESC LIMIT ?
               ) ORDER BY id ASC"#,
        )
        .bind(channel_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
