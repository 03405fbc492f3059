//! SQLite-backed durable store.
//!
//! Records are kept as JSON documents next to the columns the store
//! queries on. A transition updates the record row and appends its event
//! inside one database transaction; the row update is guarded by the
//! expected revision so a stale writer changes nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::custody::types::WalletRecord;
use crate::store::{
    Page, PageRequest, StoreError, StoreResult, TransactionFilter, TransactionStore, WalletStore,
};
use crate::txn::model::{Transaction, TransactionEvent};
use crate::txn::state::TxStatus;

const SCHEMA: [&str; 7] = [
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        hash TEXT UNIQUE,
        service TEXT NOT NULL,
        status TEXT NOT NULL,
        entity_kind TEXT,
        entity_id TEXT,
        idempotency_key TEXT,
        revision INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        record TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_idempotency
        ON transactions (service, idempotency_key)
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_service_status ON transactions (service, status)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_entity ON transactions (entity_kind, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_created ON transactions (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS events (
        tx_id TEXT NOT NULL REFERENCES transactions (id),
        sequence INTEGER NOT NULL,
        status TEXT NOT NULL,
        at INTEGER NOT NULL,
        record TEXT NOT NULL,
        PRIMARY KEY (tx_id, sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        service TEXT PRIMARY KEY,
        revoked_at INTEGER,
        record TEXT NOT NULL
    )
    "#,
];

/// Transactions, events and wallets in one SQLite database.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Connect using the `[store]` section, creating the database if needed.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?;
        Self::with_options(options, config.max_connections, config.busy_timeout()).await
    }

    /// Open (or create) a database file directly.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let defaults = StoreConfig::default();
        let options = SqliteConnectOptions::new().filename(path);
        Self::with_options(options, defaults.max_connections, defaults.busy_timeout()).await
    }

    async fn with_options(
        options: SqliteConnectOptions,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        init_schema(&pool).await?;
        tracing::info!(max_connections, "Record store ready");
        Ok(Self { pool })
    }

    /// Wait for in-flight statements and close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_record(&self, sql: &str, key: &str) -> StoreResult<Option<Transaction>> {
        let record: Option<String> = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        record.as_deref().map(decode).transpose()
    }

    async fn find_by_idempotency(&self, service: &str, key: &str) -> StoreResult<Option<Transaction>> {
        let record: Option<String> = sqlx::query_scalar(
            "SELECT record FROM transactions WHERE service = ? AND idempotency_key = ?",
        )
        .bind(service)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        record.as_deref().map(decode).transpose()
    }

    async fn hash_owner(&self, hash: &str) -> StoreResult<Option<String>> {
        Ok(sqlx::query_scalar("SELECT id FROM transactions WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Name the constraint an insert ran into.
    async fn insert_failure(&self, tx: &Transaction, error: sqlx::Error) -> StoreResult<StoreError> {
        if !is_unique_violation(&error) {
            return Ok(error.into());
        }
        if let Some(key) = &tx.idempotency_key {
            if let Some(existing) = self.find_by_idempotency(&tx.service, key).await? {
                return Ok(StoreError::Duplicate(Box::new(existing)));
            }
        }
        if let Some(failure) = self.hash_failure(&tx.id, tx.hash.as_deref()).await? {
            return Ok(failure);
        }
        if let Some(existing) = self.get(&tx.id).await? {
            return Ok(StoreError::Conflict(Box::new(existing)));
        }
        Ok(error.into())
    }

    async fn hash_failure(&self, id: &str, hash: Option<&str>) -> StoreResult<Option<StoreError>> {
        let Some(hash) = hash else {
            return Ok(None);
        };
        Ok(self
            .hash_owner(hash)
            .await?
            .filter(|owner| owner != id)
            .map(|owner| StoreError::HashInUse {
                hash: hash.to_string(),
                owner,
            }))
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map_or(false, |e| e.is_unique_violation())
}

fn encode<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Persistence(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Persistence(e.to_string()))
}

async fn insert_row(conn: &mut SqliteConnection, tx: &Transaction, record: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, hash, service, status, entity_kind, entity_id, idempotency_key, revision, created_at, record)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&tx.id)
    .bind(&tx.hash)
    .bind(&tx.service)
    .bind(tx.status.as_str())
    .bind(tx.entity.as_ref().map(|e| e.kind.as_str()))
    .bind(tx.entity.as_ref().map(|e| e.id.as_str()))
    .bind(&tx.idempotency_key)
    .bind(tx.revision as i64)
    .bind(tx.created_at.timestamp_micros())
    .bind(record)
    .execute(conn)
    .await?;
    Ok(())
}

async fn update_row(
    conn: &mut SqliteConnection,
    expected_revision: u64,
    next: &Transaction,
    record: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET hash = ?, status = ?, revision = ?, record = ?
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(&next.hash)
    .bind(next.status.as_str())
    .bind(next.revision as i64)
    .bind(record)
    .bind(&next.id)
    .bind(expected_revision as i64)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

async fn insert_event(conn: &mut SqliteConnection, event: &TransactionEvent, record: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO events (tx_id, sequence, status, at, record) VALUES (?, ?, ?, ?, ?)")
        .bind(&event.tx_id)
        .bind(event.sequence as i64)
        .bind(event.status.as_str())
        .bind(event.at.timestamp_micros())
        .bind(record)
        .execute(conn)
        .await?;
    Ok(())
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &TransactionFilter) {
    let mut separator = " WHERE ";
    if let Some(service) = &filter.service {
        query.push(separator).push("service = ").push_bind(service.clone());
        separator = " AND ";
    }
    if let Some(status) = filter.status {
        query.push(separator).push("status = ").push_bind(status.as_str());
        separator = " AND ";
    }
    if let Some(entity) = &filter.entity {
        query
            .push(separator)
            .push("entity_kind = ")
            .push_bind(entity.kind.clone())
            .push(" AND entity_id = ")
            .push_bind(entity.id.clone());
    }
}

#[async_trait]
impl TransactionStore for SqlStore {
    async fn insert(&self, tx: Transaction, event: TransactionEvent) -> StoreResult<Transaction> {
        let record = encode(&tx)?;
        let event_record = encode(&event)?;

        let mut db = self.pool.begin().await?;
        if let Err(e) = insert_row(&mut db, &tx, &record).await {
            db.rollback().await?;
            return Err(self.insert_failure(&tx, e).await?);
        }
        if let Err(e) = insert_event(&mut db, &event, &event_record).await {
            db.rollback().await?;
            return Err(e.into());
        }
        db.commit().await?;
        Ok(tx)
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Transaction>> {
        self.fetch_record("SELECT record FROM transactions WHERE id = ?", id)
            .await
    }

    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<Transaction>> {
        self.fetch_record("SELECT record FROM transactions WHERE hash = ?", hash)
            .await
    }

    async fn list(
        &self,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> StoreResult<Page<Transaction>> {
        let limit = page.effective_limit();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM transactions");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT record FROM transactions");
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(page.offset as i64);
        let rows = select.build_query_scalar::<String>().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|raw| decode(raw))
            .collect::<StoreResult<Vec<Transaction>>>()?;
        Ok(Page {
            items,
            total: total as usize,
            offset: page.offset,
            limit,
        })
    }

    async fn list_open(&self) -> StoreResult<Vec<Transaction>> {
        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT record FROM transactions WHERE status IN (");
        let mut open = query.separated(", ");
        for status in TxStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            open.push_bind(status.as_str());
        }
        open.push_unseparated(")");

        let rows = query.build_query_scalar::<String>().fetch_all(&self.pool).await?;
        rows.iter().map(|raw| decode(raw)).collect()
    }

    async fn apply_transition(
        &self,
        expected_revision: u64,
        next: Transaction,
        event: TransactionEvent,
    ) -> StoreResult<Transaction> {
        let record = encode(&next)?;
        let event_record = encode(&event)?;

        let mut db = self.pool.begin().await?;
        let updated = match update_row(&mut db, expected_revision, &next, &record).await {
            Ok(rows) => rows,
            Err(e) => {
                db.rollback().await?;
                if is_unique_violation(&e) {
                    if let Some(failure) = self.hash_failure(&next.id, next.hash.as_deref()).await? {
                        return Err(failure);
                    }
                }
                return Err(e.into());
            }
        };

        if updated == 0 {
            db.rollback().await?;
            return Err(match self.get(&next.id).await? {
                Some(current) => StoreError::Conflict(Box::new(current)),
                None => StoreError::NotFound(next.id.clone()),
            });
        }

        if let Err(e) = insert_event(&mut db, &event, &event_record).await {
            db.rollback().await?;
            return Err(e.into());
        }
        db.commit().await?;
        Ok(next)
    }

    async fn events(&self, id: &str) -> StoreResult<Vec<TransactionEvent>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT record FROM events WHERE tx_id = ? ORDER BY sequence")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|raw| decode(raw)).collect()
    }
}

#[async_trait]
impl WalletStore for SqlStore {
    async fn get_wallet(&self, service: &str) -> StoreResult<Option<WalletRecord>> {
        let record: Option<String> = sqlx::query_scalar("SELECT record FROM wallets WHERE service = ?")
            .bind(service)
            .fetch_optional(&self.pool)
            .await?;
        record.as_deref().map(decode).transpose()
    }

    async fn put_wallet(&self, record: WalletRecord) -> StoreResult<WalletRecord> {
        let raw = encode(&record)?;
        let inserted = sqlx::query("INSERT INTO wallets (service, revoked_at, record) VALUES (?, ?, ?)")
            .bind(&record.service)
            .bind(record.revoked_at.map(|at| at.timestamp_micros()))
            .bind(raw)
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => Err(StoreError::WalletExists(record.service)),
            Err(e) => Err(e.into()),
        }
    }

    async fn revoke_wallet(&self, service: &str, at: DateTime<Utc>) -> StoreResult<WalletRecord> {
        let mut db = self.pool.begin().await?;
        let raw: Option<String> = sqlx::query_scalar("SELECT record FROM wallets WHERE service = ?")
            .bind(service)
            .fetch_optional(&mut *db)
            .await?;
        let mut record: WalletRecord = match raw {
            Some(raw) => decode(&raw)?,
            None => return Err(StoreError::WalletNotFound(service.to_string())),
        };

        if record.revoked_at.is_none() {
            record.revoked_at = Some(at);
            sqlx::query("UPDATE wallets SET revoked_at = ?, record = ? WHERE service = ?")
                .bind(at.timestamp_micros())
                .bind(encode(&record)?)
                .bind(service)
                .execute(&mut *db)
                .await?;
        }
        db.commit().await?;
        Ok(record)
    }
}
