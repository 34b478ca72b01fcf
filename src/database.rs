use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::{NoTls, Row};

use crate::error::{Error, Result};
use crate::models::{ChainTipSnapshot, StoreId};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Append-only log of chain-tip snapshots.
#[async_trait]
pub trait ChainTipStore: Send + Sync {
    async fn append(&self, snapshot: &ChainTipSnapshot) -> Result<StoreId>;

    /// The snapshot with the highest id, or `None` on an empty store.
    async fn latest(&self) -> Result<Option<ChainTipSnapshot>>;
}

pub async fn connect(database_url: &str, max_size: u32) -> Result<PgPool> {
    let config = database_url
        .parse::<tokio_postgres::Config>()
        .map_err(|e| Error::Storage(format!("failed to parse DATABASE_URL: {}", e)))?;
    let manager = PostgresConnectionManager::new(config, NoTls);
    let pool = Pool::builder().max_size(max_size).build(manager).await?;
    Ok(pool)
}

pub async fn setup_database(pool: &PgPool) -> Result<()> {
    let schema = "
        CREATE TABLE IF NOT EXISTS blocks (
            id BIGSERIAL PRIMARY KEY,
            block_stats TEXT NOT NULL,
            block TEXT NOT NULL,
            blockchain_info TEXT NOT NULL,
            block_count BIGINT NOT NULL,
            block_header TEXT NOT NULL,
            best_block_hash TEXT NOT NULL,
            decoded_script TEXT NOT NULL,
            mempool_info TEXT NOT NULL,
            raw_mempool TEXT NOT NULL
        );
    ";

    let conn = pool.get().await?;
    conn.batch_execute(schema).await?;
    Ok(())
}

/// Snapshots in the `blocks` table. Every call checks out its own pooled
/// connection, so concurrent ingestion and reads never share a session.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainTipStore for PostgresStore {
    async fn append(&self, snapshot: &ChainTipSnapshot) -> Result<StoreId> {
        let conn = self.pool.get().await?;

        let block_stats = to_text(&snapshot.block_stats)?;
        let block = to_text(&snapshot.block)?;
        let blockchain_info = to_text(&snapshot.blockchain_info)?;
        let block_header = to_text(&snapshot.block_header)?;
        let decoded_script = to_text(&snapshot.decoded_script)?;
        let mempool_info = to_text(&snapshot.mempool_info)?;
        let raw_mempool = to_text(&snapshot.raw_mempool)?;

        let row = conn
            .query_one(
                "INSERT INTO blocks (block_stats, block, blockchain_info, block_count, block_header, best_block_hash, decoded_script, mempool_info, raw_mempool)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING id",
                &[
                    &block_stats,
                    &block,
                    &blockchain_info,
                    &snapshot.block_count,
                    &block_header,
                    &snapshot.best_block_hash,
                    &decoded_script,
                    &mempool_info,
                    &raw_mempool,
                ],
            )
            .await?;

        Ok(row.try_get(0)?)
    }

    async fn latest(&self) -> Result<Option<ChainTipSnapshot>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT block_stats, block, blockchain_info, block_count, block_header, best_block_hash, decoded_script, mempool_info, raw_mempool
                 FROM blocks ORDER BY id DESC LIMIT 1",
                &[],
            )
            .await?;

        row.map(|row| snapshot_from_row(&row)).transpose()
    }
}

fn snapshot_from_row(row: &Row) -> Result<ChainTipSnapshot> {
    Ok(ChainTipSnapshot {
        block_stats: from_text(row, 0)?,
        block: from_text(row, 1)?,
        blockchain_info: from_text(row, 2)?,
        block_count: row.try_get(3)?,
        block_header: from_text(row, 4)?,
        best_block_hash: row.try_get(5)?,
        decoded_script: from_text(row, 6)?,
        mempool_info: from_text(row, 7)?,
        raw_mempool: from_text(row, 8)?,
    })
}

fn to_text(value: &Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Storage(format!("failed to serialize column: {}", e)))
}

fn from_text(row: &Row, idx: usize) -> Result<Value> {
    let text: String = row.try_get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Storage(format!("column {} is not valid JSON: {}", idx, e)))
}

/// Process-local store, for runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<ChainTipSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainTipStore for MemoryStore {
    async fn append(&self, snapshot: &ChainTipSnapshot) -> Result<StoreId> {
        let mut rows = self.rows.lock().await;
        rows.push(snapshot.clone());
        Ok(rows.len() as StoreId)
    }

    async fn latest(&self) -> Result<Option<ChainTipSnapshot>> {
        Ok(self.rows.lock().await.last().cloned())
    }
}
