//! Conversation state storage using SQLite
//!
//! Provides persistent storage for per-sender conversation state. Saves are
//! idempotent upserts keyed by sender: messages carry a per-sender sequence
//! number, so saving the same state twice never duplicates history.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use crate::conversation::{ConversationState, Message, ProductRef, Role, SalesStage};
use crate::core::InterestTracker;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt state for {sender_id}: {reason}")]
    Corrupt { sender_id: String, reason: String },
}

/// Open (creating if needed) the SQLite database at `db_path`
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Create parent directories if they don't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Single-connection in-memory database for tests
pub async fn open_in_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

/// Store for conversation state
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                sender_id TEXT PRIMARY KEY,
                stage TEXT NOT NULL,
                is_ready INTEGER NOT NULL DEFAULT 0,
                tracked_products TEXT NOT NULL DEFAULT '[]',
                prices_disclosed TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                sender_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (sender_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a sender's state, `None` if they never wrote in
    pub async fn load(&self, sender_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let row: Option<(String, bool, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT stage, is_ready, tracked_products, prices_disclosed, created_at, updated_at
            FROM conversations
            WHERE sender_id = ?
            "#,
        )
        .bind(sender_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((stage, is_ready, tracked, disclosed, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            sender_id: sender_id.to_string(),
            reason,
        };

        let tracked_products: Vec<ProductRef> =
            serde_json::from_str(&tracked).map_err(|e| corrupt(e.to_string()))?;
        let prices_disclosed: BTreeSet<String> =
            serde_json::from_str(&disclosed).map_err(|e| corrupt(e.to_string()))?;
        let stage = SalesStage::parse(&stage).ok_or_else(|| corrupt(format!("unknown stage {}", stage)))?;

        Ok(Some(ConversationState {
            sender_id: sender_id.to_string(),
            message_history: self.messages(sender_id).await?,
            tracker: InterestTracker {
                tracked_products,
                prices_disclosed,
            },
            stage,
            is_ready,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    /// All messages for a sender, oldest first
    pub async fn messages(&self, sender_id: &str) -> Result<Vec<Message>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT role, content, created_at
            FROM messages
            WHERE sender_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(role, content, created_at)| Message {
                role: Role::parse(&role),
                content,
                timestamp: parse_timestamp(&created_at),
            })
            .collect())
    }

    /// Upsert the state and append any messages not stored yet
    pub async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let tracked = serde_json::to_string(&state.tracker.tracked_products).map_err(|e| StoreError::Corrupt {
            sender_id: state.sender_id.clone(),
            reason: e.to_string(),
        })?;
        let disclosed = serde_json::to_string(&state.tracker.prices_disclosed).map_err(|e| StoreError::Corrupt {
            sender_id: state.sender_id.clone(),
            reason: e.to_string(),
        })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (sender_id, stage, is_ready, tracked_products, prices_disclosed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sender_id) DO UPDATE SET
                stage = excluded.stage,
                is_ready = excluded.is_ready,
                tracked_products = excluded.tracked_products,
                prices_disclosed = excluded.prices_disclosed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.sender_id)
        .bind(state.stage.as_str())
        .bind(state.is_ready)
        .bind(tracked)
        .bind(disclosed)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (seq, message) in state.message_history.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages (sender_id, seq, role, content, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&state.sender_id)
            .bind(seq as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a sender's state and history in one transaction.
    /// Returns whether anything existed.
    pub async fn clear(&self, sender_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let messages = sqlx::query("DELETE FROM messages WHERE sender_id = ?")
            .bind(sender_id)
            .execute(&mut *tx)
            .await?;

        let conversations = sqlx::query("DELETE FROM conversations WHERE sender_id = ?")
            .bind(sender_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(messages.rows_affected() + conversations.rows_affected() > 0)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
