use {
    serde::{Deserialize, Serialize},
    sqlx::MySqlPool,
};

use crate::Result;

/// One queued durable write, serialised as JSON on `msg_persist_queue`.
/// `redis_id` is the cache-assigned message id; re-delivery after a failed
/// commit can duplicate it, so it is stored alongside rather than as a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    pub redis_id: String,
    pub room_id: String,
    pub user_id: i64,
    pub content: String,
    pub timestamp: i64,
}

/// A message row read back from the durable store.
#[derive(Debug, Clone)]
pub struct DurableMessage {
    pub redis_id: String,
    pub room_id: String,
    pub user_id: i64,
    pub content: String,
    pub timestamp: i64,
}

/// Message table repository.
#[derive(Clone)]
pub struct MessageRepo {
    pool: MySqlPool,
}

impl MessageRepo {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                redis_id VARCHAR(64) NOT NULL,
                room_id VARCHAR(64) NOT NULL,
                user_id BIGINT NOT NULL,
                content TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                INDEX idx_room_ts (room_id, timestamp DESC)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a batch as one multi-row statement. Queue order is append
    /// order, so rows of the same room land in stream-id order.
    pub async fn insert_batch(&self, records: &[PendingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut qb = batch_insert_builder(records);
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Newest-first page for the history fallback.
    pub async fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<DurableMessage>> {
        let rows: Vec<(String, i64, String, i64)> = sqlx::query_as(
            "SELECT redis_id, user_id, content, timestamp
             FROM messages WHERE room_id = ?
             ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(room_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(redis_id, user_id, content, timestamp)| DurableMessage {
                redis_id,
                room_id: room_id.to_string(),
                user_id,
                content,
                timestamp,
            })
            .collect())
    }
}

fn batch_insert_builder(
    records: &[PendingRecord],
) -> sqlx::QueryBuilder<'_, sqlx::MySql> {
    let mut qb = sqlx::QueryBuilder::new(
        "INSERT INTO messages (redis_id, room_id, user_id, content, timestamp) ",
    );
    qb.push_values(records, |mut row, record| {
        row.push_bind(&record.redis_id)
            .push_bind(&record.room_id)
            .push_bind(record.user_id)
            .push_bind(&record.content)
            .push_bind(record.timestamp);
    });
    qb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(redis_id: &str) -> PendingRecord {
        PendingRecord {
            redis_id: redis_id.into(),
            room_id: "0001".into(),
            user_id: 7,
            content: "hi".into(),
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn pending_record_round_trips_as_queue_json() {
        let rec = record("1700000000000-0");
        let json = serde_json::to_string(&rec).unwrap();
        let back: PendingRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.redis_id, "1700000000000-0");
        assert_eq!(back.user_id, 7);
        assert_eq!(back.timestamp, 1_700_000_000);
    }

    #[test]
    fn batch_insert_is_one_multi_row_statement() {
        let records = vec![record("a-0"), record("a-1"), record("a-2")];
        let sql = batch_insert_builder(&records).into_sql();
        assert!(sql.starts_with("INSERT INTO messages"));
        // One VALUES clause with three parenthesised rows.
        assert_eq!(sql.matches('(').count(), 4); // column list + 3 rows
        assert_eq!(sql.matches("VALUES").count(), 1);
    }
}
