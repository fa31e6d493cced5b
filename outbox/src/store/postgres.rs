use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{Cursor, Delivery, MessageStore, StoreError};
use crate::message::{Message, Metadata};

#[derive(Debug, sqlx::FromRow)]
struct DbMessage {
    position: i64,
    transaction_id: i64,
    uuid: Uuid,
    topic: String,
    payload: Vec<u8>,
    metadata: Json<Metadata>,
}

impl DbMessage {
    fn into_delivery(self, acked: Cursor) -> Delivery {
        Delivery {
            cursor: Cursor {
                transaction_id: self.transaction_id,
                position: self.position,
            },
            acked,
            message: Message {
                uuid: self.uuid,
                topic: self.topic,
                payload: self.payload,
                metadata: self.metadata.0,
            },
        }
    }
}

/// Message store on the `outbox_messages` / `outbox_offsets` tables.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends `messages` on an open connection, typically inside the
    /// transaction that writes the business row they describe.
    pub async fn append_in(
        conn: &mut PgConnection,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        for message in messages {
            sqlx::query(
                "INSERT INTO outbox_messages (uuid, topic, payload, metadata) VALUES ($1, $2, $3, $4)",
            )
            .bind(message.uuid)
            .bind(&message.topic)
            .bind(&message.payload)
            .bind(Json(&message.metadata))
            .execute(&mut *conn)
            .await?;

            debug!(
                uuid = %message.uuid,
                topic = %message.topic,
                "message staged in outbox"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, messages: &[Message]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::append_in(&mut *tx, messages).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch(
        &self,
        consumer_group: &str,
        topic: &str,
    ) -> Result<Option<Delivery>, StoreError> {
        let acked = sqlx::query_as::<_, (i64, i64)>(
            "SELECT acked_transaction_id, acked_position FROM outbox_offsets
             WHERE consumer_group = $1 AND topic = $2",
        )
        .bind(consumer_group)
        .bind(topic)
        .fetch_optional(&self.pool)
        .await?
        .map(|(transaction_id, position)| Cursor {
            transaction_id,
            position,
        })
        .unwrap_or_default();

        // Rows written by transactions still in flight are invisible now but
        // may later appear behind rows we already acked. Only read below the
        // snapshot xmin so the cursor never passes them.
        let row = sqlx::query_as::<_, DbMessage>(
            "SELECT position, transaction_id::text::bigint AS transaction_id,
                    uuid, topic, payload, metadata
             FROM outbox_messages
             WHERE topic = $1
               AND (transaction_id::text::bigint, position) > ($2, $3)
               AND transaction_id < pg_snapshot_xmin(pg_current_snapshot())
             ORDER BY transaction_id, position
             LIMIT 1",
        )
        .bind(topic)
        .bind(acked.transaction_id)
        .bind(acked.position)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.into_delivery(acked)))
    }

    async fn ack(&self, consumer_group: &str, delivery: &Delivery) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO outbox_offsets (consumer_group, topic, acked_transaction_id, acked_position)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (consumer_group, topic) DO UPDATE
             SET acked_transaction_id = EXCLUDED.acked_transaction_id,
                 acked_position = EXCLUDED.acked_position,
                 updated_at = now()
             WHERE outbox_offsets.acked_transaction_id = $5
               AND outbox_offsets.acked_position = $6",
        )
        .bind(consumer_group)
        .bind(&delivery.message.topic)
        .bind(delivery.cursor.transaction_id)
        .bind(delivery.cursor.position)
        .bind(delivery.acked.transaction_id)
        .bind(delivery.acked.position)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
