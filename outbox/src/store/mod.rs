pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Position of a message within its topic.
///
/// Ordered by the id of the transaction that wrote the message first, then
/// by insertion position, which is the order consumers must read in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub transaction_id: i64,
    pub position: i64,
}

/// A message handed to a consumer group, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub cursor: Cursor,
    /// Where the group's cursor stood when the message was read.
    pub acked: Cursor,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Durably appends `messages`, in order.
    async fn append(&self, messages: &[Message]) -> Result<(), StoreError>;

    /// Returns the first message on `topic` past the group's acked cursor.
    async fn fetch(
        &self,
        consumer_group: &str,
        topic: &str,
    ) -> Result<Option<Delivery>, StoreError>;

    /// Moves the group's cursor to `delivery.cursor` if it still stands at
    /// `delivery.acked`. Returns whether the cursor moved.
    async fn ack(&self, consumer_group: &str, delivery: &Delivery) -> Result<bool, StoreError>;
}
