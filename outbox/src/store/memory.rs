use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Cursor, Delivery, MessageStore, StoreError};
use crate::message::Message;

/// Process-local store with the same delivery contract as the PostgreSQL
/// one. Every append is its own transaction.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<Message>,
    offsets: HashMap<(String, String), Cursor>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every message appended so far, in order.
    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn messages_on(&self, topic: &str) -> Vec<Message> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn acked(&self, consumer_group: &str, topic: &str) -> Cursor {
        self.state()
            .offsets
            .get(&(consumer_group.to_owned(), topic.to_owned()))
            .copied()
            .unwrap_or_default()
    }
}

fn cursor_at(index: usize) -> Cursor {
    let position = i64::try_from(index).unwrap_or(i64::MAX).saturating_add(1);
    Cursor {
        transaction_id: position,
        position,
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, messages: &[Message]) -> Result<(), StoreError> {
        self.state().messages.extend_from_slice(messages);
        Ok(())
    }

    async fn fetch(
        &self,
        consumer_group: &str,
        topic: &str,
    ) -> Result<Option<Delivery>, StoreError> {
        let state = self.state();
        let acked = state
            .offsets
            .get(&(consumer_group.to_owned(), topic.to_owned()))
            .copied()
            .unwrap_or_default();

        let delivery = state
            .messages
            .iter()
            .enumerate()
            .map(|(index, message)| (cursor_at(index), message))
            .find(|(cursor, message)| message.topic == topic && *cursor > acked)
            .map(|(cursor, message)| Delivery {
                message: message.clone(),
                cursor,
                acked,
            });
        Ok(delivery)
    }

    async fn ack(&self, consumer_group: &str, delivery: &Delivery) -> Result<bool, StoreError> {
        let mut state = self.state();
        let key = (consumer_group.to_owned(), delivery.message.topic.clone());
        let current = state.offsets.get(&key).copied().unwrap_or_default();
        if current != delivery.acked {
            return Ok(false);
        }
        state.offsets.insert(key, delivery.cursor);
        Ok(true)
    }
}
