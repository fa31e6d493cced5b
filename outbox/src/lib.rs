//! Event pipeline backed by the service database.
//!
//! Writers append [`Message`]s to the `outbox_messages` table inside the same
//! transaction as the business row. A [`Router`] polls each topic per
//! consumer group, decodes the protobuf payload into the registered [`Event`]
//! type and hands it to an [`EventHandler`]. Delivery is at-least-once: a
//! message is acknowledged only after its handler succeeds.

pub mod event;
pub mod message;
pub mod middleware;
pub mod retry;
pub mod router;
pub mod store;

pub use event::{Event, topics};
pub use message::{DecodeError, Message, Metadata};
pub use retry::{RetryConfig, RetryOverrides, RetryPreset};
pub use router::{EventHandler, HandlerError, Router, RouterConfig, RouterError};
pub use store::{Cursor, Delivery, MessageStore, StoreError};
pub use store::memory::MemoryMessageStore;
pub use store::postgres::PgMessageStore;
