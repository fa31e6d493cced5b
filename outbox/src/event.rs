use proto::event::{
    ProductCreatedEvent, ProductDeletedEvent, ProductPriceChangedEvent, ProductUpdatedEvent,
    UserCreatedEvent, UserDeletedEvent, UserUpdatedEvent,
};

pub mod topics {
    pub const USER_CREATED: &str = "user.created";
    pub const USER_UPDATED: &str = "user.updated";
    pub const USER_DELETED: &str = "user.deleted";

    pub const PRODUCT_CREATED: &str = "product.created";
    pub const PRODUCT_UPDATED: &str = "product.updated";
    pub const PRODUCT_DELETED: &str = "product.deleted";
    pub const PRODUCT_PRICE_CHANGED: &str = "product.price.changed";

    pub const ALL: [&str; 7] = [
        USER_CREATED,
        USER_UPDATED,
        USER_DELETED,
        PRODUCT_CREATED,
        PRODUCT_UPDATED,
        PRODUCT_DELETED,
        PRODUCT_PRICE_CHANGED,
    ];
}

/// A protobuf message that travels through the outbox.
///
/// `NAME` is stored in the message metadata and checked on decode, `TOPIC`
/// is where the message is appended.
pub trait Event: prost::Message + Default + 'static {
    const NAME: &'static str;
    const TOPIC: &'static str;

    fn event_id(&self) -> &str;
}

macro_rules! impl_event {
    ($ty:ident, $topic:expr) => {
        impl Event for $ty {
            const NAME: &'static str = stringify!($ty);
            const TOPIC: &'static str = $topic;

            fn event_id(&self) -> &str {
                &self.event_id
            }
        }
    };
}

impl_event!(UserCreatedEvent, topics::USER_CREATED);
impl_event!(UserUpdatedEvent, topics::USER_UPDATED);
impl_event!(UserDeletedEvent, topics::USER_DELETED);
impl_event!(ProductCreatedEvent, topics::PRODUCT_CREATED);
impl_event!(ProductUpdatedEvent, topics::PRODUCT_UPDATED);
impl_event!(ProductDeletedEvent, topics::PRODUCT_DELETED);
impl_event!(ProductPriceChangedEvent, topics::PRODUCT_PRICE_CHANGED);
