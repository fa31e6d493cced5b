use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::message::{DecodeError, Message};
use crate::middleware::{DeduplicatorLayer, HandlerLogLayer, RecovererLayer};
use crate::retry::{RetryConfig, RetryLayer};
use crate::store::{MessageStore, StoreError};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded; retrying cannot help.
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),
    /// The handler refused the event; retrying cannot help.
    #[error("event rejected: {0}")]
    Rejected(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(Box<dyn StdError + Send + Sync>),
}

impl HandlerError {
    pub fn failed(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(err.into())
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_))
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("handler {0} registered twice")]
    DuplicateHandler(String),
    #[error("router has no handlers")]
    NoHandlers,
    #[error("consumer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Business side effect for one event type.
///
/// Delivery is at-least-once, so implementations must tolerate seeing the
/// same event more than once.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: E, message: &Message) -> Result<(), HandlerError>;
}

/// Decodes the payload and calls the typed handler.
struct Dispatch<E, H> {
    handler: Arc<H>,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> Clone for Dispatch<E, H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            _event: PhantomData,
        }
    }
}

impl<E, H> Service<Message> for Dispatch<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    type Response = ();
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<(), HandlerError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let handler = self.handler.clone();
        Box::pin(async move {
            let event = message.decode::<E>()?;
            handler.handle(event, &message).await
        })
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Sleep between polls when a topic is drained or a handler failed.
    pub poll_interval: Duration,
    /// Consumer groups are named `{group_prefix}.{handler_name}`.
    pub group_prefix: String,
    pub retry: RetryConfig,
    pub dedup_ttl: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            group_prefix: "consumer".to_string(),
            retry: RetryConfig::default(),
            dedup_ttl: Duration::from_secs(10 * 60),
        }
    }
}

struct Route {
    name: String,
    group: String,
    topic: &'static str,
    service: BoxCloneService<Message, (), HandlerError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Idle,
    Handled,
    Dropped,
    Failed,
}

/// Dispatches stored messages to typed handlers, one consumer group per
/// handler.
pub struct Router {
    store: Arc<dyn MessageStore>,
    config: RouterConfig,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(store: Arc<dyn MessageStore>, config: RouterConfig) -> Self {
        Self {
            store,
            config,
            routes: Vec::new(),
        }
    }

    /// Subscribes `handler` to `E::TOPIC` under its own consumer group.
    pub fn add_handler<E, H>(&mut self, name: &str, handler: Arc<H>) -> Result<&mut Self, RouterError>
    where
        E: Event,
        H: EventHandler<E>,
    {
        if self.routes.iter().any(|route| route.name == name) {
            return Err(RouterError::DuplicateHandler(name.to_owned()));
        }

        let service = ServiceBuilder::new()
            .layer(HandlerLogLayer::new(name))
            .layer(DeduplicatorLayer::new(self.config.dedup_ttl))
            .layer(RetryLayer::new(self.config.retry.clone()))
            .layer(RecovererLayer)
            .service(Dispatch::<E, H> {
                handler,
                _event: PhantomData,
            });

        self.routes.push(Route {
            name: name.to_owned(),
            group: format!("{}.{}", self.config.group_prefix, name),
            topic: E::TOPIC,
            service: BoxCloneService::new(service),
        });
        Ok(self)
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.name.as_str())
    }

    /// Consumes until `shutdown` is cancelled. Each handler runs on its own
    /// task; a message being handled when shutdown fires is finished first.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RouterError> {
        if self.routes.is_empty() {
            return Err(RouterError::NoHandlers);
        }

        let mut tasks = JoinSet::new();
        for route in self.routes {
            info!(
                handler = %route.name,
                topic = %route.topic,
                group = %route.group,
                "subscribing handler"
            );
            tasks.spawn(consume(
                self.store.clone(),
                route,
                self.config.poll_interval,
                shutdown.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            joined?;
        }
        info!("router stopped");
        Ok(())
    }
}

async fn consume(
    store: Arc<dyn MessageStore>,
    mut route: Route,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let outcome = match poll_once(store.as_ref(), &mut route).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(handler = %route.name, error = %err, "polling message store failed");
                PollOutcome::Failed
            }
        };

        if matches!(outcome, PollOutcome::Handled | PollOutcome::Dropped) {
            continue;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!(handler = %route.name, "consumer stopped");
}

async fn poll_once(store: &dyn MessageStore, route: &mut Route) -> Result<PollOutcome, StoreError> {
    let Some(delivery) = store.fetch(&route.group, route.topic).await? else {
        return Ok(PollOutcome::Idle);
    };

    let result = match route.service.ready().await {
        Ok(service) => service.call(delivery.message.clone()).await,
        Err(err) => Err(err),
    };

    let outcome = match result {
        Ok(()) => PollOutcome::Handled,
        Err(err) if !err.is_retryable() => {
            error!(
                handler = %route.name,
                uuid = %delivery.message.uuid,
                error = %err,
                "dropping message that cannot be handled"
            );
            PollOutcome::Dropped
        }
        Err(err) => {
            warn!(
                handler = %route.name,
                uuid = %delivery.message.uuid,
                error = %err,
                "message left for redelivery"
            );
            return Ok(PollOutcome::Failed);
        }
    };

    if !store.ack(&route.group, &delivery).await? {
        debug!(
            handler = %route.name,
            uuid = %delivery.message.uuid,
            "cursor already moved by another consumer"
        );
    }
    Ok(outcome)
}
