use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use pin_project::pin_project;
use tower::{Layer, Service};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::router::HandlerError;

/// Logs every handled message with its outcome and duration.
#[derive(Clone)]
pub struct HandlerLogLayer {
    handler: Arc<str>,
}

impl HandlerLogLayer {
    pub fn new(handler: &str) -> Self {
        Self {
            handler: Arc::from(handler),
        }
    }
}

impl<S> Layer<S> for HandlerLogLayer {
    type Service = HandlerLog<S>;

    fn layer(&self, service: S) -> Self::Service {
        HandlerLog {
            inner: service,
            handler: self.handler.clone(),
        }
    }
}

#[derive(Clone)]
pub struct HandlerLog<S> {
    inner: S,
    handler: Arc<str>,
}

impl<S> Service<Message> for HandlerLog<S>
where
    S: Service<Message, Response = (), Error = HandlerError>,
{
    type Response = ();
    type Error = HandlerError;
    type Future = LogFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let uuid = message.uuid;
        let event = message.event_name().unwrap_or("unknown").to_owned();
        let future = self.inner.call(message);

        LogFuture {
            future,
            start: Instant::now(),
            handler: self.handler.clone(),
            uuid,
            event,
        }
    }
}

#[pin_project]
pub struct LogFuture<F> {
    #[pin]
    future: F,
    start: Instant,
    handler: Arc<str>,
    uuid: Uuid,
    event: String,
}

impl<F> Future for LogFuture<F>
where
    F: Future<Output = Result<(), HandlerError>>,
{
    type Output = Result<(), HandlerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.future.poll(cx) {
            Poll::Ready(result) => {
                let duration = this.start.elapsed();
                match &result {
                    Ok(()) => info!(
                        handler = %this.handler,
                        event = %this.event,
                        uuid = %this.uuid,
                        duration_ms = %duration.as_millis(),
                        "event handled"
                    ),
                    Err(err) => warn!(
                        handler = %this.handler,
                        event = %this.event,
                        uuid = %this.uuid,
                        duration_ms = %duration.as_millis(),
                        error = %err,
                        "event handling failed"
                    ),
                }
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Turns a panicking handler into [`HandlerError::Panicked`].
#[derive(Clone, Copy, Default)]
pub struct RecovererLayer;

impl<S> Layer<S> for RecovererLayer {
    type Service = Recoverer<S>;

    fn layer(&self, service: S) -> Self::Service {
        Recoverer { inner: service }
    }
}

#[derive(Clone)]
pub struct Recoverer<S> {
    inner: S,
}

impl<S> Service<Message> for Recoverer<S>
where
    S: Service<Message, Response = (), Error = HandlerError>,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<(), HandlerError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let future = self.inner.call(message);
        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Expired entries are swept once per this many recorded messages.
const PRUNE_EVERY: usize = 256;

#[derive(Default)]
struct SeenSet {
    handled: DashMap<Uuid, Instant>,
    recorded: AtomicUsize,
}

impl SeenSet {
    fn contains(&self, uuid: &Uuid, now: Instant, ttl: Duration) -> bool {
        self.handled
            .get(uuid)
            .is_some_and(|handled_at| now.duration_since(*handled_at) < ttl)
    }

    fn record(&self, uuid: Uuid, ttl: Duration) {
        let now = Instant::now();
        if self.recorded.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.handled
                .retain(|_, handled_at| now.duration_since(*handled_at) < ttl);
        }
        self.handled.insert(uuid, now);
    }
}

/// Skips messages whose uuid was already handled successfully within `ttl`.
///
/// This only absorbs redeliveries seen by this process; handlers still have
/// to be idempotent across restarts.
#[derive(Clone)]
pub struct DeduplicatorLayer {
    seen: Arc<SeenSet>,
    ttl: Duration,
}

impl DeduplicatorLayer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Arc::new(SeenSet::default()),
            ttl,
        }
    }
}

impl<S> Layer<S> for DeduplicatorLayer {
    type Service = Deduplicator<S>;

    fn layer(&self, service: S) -> Self::Service {
        Deduplicator {
            inner: service,
            seen: self.seen.clone(),
            ttl: self.ttl,
        }
    }
}

#[derive(Clone)]
pub struct Deduplicator<S> {
    inner: S,
    seen: Arc<SeenSet>,
    ttl: Duration,
}

impl<S> Service<Message> for Deduplicator<S>
where
    S: Service<Message, Response = (), Error = HandlerError>,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<(), HandlerError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let ttl = self.ttl;
        let uuid = message.uuid;

        if self.seen.contains(&uuid, Instant::now(), ttl) {
            debug!(uuid = %uuid, "duplicate message skipped");
            return Box::pin(async { Ok(()) });
        }

        let seen = self.seen.clone();
        let future = self.inner.call(message);
        Box::pin(async move {
            future.await?;
            seen.record(uuid, ttl);
            Ok(())
        })
    }
}
