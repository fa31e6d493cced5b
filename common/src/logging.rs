use http::{HeaderMap, Request, Response};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{error, info, warn};

use crate::correlation::CORRELATION_HEADER;

/// Logs every gRPC call with its path, outcome and duration.
#[derive(Clone, Copy, Default)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        LoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for LoggingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let path = req.uri().path().to_owned();
        let correlation_id = header(req.headers(), CORRELATION_HEADER).unwrap_or("-").to_owned();

        info!(
            path = %path,
            correlation_id = %correlation_id,
            "gRPC request started"
        );

        let future = self.inner.call(req);

        ResponseFuture {
            future,
            start,
            path,
            correlation_id,
        }
    }
}

#[pin_project]
pub struct ResponseFuture<F> {
    #[pin]
    future: F,
    start: Instant,
    path: String,
    correlation_id: String,
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.future.poll(cx) {
            Poll::Ready(result) => {
                let duration = this.start.elapsed();

                match &result {
                    Ok(response) => {
                        // Errors are sent trailers-only, so grpc-status shows up
                        // in the headers. Successful calls carry it in trailers.
                        let grpc_status = header(response.headers(), "grpc-status").unwrap_or("0");
                        if grpc_status == "0" {
                            info!(
                                path = %this.path,
                                correlation_id = %this.correlation_id,
                                grpc_status = %grpc_status,
                                duration_ms = %duration.as_millis(),
                                "gRPC request completed"
                            );
                        } else {
                            warn!(
                                path = %this.path,
                                correlation_id = %this.correlation_id,
                                grpc_status = %grpc_status,
                                grpc_message = %header(response.headers(), "grpc-message").unwrap_or(""),
                                duration_ms = %duration.as_millis(),
                                "gRPC request returned error"
                            );
                        }
                    }
                    Err(_) => {
                        error!(
                            path = %this.path,
                            correlation_id = %this.correlation_id,
                            duration_ms = %duration.as_millis(),
                            "gRPC request failed"
                        );
                    }
                }

                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
