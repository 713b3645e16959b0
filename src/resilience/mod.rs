//! Resilience layers
//!
//! Exports
//! - `TimeoutLayer(Option<Duration>)` bounding each call of the wrapped service
//! - `Elapsed`: the error a timed-out call resolves to
//!
//! The response loop wraps the tool router in this layer so a stuck tool
//! resolves to `output-error` instead of holding the stream open. `None`
//! disables the bound.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tower::{BoxError, Layer, Service};

/// A call did not complete within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out after {}ms", .after.as_millis())]
pub struct Elapsed {
    pub after: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    dur: Option<Duration>,
}

impl TimeoutLayer {
    pub fn new(dur: Option<Duration>) -> Self {
        Self { dur }
    }
}

#[derive(Debug, Clone)]
pub struct Timeout<S> {
    inner: S,
    dur: Option<Duration>,
}

impl<S> Timeout<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            dur: self.dur,
        }
    }
}

impl<S, Req> Service<Req> for Timeout<S>
where
    S: Service<Req, Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req);
        let dur = self.dur;
        Box::pin(async move {
            let Some(dur) = dur else {
                return fut.await;
            };
            match timeout(dur, fut).await {
                Ok(r) => r,
                Err(_) => Err::<S::Response, BoxError>(Box::new(Elapsed { after: dur })),
            }
        })
    }
}
