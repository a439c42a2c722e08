//! # Typed blocking calls.
//!
//! [`Call<T>`] is the submission type of
//! [`ServiceRunner::execute`](crate::ServiceRunner::execute): the body's output
//! is carried back to the blocked caller as a `T`, and its error is handed back
//! unchanged.

use std::borrow::Cow;
use std::future::Future;
use std::marker::PhantomData;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use crate::payloads::{Payload, Value};

/// Payload whose result is relayed to the caller.
pub struct Call<T> {
    payload: Payload,
    _out: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Call<T> {
    /// Async call, for the cooperative flavours.
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            payload: Payload::returning(name, move |ctx| async move {
                f(ctx).await.map(|out| Some(Value::opaque(out)))
            }),
            _out: PhantomData,
        }
    }

    /// Blocking call, for [`Flavour::Thread`](crate::Flavour::Thread).
    pub fn blocking<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            payload: Payload::blocking_returning(name, move |ctx| {
                f(ctx).map(|out| Some(Value::opaque(out)))
            }),
            _out: PhantomData,
        }
    }

    /// Name of the underlying payload.
    pub fn name(&self) -> &str {
        self.payload.name()
    }

    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }

    /// Converts the raw body output back into `T`.
    pub(crate) fn finish(out: Option<Value>) -> anyhow::Result<T> {
        match out {
            Some(value) => value
                .downcast::<T>()
                .map_err(|value| anyhow!("call produced unexpected value {value}")),
            None => Err(anyhow!("call completed without a value")),
        }
    }
}
