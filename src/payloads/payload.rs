//! # Payload: one named unit of work.
//!
//! [`Payload`] wraps a closure that *creates* the work when a backend starts it.
//! Every body receives a [`CancellationToken`] that is cancelled when its
//! backend closes:
//! - cooperative bodies should return promptly once it fires (they are aborted
//!   after the grace period otherwise);
//! - blocking bodies may poll it, nothing else will interrupt them.
//!
//! ## Return contract
//! A fire-and-forget payload must finish with `Ok(None)`. `Ok(Some(value))` has
//! nobody to receive it and is reported as
//! [`OrphanedReturn`](crate::OrphanedReturn); `Err(..)` is a payload failure.
//! [`Payload::task`] and [`Payload::blocking`] can only produce `None`.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use runvisor::{Flavour, Payload};
//!
//! let tick = Payload::task("tick", |ctx: CancellationToken| async move {
//!     ctx.cancelled().await;
//!     Ok(())
//! });
//! assert_eq!(tick.name(), "tick");
//! assert!(Flavour::Native.accepts(tick.kind()));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::payloads::{PayloadKind, Value};

/// Output of a payload body: an optional value, or the payload's own error.
pub type PayloadResult = anyhow::Result<Option<Value>>;

/// Boxed future produced by a cooperative body.
pub(crate) type BoxPayloadFuture = BoxFuture<'static, PayloadResult>;

/// Factory of the future run by a cooperative backend.
pub(crate) type CooperativeBody = Box<dyn FnOnce(CancellationToken) -> BoxPayloadFuture + Send>;

/// Body of a payload, split by execution model.
pub(crate) enum Body {
    Cooperative(CooperativeBody),
    Blocking(Box<dyn FnOnce(CancellationToken) -> PayloadResult + Send>),
}

/// Named unit of work for a backend.
pub struct Payload {
    name: Cow<'static, str>,
    body: Body,
}

impl Payload {
    /// Async payload that completes without a value.
    pub fn task<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::returning(name, move |ctx| async move { f(ctx).await.map(|()| None) })
    }

    /// Async payload whose body decides whether it yields a value.
    pub fn returning<F, Fut>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = PayloadResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Body::Cooperative(Box::new(move |ctx| Box::pin(f(ctx)))),
        }
    }

    /// Blocking payload that completes without a value.
    pub fn blocking<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> anyhow::Result<()> + Send + 'static,
    {
        Self::blocking_returning(name, move |ctx| f(ctx).map(|()| None))
    }

    /// Blocking payload whose body decides whether it yields a value.
    pub fn blocking_returning<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> PayloadResult + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Body::Blocking(Box::new(f)),
        }
    }

    /// Name used in logs and failure reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution model of the body.
    pub fn kind(&self) -> PayloadKind {
        match self.body {
            Body::Cooperative(_) => PayloadKind::Cooperative,
            Body::Blocking(_) => PayloadKind::Blocking,
        }
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, Body) {
        (self.name, self.body)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_the_kind() {
        let a = Payload::task("a", |_ctx| async { Ok(()) });
        let b = Payload::blocking("b", |_ctx| Ok(()));
        assert_eq!(a.kind(), PayloadKind::Cooperative);
        assert_eq!(b.kind(), PayloadKind::Blocking);
        assert_eq!(format!("{b:?}"), r#"Payload { name: "b", kind: Blocking }"#);
    }

    #[test]
    fn blocking_body_sees_the_token() {
        let payload = Payload::blocking_returning("peek", |ctx| {
            Ok(Some(Value::new(ctx.is_cancelled())))
        });
        let token = CancellationToken::new();
        token.cancel();
        let (_, body) = payload.into_parts();
        let Body::Blocking(f) = body else {
            panic!("expected a blocking body");
        };
        let out = f(token).unwrap().unwrap();
        assert!(out.downcast::<bool>().unwrap());
    }

    #[tokio::test]
    async fn task_body_yields_no_value() {
        let (_, body) = Payload::task("t", |_ctx| async { Ok(()) }).into_parts();
        let Body::Cooperative(f) = body else {
            panic!("expected a cooperative body");
        };
        assert!(f(CancellationToken::new()).await.unwrap().is_none());
    }
}
