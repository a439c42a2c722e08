//! # Type-erased payload output.

use std::any::{Any, type_name};
use std::fmt;

/// Value produced by a payload body.
///
/// Keeps a rendering of the value so that an orphaned return can still be
/// reported after the value itself has been moved into an error.
pub struct Value {
    inner: Box<dyn Any + Send + Sync>,
    repr: String,
}

impl Value {
    /// Wraps `value`, rendering it with its `Debug` representation.
    pub fn new<T: Any + Send + Sync + fmt::Debug>(value: T) -> Self {
        let repr = format!("{value:?}");
        Self {
            inner: Box::new(value),
            repr,
        }
    }

    /// Wraps a value that has no `Debug` representation; renders as `<type>`.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            repr: format!("<{}>", type_name::<T>()),
        }
    }

    /// Rendering captured at construction.
    pub fn repr(&self) -> &str {
        &self.repr
    }

    /// Returns true if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Recovers the wrapped value, or gives `self` back on type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Value> {
        let Value { inner, repr } = self;
        match inner.downcast::<T>() {
            Ok(v) => Ok(*v),
            Err(inner) => Err(Value { inner, repr }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_returns_the_value() {
        let v = Value::new(42_u32);
        assert_eq!(v.repr(), "42");
        assert!(v.is::<u32>());
        assert_eq!(v.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn mismatched_downcast_keeps_the_value() {
        let v = Value::new("demand");
        let v = v.downcast::<u32>().unwrap_err();
        assert_eq!(v.to_string(), "\"demand\"");
        assert_eq!(v.downcast::<&str>().unwrap(), "demand");
    }

    #[test]
    fn opaque_values_render_their_type() {
        struct Secret;
        let v = Value::opaque(Secret);
        assert!(v.repr().starts_with('<') && v.repr().ends_with("Secret>"));
    }
}
