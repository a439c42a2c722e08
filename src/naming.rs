//! # Readable names for types and panic payloads.
//!
//! Log lines and failure reports refer to services and payloads by name. When
//! the caller does not provide one, the name is derived from the Rust type in
//! `module::path:Type` form, so `my_app::pools::Drain` renders as
//! `my_app::pools:Drain`.

use std::any::{Any, type_name};

/// Returns the `module::path:Type` name of `T`.
///
/// Generic arguments are kept verbatim; only the outermost path separator
/// before the type name is replaced.
pub fn pretty_type<T: ?Sized>() -> String {
    pretty_path(type_name::<T>())
}

/// Formats a fully qualified path as `module::path:Item`.
pub fn pretty_path(path: &str) -> String {
    // Split before any generics so `a::B<c::D>` becomes `a:B<c::D>`.
    let head_end = path.find('<').unwrap_or(path.len());
    match path[..head_end].rfind("::") {
        Some(idx) => format!("{}:{}", &path[..idx], &path[idx + 2..]),
        None => path.to_string(),
    }
}

/// Extracts a human-readable message from a caught panic.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
