//! Crate-internal error type.
//!
//! None of this crosses the public API boundary: every user-callable
//! function swallows these and returns `()`, matching OSEK's silent-ignore
//! error model. It exists purely so the lookup helpers inside this crate can
//! use `?` instead of a nested `if let Some(..) = .. else { return }` at
//! every call site.

/// An object id named by a caller doesn't refer to a live object of the
/// expected kind, or the object's state doesn't permit the requested
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BadId;

pub(crate) type Result<T> = core::result::Result<T, BadId>;
