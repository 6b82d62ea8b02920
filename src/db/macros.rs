//! Backend dispatch macros for reducing code duplication.
//!
//! Every configured backend wraps a `Connector` over a different driver type,
//! so most operations on [`Backend`](crate::db::Backend) are the same call
//! on each variant. The macro expands to the match at compile time.

/// Macro for generating backend dispatch match arms.
///
/// Binds the variant's connector to `$c` and evaluates `$body` for it.
///
/// # Example
///
/// ```ignore
/// impl_backend_dispatch!(self, c => c.execute(sql).await)
/// ```
#[macro_export]
macro_rules! impl_backend_dispatch {
    ($backend:expr, $c:ident => $body:expr) => {
        match $backend {
            $crate::db::Backend::Postgres($c) => $body,
            $crate::db::Backend::Warehouse($c) => $body,
        }
    };
}

pub use impl_backend_dispatch;
