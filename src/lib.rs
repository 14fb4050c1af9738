//! A fault-tolerant two-phase (map, then reduce) job engine.
//!
//! A single coordinator hands out jobs to independent worker processes over
//! a UNIX-domain gRPC socket. Workers poll for work, run the user's map or
//! reduce function, leave their results in a shared working directory and
//! report back. Jobs whose worker goes quiet are handed out again, so every
//! job runs at least once.

/// Builds a [`mr::app::KeyValue`] from anything string-like.
#[macro_export]
macro_rules! new_kv {
    ($key:expr, $value:expr) => {
        $crate::mr::app::KeyValue::new($key, $value)
    };
}

pub mod mr;
pub mod mrapps;
pub mod util;
