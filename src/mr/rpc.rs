//! Wire types and service stubs generated from `proto/mr.proto`.
#![allow(clippy::all)]

include!("../../proto/mr.rs");
