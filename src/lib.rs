//! Portal Limiter - sliding-window request admission
//!
//! This crate decides, per client identifier, whether a request to the
//! customer portal or the general API may proceed under a sliding-window
//! quota. Counters live in a shared window store; when that store is missing
//! or failing the limiter fails open rather than taking the product down.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
