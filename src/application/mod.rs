//! Application layer: order catalog, request building, response handling and
//! the transaction engine that drives the round trips.
//!
//! `EbicsClient` is the entry point for callers; everything below it works on
//! a per-order `RequestContext`.

pub mod builder;
pub mod catalog;
pub mod client;
pub mod context;
pub mod engine;
pub mod response;
