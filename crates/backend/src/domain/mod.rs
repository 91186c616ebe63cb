//! Domain types - configuration and the per-video artifacts
//!
//! These types are independent of the worker transport and of how the
//! pipeline schedules work; both sides build on them.

pub mod artifacts;
pub mod config;
