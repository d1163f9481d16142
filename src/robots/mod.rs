//! Robots.txt handling module
//!
//! This module provides parsing, caching and the [`PermissionGate`] that every
//! page and PDF request is checked against.

mod cache;
mod gate;
mod parser;

pub use cache::{CachedPolicy, Clock, ManualClock, PolicyOrigin, SystemClock};
pub use gate::{PermissionDecision, PermissionGate, PolicyFetch, PolicySource};
pub use parser::ParsedRobots;
