//! The `eltako` library crate provides a set of APIs for controlling
//! Eltako Series 64 shading actors over their session-authenticated
//! `HTTPS` device API.
//!
//! Core functionalities of this crate include:
//!
//! - Logging into a shading actor and keeping its bearer token fresh
//! - Reading and writing blind positions with a bounded retry policy
//! - Emulating a tilt capability the hardware does not natively
//!   support, by overshooting a target position with calibrated
//!   offsets
//! - Polling each actor for externally caused position changes and
//!   publishing them
//! - Discovering actors on the network through `mDNS-SD` announcements
//!   with time-to-live based expiry
//! - Normalizing high-level commands into the low-level instructions
//!   an actor consumes.
//!
//! To optimize system resource usage, `eltako` leverages `tokio` as an
//! asynchronous executor, allowing concurrent execution of independent
//! per-actor tasks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The shading actor control engine.
pub mod actor;
/// A session-authenticated `HTTPS` client for the device API.
pub mod client;
/// Normalization of high-level commands into low-level instructions.
pub mod commands;
/// Configuration data along with its associated loading methods.
pub mod config;
/// Device descriptors exposed by the device API.
pub mod device;
/// A service for discovering shading actors within a network.
pub mod discovery;
/// Error management.
pub mod error;
/// The actor registry used to route inbound commands.
pub mod registry;
/// A bounded retry policy for device-facing operations.
pub mod retry;
