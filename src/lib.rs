//! wvrelay - Widevine license relay for an operator-locked DRM backend.
//!
//! This crate provides:
//! - Access-session refresh from persisted identity credentials, on a cron schedule.
//! - One-time device sign-in and request signing through a pluggable signing agent.
//! - A license proxy that prepares one asset at a time and routes license challenges.
//! - An optional HTTP surface for players.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary.
//! - `serve`: enable the HTTP surface.
//! - `tracing`: log through `tracing` (default).
//! - `log`: log through the `log` facade when `tracing` is off.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Asset descriptors and the live asset session.
pub mod asset;
/// Token Service.
pub mod auth;
/// License challenge classification.
pub mod challenge;
/// YAML configuration.
pub mod config;
/// Device sign-in and request signing.
pub mod device;
/// Common error types and Result alias.
pub mod error;
/// License Proxy state machine.
pub mod proxy;
/// Cron-driven refresh.
pub mod scheduler;
/// Persisted identity and access session records.
pub mod session;
/// Device Signing Agent capability.
pub mod signing;
/// Credential Store.
pub mod store;
/// Unverified token claim decoding.
pub mod token;
/// Upstream entitlement and DRM client.
pub mod upstream;
/// Shared helper utilities.
pub mod utils;

/// HTTP surface (feature: `serve`).
#[cfg(feature = "serve")]
pub mod serve;
