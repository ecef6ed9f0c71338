//! chms-guard - Admission control for the ChMS web API
//!
//! This crate implements the request pipeline that sits in front of the
//! church management API: a security monitor that rejects malicious
//! requests, a fixed-window rate limiter keyed by user or network address,
//! failed-login escalation, and a response decorator that adds cache,
//! security and rate limit headers. All mutable state lives behind an
//! injected counter store.

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod security;
pub mod store;
pub mod telemetry;
