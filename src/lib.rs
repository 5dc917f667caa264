//! Contagem - Access Counter Service
//!
//! This crate implements a small HTTP service exposing an access counter
//! endpoint behind a client-scoped, fixed-window rate limiter. Rules match
//! requests by method and path, counters are kept per client and rule in a
//! pluggable counter store, and requests over their quota are answered with
//! a configured response before they reach the route.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
