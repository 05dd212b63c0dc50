//! Challenge-instance lifecycle manager.
//!
//! Provisions one isolated, network-reachable, time-bounded instance per
//! (challenge, candidate) pair on a Kubernetes cluster, tracks its status,
//! and tears it down on request or expiry. The cluster is the sole source of
//! truth: instances are addressed by a deterministic per-pair namespace
//! name, so no local state store is needed.

pub mod api;
pub mod challenge;
pub mod cluster;
pub mod config;
pub mod error;
pub mod janitor;
pub mod lifecycle;
pub mod resolver;
pub mod telemetry;
