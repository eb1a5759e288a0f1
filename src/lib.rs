//! Cloud SQL Proxy Operator Library
//!
//! Injects Cloud SQL Auth Proxy sidecars into Kubernetes workloads selected by
//! `AuthProxyWorkload` resources. Tests are included in the module files and
//! under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use cloudsql_proxy_operator::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod webhook;
pub mod workload;
