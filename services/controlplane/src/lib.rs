//! Keygate control-plane library crate.
//!
//! # Purpose
//! Exposes the workspace-scoped RBAC engine (permissions, roles, key
//! authorization bindings, effective-permission resolution), its storage
//! backends, and the HTTP surface for use by the binary and tests.
//!
//! # Notes
//! `rbac` owns validation, audit emission, and error mapping; `store` owns
//! transactions. Handlers in `api` only translate HTTP to service calls.
pub mod api;
pub mod app;
pub mod audit;
pub mod config;
pub mod model;
pub mod observability;
pub mod rbac;
pub mod store;
