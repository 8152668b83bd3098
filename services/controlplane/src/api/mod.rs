//! RBAC HTTP API module.
//!
//! # Purpose
//! Route handlers, request/response types, header-derived request scope, and
//! the error mapping shared by every endpoint.
pub mod context;
pub mod error;
pub mod keys;
pub mod openapi;
pub mod permissions;
pub mod resolve;
pub mod roles;
pub mod system;
pub mod types;
