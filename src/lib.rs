//! Workspace authorization server library.
//!
//! Authentication by session token or scoped API key, workspace membership and
//! role management, and permission checks, all on top of an append-only,
//! eventually consistent versioned store.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod locks;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;
pub mod store;
