//! Use-case services layered over repositories.
//!
//! # Responsibility
//! - Put caching, retries and per-key serialization in front of storage.
//! - Keep the coordinator decoupled from SQL details.

pub mod preference_store;
