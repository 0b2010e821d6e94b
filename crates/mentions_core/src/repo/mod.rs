//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the data access contract for preference rows.
//! - Isolate SQLite query details from caching and orchestration.
//!
//! # Invariants
//! - Writes are upserts keyed by identity id; duplicates are impossible.
//! - Read paths reject malformed rows instead of masking them.

pub mod preference_repo;
