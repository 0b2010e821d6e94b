//! Domain model for identities, preferences and mentions.
//!
//! # Responsibility
//! - Define the records shared by scanning, resolution, gating and storage.
//! - Keep host-owned data (identities) separate from engine-owned data
//!   (preferences).
//!
//! # Invariants
//! - Every participant is addressed by a stable `IdentityId`.
//! - Display names are mutable and never used as keys.

pub mod identity;
pub mod mention;
pub mod preference;
