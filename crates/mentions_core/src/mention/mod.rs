//! Mention detection: scanning, resolution and highlight rendering.
//!
//! # Responsibility
//! - Turn raw chat text into resolved mentions using only in-memory data.
//!
//! # Invariants
//! - Nothing in this module touches durable storage or the sinks.

pub mod render;
pub mod resolver;
pub mod scanner;

pub use render::render_highlights;
pub use resolver::IdentityResolver;
pub use scanner::MentionScanner;
