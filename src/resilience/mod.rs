//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Registry request fails:
//!     → backoff.rs (delay for this attempt)
//!     → watch loop sleeps (or exits on cancellation)
//!     → retry with the last known index
//! ```
//!
//! # Design Decisions
//! - Registry errors never end a watch; they only delay it
//! - Jitter keeps many service watches from retrying in lockstep

pub mod backoff;
