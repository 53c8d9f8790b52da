//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     root token cancelled
//!     → catalog loop stops polling
//!     → every per-service watch (child token) stops
//!     → publisher drains and exits
//! ```
//!
//! # Design Decisions
//! - One root cancellation token; per-service tokens are its children
//! - Cancelling a token drops the task's in-flight long-poll

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
