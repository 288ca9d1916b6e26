//! Tripwire: governance between a phishing classifier and its users.
//!
//! Machine-learning output never reaches a user unchecked. The engine keeps
//! durable, time-boxed policy overrides, gates canary promotion on evidence,
//! freezes itself when a safety budget is spent, and verifies that deployed
//! policy artifacts have not drifted apart.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alerts;
pub mod clock;
pub mod config;
pub mod governance;
pub mod logging;
pub mod pipeline;
pub mod verdict;
