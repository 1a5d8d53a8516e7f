//! Error catalogue for HealthCrew.
//!
//! Every fatal condition the engine can report maps to a stable code with a
//! message and remediation steps, so diagnostic reports stay self-contained.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                              |
//! |------------|-------------|------------------------------------------|
//! | E001-E099  | Config      | Configuration and setup errors           |
//! | E100-E199  | Session     | Remote session, SSH and authentication   |
//! | E200-E299  | Check       | Check registration and execution         |
//! | E300-E399  | Build       | Build lifecycle                          |
//! | E400-E499  | Knowledge   | Knowledge base and RCA lookups           |
//! | E500-E599  | Internal    | Internal/unexpected errors               |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
