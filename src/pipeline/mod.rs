//! Text stages shared by the converters and the job manager.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ converter ──▶ postprocess ──▶ titles
//! (stage)                 (cleanup)       (advanced only)
//! ```
//!
//! 1. [`input`]: stage an upload or fetch a URL into the job's directory
//! 2. [`postprocess`]: deterministic whitespace and table cleanup
//! 3. [`titles`]: heading-level correction for backend Markdown

pub mod input;
pub mod postprocess;
pub mod titles;
