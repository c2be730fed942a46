//! Shared test fixtures for the ZIM archiver workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`zim`]: byte fixtures that pass (or deliberately fail) ZIM header checks
//! - [`layout`]: [`SourceLayout`] temp directories for one archived source

pub mod layout;
pub mod zim;

pub use layout::SourceLayout;
