//! # Pipelines Module
//!
//! High-level conversion workflows between VCF and bref4.

pub mod convert;
