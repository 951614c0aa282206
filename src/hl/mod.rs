//! High-level, RAII-oriented interfaces built on [`crate::raw`].
pub mod table;
