//! Shared model types for the tablevault archiver.
//!
//! Pure data types used by the state backends, database drivers and the
//! archive engine. Kept in their own crate so the other crates can share
//! them without circular dependencies.

#![warn(clippy::pedantic)]

pub mod artifact;
pub mod checkpoint;
pub mod error;
pub mod registry;
pub mod window;
