//! Domain model for the project/specification/bullet-item hierarchy.
//!
//! # Responsibility
//! - Define the canonical read models shared by repositories and services.
//! - Host the pure payload rules applied before every write.
//!
//! # Invariants
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod constraints;
pub mod entities;
