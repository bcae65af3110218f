//! Core use-case services.
//!
//! # Responsibility
//! - Compose entity store calls into authorized, order-preserving
//!   operations (`Coordinator`).
//! - Keep authorization (`ownership`), item ordering (`ordering`) and
//!   concurrency control (`locks`) independently testable.

pub mod coordinator;
pub mod locks;
pub mod ordering;
pub mod ownership;
pub mod scope;
