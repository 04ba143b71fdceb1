//! services/bot/src/adapters/mod.rs
//!
//! Concrete implementations of the core ports, plus the local staging area.

pub mod ilovepdf;
pub mod staging;
pub mod telegram;
