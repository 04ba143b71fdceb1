//! services/bot/src/chat/mod.rs
//!
//! The conversation engine: routes chat updates to sessions, executes the effects
//! their transitions produce and runs conversion jobs in the background.

pub mod commands;
pub mod handler;
pub mod job_task;
pub mod reply;
pub mod state;

pub use handler::{BotEngine, Inbound};
pub use state::AppState;
