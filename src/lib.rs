//! Taxi Agent: dialogue orchestration for booking, querying and cancelling
//! taxi rides over chat.

pub mod api;
pub mod backend;
pub mod booking;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod store;
