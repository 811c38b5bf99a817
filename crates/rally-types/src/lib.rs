//! Shared data model, HTTP views and socket protocol for Rally chat.

pub mod api;
pub mod events;
pub mod models;
