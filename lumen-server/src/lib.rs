//! Lumen server: streams denoising progress to WebSocket clients.

pub mod api;
pub mod config;
pub mod session;
