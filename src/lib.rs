//! WA Agent — WhatsApp webhook agent core.

pub mod agent;
pub mod arbiter;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod payload;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod webhook;
