//! HTTP handlers

pub mod ask;
pub mod feedback;
pub mod health;
pub mod stream;
