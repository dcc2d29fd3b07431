//! Image Service
//!
//! Event-driven worker that promotes raw user uploads into canonical,
//! content-addressed storage and generates derived image variants.

pub mod config;
pub mod db;
pub mod error;
pub mod kafka;
pub mod models;
pub mod services;
pub mod storage;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
