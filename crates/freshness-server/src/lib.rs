//! Freshness classification HTTP service

pub mod api;
pub mod config;
