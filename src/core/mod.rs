//! Core building blocks shared across the governance layer.

pub mod config;
