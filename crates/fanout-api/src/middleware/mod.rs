//! HTTP middleware for the API layer.

pub mod auth;
