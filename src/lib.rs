//! Sessiongate - credential and session lifecycle service
//!
//! Signs and verifies tokens, keeps users and sessions in a SQL store,
//! rotates token pairs on refresh and gates routes by role.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
