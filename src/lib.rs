// src/lib.rs
pub mod api;
pub mod auth;
pub mod banner;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod runner;
pub mod sandbox;
pub mod workspace;
