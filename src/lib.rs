pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod domain;
pub mod forecast;
pub mod hardware;
pub mod repo;
pub mod telemetry;
