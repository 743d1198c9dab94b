//! WattPilot: switch discretionary loads on solar surplus, with a nightly
//! schedule fallback when tomorrow looks cloudy.

pub mod actor;
pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod providers;
pub mod telemetry;
