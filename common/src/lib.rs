// Common library for the scheduler, approver and syncres binaries

pub mod approver;
pub mod bootstrap;
pub mod cache;
pub mod clients;
pub mod config;
pub mod errors;
pub mod models;
pub mod payload;
pub mod product;
pub mod retry;
pub mod scheduler;
pub mod syncres;
pub mod telemetry;
