// src/lib.rs — Library root for sdkconnect

pub mod core;
pub mod infra;
pub mod integrations;
