// src/core/mod.rs — Per-channel session controller

pub mod approval;
pub mod bridge;
pub mod handler;
pub mod methods;
pub mod otp;
pub mod registry;
pub mod session;
pub mod types;

pub use registry::PendingRequestRegistry;
pub use session::{ChannelSession, SessionParams, SessionSnapshot};
