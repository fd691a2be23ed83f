// src/integrations/mod.rs — Host capabilities injected into each session

pub mod types;

pub use types::{
    ApprovalAuthority, Capabilities, HostStore, ReturnToApp, Transport, WalletBackend,
};
