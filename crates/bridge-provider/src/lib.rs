//! bridge-provider: wallet provider that lives inside the embedded page
//!
//! This crate provides the page-side half of the bridge:
//! - A promise-style wallet API (connect, sign, sign-and-send)
//! - A pending call table matching host responses to requests
//! - Event re-emission for host notifications
//! - Wallet-standard discovery so generic page tooling finds the wallet

mod emitter;
mod pending;
mod provider;
pub mod standard;
mod transport;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use emitter::{EventEmitter, Listener, ListenerId};
pub use pending::PendingCalls;
pub use provider::{MessageSignature, Provider};
pub use standard::{AnnouncementWindow, StandardWallet, WalletDescriptor};
pub use transport::Transport;

// Re-export bridge-core types
pub use bridge_core::*;

#[cfg(target_arch = "wasm32")]
pub use wasm::WalletProvider;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("bridge-provider initialized");
}
