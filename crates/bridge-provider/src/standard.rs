//! Wallet-standard discovery
//!
//! Generic page tooling does not know about this host. It finds wallets by
//! listening for `wallet-standard:register-wallet`, and apps that load late
//! ask again with `wallet-standard:app-ready`. Both paths hand over the same
//! descriptor, backed by the same [`Provider`].

use bridge_core::ProviderError;
use log::{debug, warn};
use serde::Serialize;
use std::{collections::BTreeMap, rc::Rc};

use crate::Provider;

pub const REGISTER_WALLET_EVENT: &str = "wallet-standard:register-wallet";
pub const APP_READY_EVENT: &str = "wallet-standard:app-ready";
pub const STANDARD_VERSION: &str = "1.0.0";

pub const SOLANA_CHAINS: [&str; 3] = ["solana:mainnet", "solana:devnet", "solana:testnet"];

pub const CONNECT_FEATURE: &str = "standard:connect";
pub const DISCONNECT_FEATURE: &str = "standard:disconnect";
pub const EVENTS_FEATURE: &str = "standard:events";
pub const SIGN_MESSAGE_FEATURE: &str = "solana:signMessage";
pub const SIGN_TRANSACTION_FEATURE: &str = "solana:signTransaction";
pub const SIGN_AND_SEND_TRANSACTION_FEATURE: &str = "solana:signAndSendTransaction";

pub const FEATURES: [&str; 6] = [
    CONNECT_FEATURE,
    DISCONNECT_FEATURE,
    EVENTS_FEATURE,
    SIGN_MESSAGE_FEATURE,
    SIGN_TRANSACTION_FEATURE,
    SIGN_AND_SEND_TRANSACTION_FEATURE,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureDescriptor {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub address: String,
    pub public_key: Vec<u8>,
    pub chains: Vec<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDescriptor {
    pub version: String,
    pub name: String,
    pub icon: String,
    pub chains: Vec<String>,
    pub accounts: Vec<WalletAccount>,
    pub features: BTreeMap<String, FeatureDescriptor>,
}

/// The page's global event target, as far as discovery needs it
pub trait AnnouncementWindow {
    /// Broadcast `wallet-standard:register-wallet` carrying the wallet
    fn dispatch_register(&self, wallet: &WalletDescriptor) -> Result<(), ProviderError>;

    /// Answer every future `wallet-standard:app-ready` with the wallet `describe` yields
    fn on_app_ready(&self, describe: Box<dyn Fn() -> WalletDescriptor>) -> Result<(), ProviderError>;
}

pub struct StandardWallet {
    provider: Rc<Provider>,
    name: String,
    icon: String,
}

impl StandardWallet {
    pub fn new(provider: Rc<Provider>, name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            icon: icon.into(),
        }
    }

    pub fn provider(&self) -> &Rc<Provider> {
        &self.provider
    }

    /// Snapshot of the wallet; accounts follow the provider's connection
    pub fn descriptor(&self) -> WalletDescriptor {
        let chains: Vec<String> = SOLANA_CHAINS.iter().map(|c| c.to_string()).collect();
        let accounts = self
            .provider
            .public_key()
            .and_then(|address| match bs58::decode(&address).into_vec() {
                Ok(public_key) => Some(WalletAccount {
                    address,
                    public_key,
                    chains: chains.clone(),
                    features: vec![
                        SIGN_MESSAGE_FEATURE.to_string(),
                        SIGN_TRANSACTION_FEATURE.to_string(),
                        SIGN_AND_SEND_TRANSACTION_FEATURE.to_string(),
                    ],
                }),
                Err(e) => {
                    warn!("Connected address {} is not base58: {}", address, e);
                    None
                }
            })
            .into_iter()
            .collect();

        WalletDescriptor {
            version: STANDARD_VERSION.to_string(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            chains,
            accounts,
            features: FEATURES
                .iter()
                .map(|feature| {
                    (
                        feature.to_string(),
                        FeatureDescriptor {
                            version: STANDARD_VERSION.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn register(self: &Rc<Self>, window: &dyn AnnouncementWindow) -> Result<(), ProviderError> {
        window.dispatch_register(&self.descriptor())?;

        let wallet = self.clone();
        window.on_app_ready(Box::new(move || {
            debug!("Answering late wallet discovery query");
            wallet.descriptor()
        }))
    }
}
