use async_trait::async_trait;
use bridge_core::{Hash, Pubkey, SendOptions, Signature, Transaction, TransactionError};
use ed25519_dalek::{Signer, SigningKey};
use log::debug;
use std::sync::Arc;
use thiserror::Error;

use super::rpc::{RpcError, SolanaRpc};

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("signing backend failed: {0}")]
    Backend(String),
}

/// Holds the wallet key. Key material never leaves the implementation.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Address of the active wallet
    fn public_key(&self) -> Pubkey;

    /// Detached signature over raw bytes
    async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError>;

    /// Fill the wallet's signature slot
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, SignerError>;

    /// Sign and broadcast, returns the base58 transaction signature
    async fn sign_and_send(
        &self,
        transaction: Transaction,
        options: &SendOptions,
    ) -> Result<String, SignerError>;
}

pub struct LocalSigner {
    key: SigningKey,
    address: Pubkey,
    rpc: Arc<dyn SolanaRpc>,
}

impl LocalSigner {
    pub fn new(key: SigningKey, rpc: Arc<dyn SolanaRpc>) -> Self {
        let address = Pubkey::new_from_array(key.verifying_key().to_bytes());
        Self { key, address, rpc }
    }

    fn sign_in_place(&self, transaction: &mut Transaction) -> Result<(), SignerError> {
        let signature = Signature::from(self.key.sign(&transaction.message_data()).to_bytes());
        transaction.set_signature(&self.address, signature)?;
        Ok(())
    }
}

#[async_trait]
impl SigningBackend for LocalSigner {
    fn public_key(&self) -> Pubkey {
        self.address
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignerError> {
        Ok(Signature::from(self.key.sign(message).to_bytes()))
    }

    async fn sign_transaction(
        &self,
        mut transaction: Transaction,
    ) -> Result<Transaction, SignerError> {
        self.sign_in_place(&mut transaction)?;
        Ok(transaction)
    }

    async fn sign_and_send(
        &self,
        mut transaction: Transaction,
        options: &SendOptions,
    ) -> Result<String, SignerError> {
        if *transaction.recent_blockhash() == Hash::default() {
            let blockhash = self.rpc.get_latest_blockhash().await?;
            debug!("Filling missing blockhash before broadcast");
            transaction.set_recent_blockhash(blockhash);
        }
        self.sign_in_place(&mut transaction)?;
        let signature = self
            .rpc
            .send_transaction(&transaction.serialize()?, options)
            .await?;
        Ok(signature)
    }
}
