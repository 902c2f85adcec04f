use async_trait::async_trait;
use bridge_core::{Hash, SendOptions, Signature, Transaction};
use log::info;
use std::sync::{Arc, RwLock};

use super::rpc::{RpcError, SolanaRpc};

/// A transaction the mock "broadcast"
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub transaction: Transaction,
    pub options: SendOptions,
}

/// In-process ledger stand-in for E2E testing.
///
/// Hands out a fixed blockhash and accepts every transaction, answering with
/// the fee payer signature like a real node would.
#[derive(Clone)]
pub struct MockRpc {
    blockhash: Hash,
    sent: Arc<RwLock<Vec<SentTransaction>>>,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new(Hash::new_from_array([42u8; 32]))
    }
}

impl MockRpc {
    pub fn new(blockhash: Hash) -> Self {
        Self {
            blockhash,
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn blockhash(&self) -> Hash {
        self.blockhash
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        self.sent
            .read()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SolanaRpc for MockRpc {
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        Ok(self.blockhash)
    }

    async fn send_transaction(
        &self,
        transaction: &[u8],
        options: &SendOptions,
    ) -> Result<String, RpcError> {
        let transaction = Transaction::decode(transaction)
            .map_err(|e| RpcError::InvalidResponse(format!("mock could not decode: {}", e)))?;
        let signature = transaction
            .signature()
            .map(ToString::to_string)
            .ok_or_else(|| RpcError::Rpc {
                code: -32602,
                message: String::from("transaction has no signatures"),
            })?;

        info!("Mock: broadcast transaction {}", signature);
        self.sent
            .write()
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?
            .push(SentTransaction {
                transaction,
                options: options.clone(),
            });
        Ok(signature)
    }
}
