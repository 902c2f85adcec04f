use async_trait::async_trait;
use bridge_core::{Pubkey, SendOptions, Signature, Transaction};
use log::info;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::signer::{SignerError, SigningBackend};

/// How the mock misbehaves when asked to sign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Error,
    Panic,
}

/// A signing backend with a fixed identity and canned signatures.
///
/// Used to exercise the dispatcher's failure paths without real key material.
#[derive(Clone)]
pub struct MockSigner {
    public_key: Pubkey,
    signature: Signature,
    failure: Option<MockFailure>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new([1u8; 32], [2u8; 64])
    }
}

impl MockSigner {
    pub fn new(public_key: [u8; 32], signature: [u8; 64]) -> Self {
        Self {
            public_key: Pubkey::new_from_array(public_key),
            signature: Signature::from(signature),
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key.to_bytes()
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Number of signing calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) -> Result<(), SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            None => Ok(()),
            Some(MockFailure::Error) => Err(SignerError::Backend(String::from("mock failure"))),
            Some(MockFailure::Panic) => panic!("mock signer panicked"),
        }
    }
}

#[async_trait]
impl SigningBackend for MockSigner {
    fn public_key(&self) -> Pubkey {
        self.public_key
    }

    async fn sign(&self, _message: &[u8]) -> Result<Signature, SignerError> {
        self.record()?;
        Ok(self.signature)
    }

    async fn sign_transaction(
        &self,
        mut transaction: Transaction,
    ) -> Result<Transaction, SignerError> {
        self.record()?;
        transaction.set_signature(&self.public_key, self.signature)?;
        Ok(transaction)
    }

    async fn sign_and_send(
        &self,
        transaction: Transaction,
        _options: &SendOptions,
    ) -> Result<String, SignerError> {
        let signed = self.sign_transaction(transaction).await?;
        let signature = signed
            .signature()
            .map(ToString::to_string)
            .ok_or_else(|| SignerError::Backend(String::from("no signature slot")))?;
        info!("Mock: sent transaction {}", signature);
        Ok(signature)
    }
}
