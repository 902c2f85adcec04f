//! Transaction buffers
//!
//! Pages hand over serialized ledger transactions in either wire format. The
//! bridge never builds instructions itself; it decodes, fills its own
//! signature slot (and the blockhash when asked to broadcast) and re-encodes.

pub use solana_hash::Hash;
pub use solana_message::{v0, Message, MessageHeader, VersionedMessage};
pub use solana_pubkey::Pubkey;
pub use solana_signature::Signature;
use solana_transaction::{versioned::VersionedTransaction, Transaction as LegacyTransaction};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("message is not in {0:?} format")]
    WrongFormat(TransactionFormat),
    #[error("signature count {signatures} does not match required signers {required}")]
    SignatureCountMismatch { signatures: usize, required: usize },
    #[error("account table has {keys} keys but {required} signers are required")]
    MissingSignerKeys { keys: usize, required: usize },
    #[error("key is not a required signer of this transaction")]
    NotASigner,
    #[error("invalid hex: {0}")]
    Hex(String),
}

impl From<bincode::Error> for TransactionError {
    fn from(value: bincode::Error) -> Self {
        TransactionError::Malformed(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFormat {
    Legacy,
    Versioned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    format: TransactionFormat,
    inner: VersionedTransaction,
}

impl Transaction {
    /// Wrap a message with empty signature slots
    pub fn from_message(message: VersionedMessage) -> Result<Self, TransactionError> {
        let format = match message {
            VersionedMessage::Legacy(_) => TransactionFormat::Legacy,
            VersionedMessage::V0(_) => TransactionFormat::Versioned,
        };
        let required = message.header().num_required_signatures as usize;
        Self::checked(
            format,
            VersionedTransaction {
                signatures: vec![Signature::default(); required],
                message,
            },
        )
    }

    /// Try the versioned framing first and fall back to legacy
    pub fn decode(bytes: &[u8]) -> Result<Self, TransactionError> {
        Self::decode_versioned(bytes).or_else(|_| Self::decode_legacy(bytes))
    }

    /// Only accepts messages carrying a version prefix
    pub fn decode_versioned(bytes: &[u8]) -> Result<Self, TransactionError> {
        let inner: VersionedTransaction = bincode::deserialize(bytes)?;
        if matches!(inner.message, VersionedMessage::Legacy(_)) {
            return Err(TransactionError::WrongFormat(TransactionFormat::Versioned));
        }
        Self::checked(TransactionFormat::Versioned, inner)
    }

    pub fn decode_legacy(bytes: &[u8]) -> Result<Self, TransactionError> {
        let legacy: LegacyTransaction = bincode::deserialize(bytes)?;
        Self::checked(TransactionFormat::Legacy, VersionedTransaction::from(legacy))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(encoded).map_err(|e| TransactionError::Hex(e.to_string()))?;
        Self::decode(&bytes)
    }

    fn checked(
        format: TransactionFormat,
        inner: VersionedTransaction,
    ) -> Result<Self, TransactionError> {
        let required = inner.message.header().num_required_signatures as usize;
        if inner.signatures.len() != required {
            return Err(TransactionError::SignatureCountMismatch {
                signatures: inner.signatures.len(),
                required,
            });
        }
        let keys = inner.message.static_account_keys().len();
        if keys < required {
            return Err(TransactionError::MissingSignerKeys { keys, required });
        }
        Ok(Self { format, inner })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        Ok(bincode::serialize(&self.inner)?)
    }

    pub fn to_hex(&self) -> Result<String, TransactionError> {
        self.serialize().map(hex::encode)
    }

    pub fn format(&self) -> TransactionFormat {
        self.format
    }

    pub fn is_versioned(&self) -> bool {
        self.format == TransactionFormat::Versioned
    }

    pub fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    /// The bytes every signer signs
    pub fn message_data(&self) -> Vec<u8> {
        self.inner.message.serialize()
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.inner.signatures
    }

    /// The fee payer signature doubles as the transaction id
    pub fn signature(&self) -> Option<&Signature> {
        self.inner.signatures.first()
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        let required = self.inner.signatures.len();
        self.inner
            .message
            .static_account_keys()
            .get(..required)
            .unwrap_or_default()
    }

    pub fn recent_blockhash(&self) -> &Hash {
        self.inner.message.recent_blockhash()
    }

    /// Replacing the blockhash changes the message, so existing signatures are cleared
    pub fn set_recent_blockhash(&mut self, blockhash: Hash) {
        self.inner.message.set_recent_blockhash(blockhash);
        for signature in self.inner.signatures.iter_mut() {
            *signature = Signature::default();
        }
    }

    pub fn set_signature(
        &mut self,
        signer: &Pubkey,
        signature: Signature,
    ) -> Result<(), TransactionError> {
        let index = self
            .required_signers()
            .iter()
            .position(|key| key == signer)
            .ok_or(TransactionError::NotASigner)?;
        self.inner.signatures[index] = signature;
        Ok(())
    }
}
