//! bridge-core: Shared types for the wallet bridge host and the page provider
//!
//! Everything that crosses the wire lives here so both sides agree on the
//! envelope shapes, the request signature and the RPC schemas.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod rpc;
pub mod transaction;

pub use codec::*;
pub use envelope::*;
pub use errors::*;
pub use rpc::*;
pub use transaction::{
    Hash, Pubkey, Signature, Transaction, TransactionError, TransactionFormat, VersionedMessage,
};
