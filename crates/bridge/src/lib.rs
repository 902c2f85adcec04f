pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod startup;

pub use api::routes::*;
pub use config::*;
pub use domain::{
    ApprovalAction, ApprovalKind, ApprovalRequest, Approvals, Bridge, BridgeConfig, BridgeError,
    DispatchError, MethodDispatcher, PageSink, Routed, SessionHandle,
};
pub use infra::rpc::{RpcClient, RpcError, SolanaRpc};
pub use infra::secrets::{get_key, ChannelSecret, SecretKeyHandler};
pub use infra::signer::{LocalSigner, SignerError, SigningBackend};
pub use startup::*;
