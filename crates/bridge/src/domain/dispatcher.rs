use bridge_core::{
    ProviderError, RpcContext, SignMessageParams, SignatureResult, SignedMessage, SignedRequest,
    SolanaMethod, Transaction, TransactionError, TransactionParam, INVALID_REQUEST,
    UNAUTHORIZED, USER_DECLINED,
};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;

use super::{
    approval::{ApprovalKind, Approvals, GateError},
    session::{SessionError, SessionHandle},
};
use crate::infra::signer::{SignerError, SigningBackend};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid {0} request")]
    InvalidRequest(String),
    #[error("Unsupported method {0}")]
    UnsupportedMethod(String),
    #[error("User declined the request")]
    Declined,
    #[error("Approval request timed out")]
    ApprovalTimedOut,
    #[error("The requested method and/or account has not been authorized by the user")]
    Unauthorized,
    #[error("signing backend error: {0}")]
    Signer(#[from] SignerError),
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl DispatchError {
    /// Fatal errors invalidate the session: the page is force-disconnected
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DispatchError::ApprovalTimedOut
                | DispatchError::Signer(_)
                | DispatchError::Transaction(_)
                | DispatchError::Session(_)
        )
    }

    pub fn to_provider_error(&self) -> ProviderError {
        match self {
            DispatchError::InvalidRequest(_) | DispatchError::UnsupportedMethod(_) => {
                ProviderError::new(INVALID_REQUEST, self.to_string())
            }
            DispatchError::Declined => ProviderError::user_declined(),
            DispatchError::ApprovalTimedOut => ProviderError::new(USER_DECLINED, self.to_string()),
            DispatchError::Unauthorized => ProviderError::new(UNAUTHORIZED, self.to_string()),
            DispatchError::Signer(_)
            | DispatchError::Transaction(_)
            | DispatchError::Session(_) => ProviderError::internal(),
        }
    }
}

impl From<GateError> for DispatchError {
    fn from(value: GateError) -> Self {
        match value {
            GateError::Rejected => DispatchError::Declined,
            GateError::TimedOut(_) => DispatchError::ApprovalTimedOut,
        }
    }
}

/// Routes each rpc method to its handler. Handlers run one at a time per
/// session, the dispatch loop guarantees that.
pub struct MethodDispatcher {
    signer: Arc<dyn SigningBackend>,
    approvals: Arc<Approvals>,
}

impl MethodDispatcher {
    pub fn new(signer: Arc<dyn SigningBackend>, approvals: Arc<Approvals>) -> Self {
        Self { signer, approvals }
    }

    pub fn approvals(&self) -> &Arc<Approvals> {
        &self.approvals
    }

    /// `Ok(None)` is an empty success response
    pub async fn dispatch(
        &self,
        session: &SessionHandle,
        request: &SignedRequest,
    ) -> Result<Option<Value>, DispatchError> {
        let context: RpcContext = serde_json::from_value(request.context().clone())
            .map_err(|_| DispatchError::InvalidRequest(request.method().to_string()))?;
        let method = SolanaMethod::from_str(&context.method)
            .map_err(|_| DispatchError::UnsupportedMethod(context.method.clone()))?;
        debug!("Dispatching {} ({})", method, request.id());

        match method {
            SolanaMethod::Connect => self.connect(session).await.map(Some),
            SolanaMethod::Disconnect => self.disconnect(session).await.map(|_| None),
            SolanaMethod::SignMessage => self.sign_message(session, &context).await.map(Some),
            SolanaMethod::SignTransactions => {
                self.sign_transactions(session, &context).await.map(Some)
            }
            SolanaMethod::SignAndSendTransactions => self
                .sign_and_send_transactions(session, &context)
                .await
                .map(Some),
        }
    }

    async fn connect(&self, session: &SessionHandle) -> Result<Value, DispatchError> {
        self.approvals
            .request(ApprovalKind::Connect, session.origin().await, json!({}))
            .await?;

        let address = self.signer.public_key().to_string();
        session.connect(&address).await?;
        Ok(json!(address))
    }

    async fn disconnect(&self, session: &SessionHandle) -> Result<(), DispatchError> {
        session.force_disconnect().await?;
        Ok(())
    }

    async fn sign_message(
        &self,
        session: &SessionHandle,
        context: &RpcContext,
    ) -> Result<Value, DispatchError> {
        let public_key = authorized(session).await?;
        let params: SignMessageParams = parse_params(context)?;
        let message = hex::decode(params.message_hex())
            .map_err(|_| DispatchError::InvalidRequest(context.method.clone()))?;
        let encoding = params.encoding();

        self.approvals
            .request(
                ApprovalKind::SignMessage,
                session.origin().await,
                json!({
                    "message": encoding.display(&message),
                    "encoding": encoding.label(),
                }),
            )
            .await?;

        let signature = self.signer.sign(&message).await?;
        info!("Signed {} byte message", message.len());
        Ok(json!(SignedMessage {
            signature: hex::encode(signature.as_ref()),
            public_key,
        }))
    }

    async fn sign_transactions(
        &self,
        session: &SessionHandle,
        context: &RpcContext,
    ) -> Result<Value, DispatchError> {
        authorized(session).await?;
        let params = transaction_params(context)?;
        self.approve_transactions(session, &params, false).await?;

        let mut signed = Vec::with_capacity(params.len());
        for transaction in decode_all(&params)? {
            signed.push(self.signer.sign_transaction(transaction).await?.to_hex()?);
        }
        info!("Signed {} transactions", signed.len());
        Ok(json!(signed))
    }

    async fn sign_and_send_transactions(
        &self,
        session: &SessionHandle,
        context: &RpcContext,
    ) -> Result<Value, DispatchError> {
        let public_key = authorized(session).await?;
        let params = transaction_params(context)?;
        self.approve_transactions(session, &params, true).await?;

        let options = context.options.clone().unwrap_or_default();
        let mut results = Vec::with_capacity(params.len());
        for transaction in decode_all(&params)? {
            let signature = self.signer.sign_and_send(transaction, &options).await?;
            results.push(SignatureResult {
                public_key: public_key.clone(),
                signature,
            });
        }
        info!("Signed and sent {} transactions", results.len());
        Ok(json!(results))
    }

    async fn approve_transactions(
        &self,
        session: &SessionHandle,
        params: &[TransactionParam],
        send: bool,
    ) -> Result<(), DispatchError> {
        let transactions: Vec<&str> = params.iter().map(|p| p.transaction_hex()).collect();
        self.approvals
            .request(
                ApprovalKind::SignTransaction,
                session.origin().await,
                json!({ "transactions": transactions, "send": send }),
            )
            .await?;
        Ok(())
    }
}

async fn authorized(session: &SessionHandle) -> Result<String, DispatchError> {
    session
        .active_address()
        .await
        .ok_or(DispatchError::Unauthorized)
}

fn parse_params<T: DeserializeOwned>(context: &RpcContext) -> Result<T, DispatchError> {
    serde_json::from_value(context.params.clone())
        .map_err(|_| DispatchError::InvalidRequest(context.method.clone()))
}

fn transaction_params(context: &RpcContext) -> Result<Vec<TransactionParam>, DispatchError> {
    let params: Vec<TransactionParam> = parse_params(context)?;
    if params.is_empty() {
        return Err(DispatchError::InvalidRequest(context.method.clone()));
    }
    Ok(params)
}

/// Decode the whole batch before anything is signed
fn decode_all(params: &[TransactionParam]) -> Result<Vec<Transaction>, DispatchError> {
    params
        .iter()
        .map(|param| -> Result<Transaction, DispatchError> {
            let transaction = Transaction::from_hex(param.transaction_hex())?;
            if transaction.is_versioned() != param.is_versioned() {
                debug!(
                    "Page tagged transaction as versioned={}, decoded as {:?}",
                    param.is_versioned(),
                    transaction.format()
                );
            }
            Ok(transaction)
        })
        .collect()
}
