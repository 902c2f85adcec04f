use bridge_core::{
    decode, encode, sign_request, Envelope, Event, PageInfo, ProviderError, RpcContext,
    SendOptions, SignatureResult, SignedMessage, SolanaMethod, Transaction, TransactionParam,
    UnsignedRequest, LOG_METHOD, MessageEncoding, POST_PAGE_INFO_METHOD, RPC_REQUEST_METHOD,
    SOLANA_NETWORK,
};
use log::{debug, warn};
use secrecy::{ExposeSecret, SecretSlice};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::{cell::RefCell, rc::Rc};

use crate::{EventEmitter, ListenerId, PendingCalls, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSignature {
    pub signature: Vec<u8>,
    pub public_key: String,
}

#[derive(Default)]
struct ConnectionState {
    public_key: Option<String>,
}

/// Wallet object handed to page code. Every call round-trips through the host.
pub struct Provider {
    transport: Rc<dyn Transport>,
    secret: SecretSlice<u8>,
    network: String,
    pending: PendingCalls,
    events: EventEmitter,
    state: RefCell<ConnectionState>,
}

impl Provider {
    pub fn new(transport: Rc<dyn Transport>, secret: Vec<u8>) -> Self {
        Self {
            transport,
            secret: SecretSlice::from(secret),
            network: SOLANA_NETWORK.to_string(),
            pending: PendingCalls::new(),
            events: EventEmitter::new(),
            state: RefCell::new(ConnectionState::default()),
        }
    }

    pub fn public_key(&self) -> Option<String> {
        self.state.borrow().public_key.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().public_key.is_some()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn on(&self, name: &str, listener: impl Fn(&[Value]) + 'static) -> ListenerId {
        self.events.on(name, listener)
    }

    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.events.off(name, id)
    }

    /// Sign and transmit a request. Only `rpc_request` waits for a reply;
    /// everything else resolves as soon as it is handed to the transport.
    pub async fn request(&self, method: &str, context: Value) -> Result<Option<Value>, ProviderError> {
        let unsigned = UnsignedRequest::new(method, context);
        let id = unsigned.id;
        let signed = sign_request(self.secret.expose_secret(), unsigned)
            .map_err(|e| ProviderError::unexpected(e.to_string()))?;
        let raw =
            encode(&signed.into()).map_err(|e| ProviderError::unexpected(e.to_string()))?;

        if method != RPC_REQUEST_METHOD {
            self.transport.post(raw)?;
            return Ok(None);
        }

        let reply = self.pending.register(id)?;
        if let Err(e) = self.transport.post(raw) {
            self.pending.remove(id);
            return Err(e);
        }

        match reply.await {
            Ok(outcome) => outcome.map(Some),
            Err(_) => Err(ProviderError::session_ended()),
        }
    }

    pub async fn rpc_request(&self, context: RpcContext) -> Result<Value, ProviderError> {
        let context = serde_json::to_value(&context)
            .map_err(|e| ProviderError::unexpected(e.to_string()))?;
        Ok(self
            .request(RPC_REQUEST_METHOD, context)
            .await?
            .unwrap_or(Value::Null))
    }

    pub async fn log(&self, message: &str) -> Result<(), ProviderError> {
        self.request(LOG_METHOD, json!({ "message": message }))
            .await
            .map(|_| ())
    }

    pub async fn post_page_info(&self, info: &PageInfo) -> Result<(), ProviderError> {
        let context =
            serde_json::to_value(info).map_err(|e| ProviderError::unexpected(e.to_string()))?;
        self.request(POST_PAGE_INFO_METHOD, context)
            .await
            .map(|_| ())
    }

    pub async fn connect(&self) -> Result<String, ProviderError> {
        if let Some(public_key) = self.public_key() {
            return Ok(public_key);
        }

        let result = self
            .rpc_request(RpcContext::new(SolanaMethod::Connect, json!([])))
            .await?;
        let address: String = parse_result(result, SolanaMethod::Connect)?;
        self.state.borrow_mut().public_key = Some(address.clone());
        Ok(address)
    }

    pub async fn disconnect(&self) -> Result<(), ProviderError> {
        if !self.is_connected() {
            return Ok(());
        }

        self.rpc_request(RpcContext::new(SolanaMethod::Disconnect, json!([])))
            .await?;
        self.state.borrow_mut().public_key = None;
        Ok(())
    }

    pub async fn sign_message(
        &self,
        message: &[u8],
        encoding: MessageEncoding,
    ) -> Result<MessageSignature, ProviderError> {
        let params = json!([hex::encode(message), encoding.label()]);
        let result = self
            .rpc_request(RpcContext::new(SolanaMethod::SignMessage, params))
            .await?;
        let signed: SignedMessage = parse_result(result, SolanaMethod::SignMessage)?;
        let signature = hex::decode(&signed.signature)
            .map_err(|e| ProviderError::unexpected(format!("Invalid signature encoding: {}", e)))?;
        Ok(MessageSignature {
            signature,
            public_key: signed.public_key,
        })
    }

    pub async fn sign_transaction(&self, transaction: &Transaction) -> Result<Transaction, ProviderError> {
        let mut signed = self
            .sign_all_transactions(std::slice::from_ref(transaction))
            .await?;
        signed
            .pop()
            .ok_or_else(|| ProviderError::unexpected("Host returned no signed transaction"))
    }

    /// All transactions travel in one request; the host signs all or none
    pub async fn sign_all_transactions(
        &self,
        transactions: &[Transaction],
    ) -> Result<Vec<Transaction>, ProviderError> {
        let result = self
            .rpc_request(RpcContext::new(
                SolanaMethod::SignTransactions,
                transaction_params(transactions)?,
            ))
            .await?;
        let encoded: Vec<String> = parse_result(result, SolanaMethod::SignTransactions)?;
        if encoded.len() != transactions.len() {
            return Err(ProviderError::unexpected(format!(
                "Expected {} signed transactions, host returned {}",
                transactions.len(),
                encoded.len()
            )));
        }
        encoded
            .iter()
            .map(|tx| {
                Transaction::from_hex(tx).map_err(|e| {
                    ProviderError::unexpected(format!("Invalid signed transaction: {}", e))
                })
            })
            .collect()
    }

    pub async fn sign_and_send_transaction(
        &self,
        transaction: &Transaction,
        options: Option<SendOptions>,
    ) -> Result<SignatureResult, ProviderError> {
        let mut results = self
            .sign_and_send_all_transactions(std::slice::from_ref(transaction), options)
            .await?;
        results
            .pop()
            .ok_or_else(|| ProviderError::unexpected("Host returned no signature"))
    }

    pub async fn sign_and_send_all_transactions(
        &self,
        transactions: &[Transaction],
        options: Option<SendOptions>,
    ) -> Result<Vec<SignatureResult>, ProviderError> {
        let context = RpcContext::new(
            SolanaMethod::SignAndSendTransactions,
            transaction_params(transactions)?,
        )
        .with_options(options);
        let result = self.rpc_request(context).await?;
        parse_result(result, SolanaMethod::SignAndSendTransactions)
    }

    /// Inbound listener for the transport's message event
    pub fn handle_message(&self, raw: &str) {
        match decode(raw) {
            Some(Envelope::Response(response)) => {
                let id = response.id;
                if !self.pending.settle(id, response.into_result()) {
                    debug!("Ignoring response for unknown request {}", id);
                }
            }
            Some(Envelope::Event(event)) => self.handle_event(event),
            Some(Envelope::Request(request)) => {
                debug!("Ignoring request {} sent to the page", request.id());
            }
            None => {}
        }
    }

    fn handle_event(&self, event: Event) {
        if event.network != self.network {
            debug!("Ignoring {} event for network {}", event.name, event.network);
            return;
        }

        match event.name.as_str() {
            "connect" => match event.args.first().and_then(Value::as_str) {
                Some(address) => self.state.borrow_mut().public_key = Some(address.to_string()),
                None => warn!("connect event without an address"),
            },
            "disconnect" => self.state.borrow_mut().public_key = None,
            _ => {}
        }

        self.events.emit(&event.name, &event.args);
    }

    /// Tear down the channel: every outstanding call settles with "Session ended"
    pub fn shutdown(&self) -> usize {
        self.state.borrow_mut().public_key = None;
        self.pending.reject_all(ProviderError::session_ended())
    }
}

fn transaction_params(transactions: &[Transaction]) -> Result<Value, ProviderError> {
    let params = transactions
        .iter()
        .map(|tx| {
            let encoded = tx
                .to_hex()
                .map_err(|e| ProviderError::unexpected(format!("Invalid transaction: {}", e)))?;
            Ok(TransactionParam(encoded, tx.is_versioned()))
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;
    serde_json::to_value(params).map_err(|e| ProviderError::unexpected(e.to_string()))
}

fn parse_result<T: DeserializeOwned>(result: Value, method: SolanaMethod) -> Result<T, ProviderError> {
    serde_json::from_value(result)
        .map_err(|e| ProviderError::unexpected(format!("Invalid {} response: {}", method, e)))
}
