use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use bridge_core::{Hash, SendOptions};
use log::{debug, info};
use reqwest_middleware::{reqwest::Url, ClientWithMiddleware};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;

use crate::RpcSettings;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest_middleware::Error),
    #[error("failed to read response: {0}")]
    Body(#[from] reqwest_middleware::reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

/// The two ledger calls a wallet needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;
    /// Broadcast a fully signed transaction, returns the base58 transaction signature
    async fn send_transaction(
        &self,
        transaction: &[u8],
        options: &SendOptions,
    ) -> Result<String, RpcError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Contextual<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
}

pub struct RpcClient {
    pub url: Url,
    pub client: ClientWithMiddleware,
    commitment: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(client: ClientWithMiddleware, settings: &RpcSettings) -> Result<Self, anyhow::Error> {
        let url = Url::parse(&settings.url)?;
        info!("RPC client configured for {}", url);
        Ok(Self {
            url,
            client,
            commitment: settings.commitment.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;
        let body: JsonRpcResponse<T> = response.json().await?;

        if let Some(error) = body.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result
            .ok_or_else(|| RpcError::InvalidResponse(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl SolanaRpc for RpcClient {
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        let latest: Contextual<LatestBlockhash> = self
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.commitment }]),
            )
            .await?;
        debug!("Latest blockhash: {}", latest.value.blockhash);
        decode_hash(&latest.value.blockhash)
    }

    async fn send_transaction(
        &self,
        transaction: &[u8],
        options: &SendOptions,
    ) -> Result<String, RpcError> {
        let params = json!([STANDARD.encode(transaction), send_config(options, &self.commitment)]);
        let signature: String = self.call("sendTransaction", params).await?;
        info!("Broadcast transaction {}", signature);
        Ok(signature)
    }
}

fn send_config(options: &SendOptions, commitment: &str) -> Value {
    let mut config = json!({
        "encoding": "base64",
        "skipPreflight": options.skip_preflight.unwrap_or(false),
        "preflightCommitment": options
            .preflight_commitment
            .clone()
            .unwrap_or_else(|| commitment.to_string()),
    });
    if let Some(max_retries) = options.max_retries {
        config["maxRetries"] = json!(max_retries);
    }
    config
}

fn decode_hash(encoded: &str) -> Result<Hash, RpcError> {
    Hash::from_str(encoded)
        .map_err(|e| RpcError::InvalidResponse(format!("invalid blockhash {}: {}", encoded, e)))
}
