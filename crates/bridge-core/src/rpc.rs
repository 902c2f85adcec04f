//! RPC methods carried inside the `context` of an `rpc_request`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use crate::SOLANA_NETWORK;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcContext {
    pub network: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SendOptions>,
}

impl RpcContext {
    pub fn new(method: SolanaMethod, params: Value) -> Self {
        Self {
            network: SOLANA_NETWORK.to_string(),
            method: method.to_string(),
            params,
            options: None,
        }
    }

    pub fn with_options(mut self, options: Option<SendOptions>) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolanaMethod {
    Connect,
    Disconnect,
    SignMessage,
    SignTransactions,
    SignAndSendTransactions,
}

impl SolanaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolanaMethod::Connect => "sol_connect",
            SolanaMethod::Disconnect => "sol_disconnect",
            SolanaMethod::SignMessage => "sol_signMessage",
            SolanaMethod::SignTransactions => "sol_signTransactions",
            SolanaMethod::SignAndSendTransactions => "sol_signAndSendTransactions",
        }
    }
}

impl fmt::Display for SolanaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolanaMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sol_connect" => Ok(SolanaMethod::Connect),
            "sol_disconnect" => Ok(SolanaMethod::Disconnect),
            "sol_signMessage" => Ok(SolanaMethod::SignMessage),
            "sol_signTransactions" => Ok(SolanaMethod::SignTransactions),
            "sol_signAndSendTransactions" => Ok(SolanaMethod::SignAndSendTransactions),
            other => Err(format!("unsupported method: {}", other)),
        }
    }
}

/// `[hexEncodedMessageBytes, encodingLabel]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignMessageParams(pub String, pub String);

impl SignMessageParams {
    pub fn message_hex(&self) -> &str {
        &self.0
    }

    pub fn encoding(&self) -> MessageEncoding {
        MessageEncoding::from_label(&self.1)
    }
}

/// `[hexEncodedTxBytes, isVersioned]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionParam(pub String, pub bool);

impl TransactionParam {
    pub fn transaction_hex(&self) -> &str {
        &self.0
    }

    pub fn is_versioned(&self) -> bool {
        self.1
    }
}

/// How a message should be rendered in the approval dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEncoding {
    Utf8,
    Hex,
}

impl MessageEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            MessageEncoding::Utf8 => "utf8",
            MessageEncoding::Hex => "hex",
        }
    }

    /// Unknown labels fall back to utf8, which is what every page sends in practice
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "hex" => MessageEncoding::Hex,
            _ => MessageEncoding::Utf8,
        }
    }

    pub fn display(&self, message: &[u8]) -> String {
        match self {
            MessageEncoding::Utf8 => String::from_utf8_lossy(message).into_owned(),
            MessageEncoding::Hex => hex::encode(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_preflight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight_commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    /// Hex encoded raw signature bytes
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    pub public_key: String,
    pub signature: String,
}
