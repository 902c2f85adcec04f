use bridge_core::{
    decode, verify, Envelope, PageInfo, ProviderError, Response, SignedRequest, LOG_METHOD,
    POST_PAGE_INFO_METHOD, RPC_REQUEST_METHOD, UNAUTHORIZED,
};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use super::{
    queue::RequestQueue,
    session::{SessionError, SessionHandle},
};
use crate::infra::secrets::ChannelSecret;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("bridge session has been shut down")]
    Closed,
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// What the adapter did with one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Dropped,
    Logged,
    PageInfo { origin_changed: bool },
    Queued,
    Rejected,
}

/// Terminates the page transport on the host: decodes, authenticates and
/// routes each inbound message. Never waits on rpc execution.
pub struct ChannelAdapter {
    secret: Arc<ChannelSecret>,
    enforce_signatures: bool,
    session: SessionHandle,
    queue: RequestQueue,
}

impl ChannelAdapter {
    pub fn new(
        secret: Arc<ChannelSecret>,
        enforce_signatures: bool,
        session: SessionHandle,
        queue: RequestQueue,
    ) -> Self {
        Self {
            secret,
            enforce_signatures,
            session,
            queue,
        }
    }

    pub async fn on_message(&self, raw: &str) -> Result<Routed, BridgeError> {
        let request = match decode(raw) {
            Some(Envelope::Request(request)) => request,
            Some(other) => {
                debug!("Ignoring non-request envelope from page: {:?}", other);
                return Ok(Routed::Dropped);
            }
            None => return Ok(Routed::Dropped),
        };

        if !verify(self.secret.expose(), &request) {
            if self.enforce_signatures {
                return self.reject(&request);
            }
            warn!(
                "Request {} ({}) failed signature check, processing anyway",
                request.id(),
                request.method()
            );
        }

        match request.method() {
            LOG_METHOD => {
                info!(target: "page", "{}", log_line(request.context()));
                Ok(Routed::Logged)
            }
            POST_PAGE_INFO_METHOD => self.page_info(&request).await,
            RPC_REQUEST_METHOD => {
                if !self.queue.push(request) {
                    return Err(BridgeError::Closed);
                }
                debug!("Queued rpc request, {} waiting", self.queue.len());
                Ok(Routed::Queued)
            }
            other => {
                debug!("Dropping request with unknown method {}", other);
                Ok(Routed::Dropped)
            }
        }
    }

    async fn page_info(&self, request: &SignedRequest) -> Result<Routed, BridgeError> {
        let info: PageInfo = match serde_json::from_value(request.context().clone()) {
            Ok(info) => info,
            Err(e) => {
                warn!("Malformed page info {}: {}", request.id(), e);
                return Ok(Routed::Dropped);
            }
        };

        let origin_changed = self.session.update_page_info(info).await;
        if origin_changed {
            info!("Page navigated to a new origin, resetting session");
            self.queue.clear(&self.session);
            self.session.force_disconnect().await?;
        }
        Ok(Routed::PageInfo { origin_changed })
    }

    fn reject(&self, request: &SignedRequest) -> Result<Routed, BridgeError> {
        warn!(
            "Rejecting request {} ({}): bad signature",
            request.id(),
            request.method()
        );
        if request.method() == RPC_REQUEST_METHOD {
            self.session.send_response(Response::failure(
                request.id(),
                ProviderError::new(UNAUTHORIZED, "Unauthorized request signature"),
            ))?;
        }
        Ok(Routed::Rejected)
    }
}

fn log_line(context: &Value) -> String {
    match context {
        Value::String(line) => line.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(line)) => line.clone(),
            _ => context.to_string(),
        },
        other => other.to_string(),
    }
}
