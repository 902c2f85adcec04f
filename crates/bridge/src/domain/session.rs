use bridge_core::{encode, CoreError, Envelope, Event, PageInfo, Response};
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use url::Url;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("page channel closed")]
    ChannelClosed,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] CoreError),
}

/// Outbound half of the transport to one embedded page
pub trait PageSink: Send + Sync {
    fn send(&self, message: String) -> Result<(), SessionError>;
}

impl PageSink for mpsc::UnboundedSender<String> {
    fn send(&self, message: String) -> Result<(), SessionError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| SessionError::ChannelClosed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub icon_url: Option<String>,
    pub active_address: Option<String>,
}

/// What the approval dialog shows about the requesting page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOrigin {
    pub domain: String,
    pub title: Option<String>,
    pub icon_url: Option<String>,
}

/// Shared handle to one page's session state and its outbound channel
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<RwLock<Session>>,
    sink: Arc<dyn PageSink>,
    network: String,
}

impl SessionHandle {
    pub fn new(sink: Arc<dyn PageSink>, network: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(Session::default())),
            sink,
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub async fn snapshot(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn active_address(&self) -> Option<String> {
        self.state.read().await.active_address.clone()
    }

    pub async fn origin(&self) -> PageOrigin {
        let session = self.state.read().await;
        PageOrigin {
            domain: session
                .page_url
                .as_deref()
                .map(domain_of)
                .unwrap_or_default(),
            title: session.page_title.clone(),
            icon_url: session.icon_url.clone(),
        }
    }

    /// Store page metadata. Returns true when the page moved to a different
    /// origin than the one previously reported.
    pub async fn update_page_info(&self, info: PageInfo) -> bool {
        let mut session = self.state.write().await;
        let changed = session
            .page_url
            .as_deref()
            .is_some_and(|previous| origin_of(previous) != origin_of(&info.url));

        debug!("Page info updated: {}", info.url);
        session.page_url = Some(info.url);
        session.page_title = info.title;
        session.icon_url = info.icon_url;
        changed
    }

    pub fn send_response(&self, response: Response) -> Result<(), SessionError> {
        self.send(response.into())
    }

    pub fn send_event(&self, event: Event) -> Result<(), SessionError> {
        self.send(event.into())
    }

    fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.sink.send(encode(&envelope)?)
    }

    /// Record the authorized address and tell the page about it
    pub async fn connect(&self, address: &str) -> Result<(), SessionError> {
        self.state.write().await.active_address = Some(address.to_string());
        info!("Page connected as {}", address);
        self.send_event(self.event("connect", vec![address.into()]))
    }

    /// Always emits `disconnect`, whatever the prior state
    pub async fn force_disconnect(&self) -> Result<(), SessionError> {
        if let Some(address) = self.state.write().await.active_address.take() {
            info!("Page disconnected from {}", address);
        }
        self.send_event(self.event("disconnect", Vec::new()))
    }

    fn event(&self, name: &str, args: Vec<serde_json::Value>) -> Event {
        Event {
            network: self.network.clone(),
            name: name.to_string(),
            args,
        }
    }
}

fn origin_of(page_url: &str) -> String {
    Url::parse(page_url)
        .map(|url| url.origin().ascii_serialization())
        .unwrap_or_else(|_| page_url.to_string())
}

fn domain_of(page_url: &str) -> String {
    Url::parse(page_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| page_url.to_string())
}
