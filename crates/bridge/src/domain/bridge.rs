use log::{error, info};
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    adapter::{BridgeError, ChannelAdapter, Routed},
    dispatcher::MethodDispatcher,
    queue::{DispatchLoop, RequestQueue},
    session::{PageSink, SessionHandle},
};
use crate::infra::secrets::ChannelSecret;

#[derive(Clone)]
pub struct BridgeConfig {
    pub secret: Arc<ChannelSecret>,
    pub enforce_request_signatures: bool,
    pub network: String,
}

/// One mounted embedded surface: its session, queue and dispatch loop
pub struct Bridge {
    adapter: ChannelAdapter,
    session: SessionHandle,
    queue: RequestQueue,
    cancel_token: CancellationToken,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        dispatcher: Arc<MethodDispatcher>,
        sink: Arc<dyn PageSink>,
        task_tracker: &TaskTracker,
        cancel_token: &CancellationToken,
    ) -> Self {
        let session = SessionHandle::new(sink, config.network);
        let queue = RequestQueue::new();
        let cancel_token = cancel_token.child_token();

        let dispatch_loop = DispatchLoop::new(
            queue.clone(),
            dispatcher,
            session.clone(),
            cancel_token.clone(),
        );
        task_tracker.spawn(async move {
            if let Err(e) = dispatch_loop.run().await {
                error!("Dispatch loop failed: {}", e);
            }
        });

        Self {
            adapter: ChannelAdapter::new(
                config.secret,
                config.enforce_request_signatures,
                session.clone(),
                queue.clone(),
            ),
            session,
            queue,
            cancel_token,
        }
    }

    pub async fn on_message(&self, raw: &str) -> Result<Routed, BridgeError> {
        if self.cancel_token.is_cancelled() {
            return Err(BridgeError::Closed);
        }
        self.adapter.on_message(raw).await
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Stop the dispatch loop and answer everything still queued
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.queue.close();
        let dropped = self.queue.clear(&self.session);
        info!("Bridge session shut down, {} queued requests ended", dropped);
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
