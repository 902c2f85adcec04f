use async_channel::{Receiver, Sender};
use bridge_core::{ProviderError, Response, SignedRequest};
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::{dispatcher::MethodDispatcher, session::SessionHandle};

/// A request tagged with the page epoch it arrived in
pub struct Queued {
    pub request: SignedRequest,
    epoch: u64,
}

/// Epoch bumps on every clear; requests from an older epoch never start.
#[derive(Default)]
struct InFlight {
    epoch: u64,
    current: Option<CancellationToken>,
}

/// FIFO of rpc requests waiting for the dispatch loop
#[derive(Clone)]
pub struct RequestQueue {
    sender: Sender<Queued>,
    receiver: Receiver<Queued>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            in_flight: Arc::new(Mutex::new(InFlight::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false once the queue has been closed
    pub fn push(&self, request: SignedRequest) -> bool {
        let state = self.state();
        self.sender
            .try_send(Queued {
                request,
                epoch: state.epoch,
            })
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub async fn next(&self) -> Option<Queued> {
        self.receiver.recv().await.ok()
    }

    /// Mark `queued` as the running request. Returns its cancellation token,
    /// or `None` when the queue was cleared after it arrived.
    pub fn begin(&self, queued: &Queued, parent: &CancellationToken) -> Option<CancellationToken> {
        let mut state = self.state();
        if queued.epoch != state.epoch {
            return None;
        }
        let token = parent.child_token();
        state.current = Some(token.clone());
        Some(token)
    }

    pub fn finish(&self) {
        self.state().current = None;
    }

    /// End the running request and drop every queued one, answering each
    /// queued request with "Session ended"
    pub fn clear(&self, session: &SessionHandle) -> usize {
        let mut state = self.state();
        state.epoch += 1;
        if let Some(current) = state.current.take() {
            debug!("Cancelling in-flight request");
            current.cancel();
        }

        let mut dropped = 0;
        while let Ok(queued) = self.receiver.try_recv() {
            dropped += 1;
            let id = queued.request.id();
            let ended = Response::failure(id, ProviderError::session_ended());
            if let Err(e) = session.send_response(ended) {
                debug!("Could not tell page request {} ended: {}", id, e);
            }
        }
        if dropped > 0 {
            info!("Cleared {} queued requests", dropped);
        }
        dropped
    }

    pub fn close(&self) {
        self.sender.close();
    }
}

/// Drains one session's queue, one request at a time
pub struct DispatchLoop {
    queue: RequestQueue,
    dispatcher: Arc<MethodDispatcher>,
    session: SessionHandle,
    cancel_token: CancellationToken,
}

impl DispatchLoop {
    pub fn new(
        queue: RequestQueue,
        dispatcher: Arc<MethodDispatcher>,
        session: SessionHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            session,
            cancel_token,
        }
    }

    pub async fn run(&self) -> Result<(), anyhow::Error> {
        info!("Starting dispatch loop");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Dispatch loop received cancellation");
                break;
            }

            let queued = select! {
                next = self.queue.next() => match next {
                    Some(queued) => queued,
                    None => {
                        info!("Request queue closed");
                        break;
                    }
                },
                _ = self.cancel_token.cancelled() => {
                    info!("Dispatch loop cancelled while idle");
                    break;
                }
            };
            let started = self.queue.begin(&queued, &self.cancel_token);
            let request = queued.request;

            let Some(token) = started else {
                debug!("Request {} outlived its page, ending it", request.id());
                self.respond(Response::failure(request.id(), ProviderError::session_ended()));
                continue;
            };

            select! {
                biased;
                _ = token.cancelled() => {
                    info!("Request {} cancelled while in flight", request.id());
                    self.respond(Response::failure(request.id(), ProviderError::session_ended()));
                }
                _ = self.process(&request) => {}
            }
            self.queue.finish();
        }

        Ok(())
    }

    async fn process(&self, request: &SignedRequest) {
        let id = request.id();
        let outcome = AssertUnwindSafe(self.dispatcher.dispatch(&self.session, request))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(Some(result))) => self.respond(Response::success(id, result)),
            Ok(Ok(None)) => self.respond(Response::empty(id)),
            Ok(Err(e)) if e.is_fatal() => {
                error!("Request {} failed, disconnecting session: {}", id, e);
                self.respond(Response::failure(id, e.to_provider_error()));
                self.disconnect().await;
            }
            Ok(Err(e)) => {
                warn!("Request {} declined: {}", id, e);
                self.respond(Response::failure(id, e.to_provider_error()));
            }
            Err(_) => {
                error!("Handler for {} panicked, disconnecting session", id);
                self.respond(Response::failure(id, ProviderError::internal()));
                self.disconnect().await;
            }
        }
    }

    fn respond(&self, response: Response) {
        let id = response.id;
        match self.session.send_response(response) {
            Ok(_) => debug!("Responded to {}", id),
            Err(e) => warn!("Could not respond to {}: {}", id, e),
        }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.session.force_disconnect().await {
            warn!("Could not send disconnect event: {}", e);
        }
    }
}
