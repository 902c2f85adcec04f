use bridge_core::ProviderError;
use futures::channel::oneshot;
use log::debug;
use serde_json::Value;
use std::{cell::RefCell, collections::HashMap};
use uuid::Uuid;

pub type Reply = Result<Value, ProviderError>;

/// Requests waiting for a host response, keyed by request id
#[derive(Default)]
pub struct PendingCalls {
    calls: RefCell<HashMap<Uuid, oneshot::Sender<Reply>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid) -> Result<oneshot::Receiver<Reply>, ProviderError> {
        let mut calls = self.calls.borrow_mut();
        if calls.contains_key(&id) {
            return Err(ProviderError::unexpected(format!(
                "Request {} is already pending",
                id
            )));
        }
        let (tx, rx) = oneshot::channel();
        calls.insert(id, tx);
        Ok(rx)
    }

    /// Returns false when nothing was waiting on `id`; duplicates and replays
    /// land here and are ignored.
    pub fn settle(&self, id: Uuid, reply: Reply) -> bool {
        let waiter = self.calls.borrow_mut().remove(&id);
        match waiter {
            Some(tx) => {
                if tx.send(reply).is_err() {
                    debug!("Caller for request {} went away before the reply", id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.calls.borrow_mut().remove(&id);
    }

    pub fn reject_all(&self, error: ProviderError) -> usize {
        let drained: Vec<_> = self.calls.borrow_mut().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }
}
