use serde_json::Value;
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

pub type Listener = Rc<dyn Fn(&[Value])>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Page-local emitter. It never crosses the wire; the host has its own.
#[derive(Default)]
pub struct EventEmitter {
    next_id: Cell<u64>,
    listeners: RefCell<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, name: &str, listener: impl Fn(&[Value]) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(entries) = listeners.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        before != entries.len()
    }

    /// Returns how many listeners ran. Listeners may register or remove
    /// listeners while being called.
    pub fn emit(&self, name: &str, args: &[Value]) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.borrow().get(name) {
            Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
            None => return 0,
        };
        for listener in &snapshot {
            listener(args);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.borrow().get(name).map_or(0, Vec::len)
    }
}
