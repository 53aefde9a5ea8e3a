use crate::host::ActivitySignal;
use crate::scheduler::CancelToken;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

pub type Handler = Rc<dyn Fn(ActivitySignal)>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: BTreeMap<u64, (ActivitySignal, Handler)>,
}

/// Synchronous signal dispatcher used by trackers to deliver activity.
#[derive(Clone, Default)]
pub struct SignalHub {
    handlers: Rc<RefCell<Handlers>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, signal: ActivitySignal, handler: Handler) -> CancelToken {
        let id = {
            let mut handlers = self.handlers.borrow_mut();
            let id = handlers.next_id;
            handlers.next_id += 1;
            handlers.entries.insert(id, (signal, handler));
            id
        };

        let weak: Weak<RefCell<Handlers>> = Rc::downgrade(&self.handlers);
        CancelToken::new(move || {
            if let Some(handlers) = weak.upgrade() {
                let removed = handlers.borrow_mut().entries.remove(&id);
                drop(removed);
            }
        })
    }

    /// Invokes every handler connected to `signal`. Handlers disconnected by
    /// an earlier handler in the same emission are skipped.
    pub fn emit(&self, signal: ActivitySignal) -> usize {
        let ids: Vec<u64> = self
            .handlers
            .borrow()
            .entries
            .iter()
            .filter(|(_, (s, _))| *s == signal)
            .map(|(id, _)| *id)
            .collect();

        let mut delivered = 0;
        for id in ids {
            let handler = match self.handlers.borrow().entries.get(&id) {
                Some((_, handler)) => handler.clone(),
                None => continue,
            };
            handler(signal);
            delivered += 1;
        }
        delivered
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.borrow().entries.len()
    }
}
