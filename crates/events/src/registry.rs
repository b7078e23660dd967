//! Static event-type → handler routing table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::EventKind;
use crate::handler::EventHandler;

/// Maps each event kind to an ordered list of handlers.
///
/// Built once at wiring time (process startup) and then read-only. Kinds
/// with no registered handlers are acknowledged without action by the
/// consumer; unroutable events are never retried.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the ordered list for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Handlers bound to `kind`, in registration order. Empty when none.
    pub fn handlers_for(&self, kind: EventKind) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn registered_kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.handlers.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (kind, handlers) in &self.handlers {
            map.entry(
                &kind.as_str(),
                &handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            );
        }
        map.finish()
    }
}
