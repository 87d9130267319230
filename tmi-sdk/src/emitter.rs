//! Handler registry the client raises events through.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::event::{Event, EventKind};

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, Vec<Entry>>,
    any: Vec<Entry>,
}

/// Thread-safe event handler registry.
///
/// `emit` snapshots the matching handlers before calling any of them, so a
/// handler may register or remove handlers (itself included) while running.
#[derive(Default)]
pub struct Emitter {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, kind: EventKind, once: bool, handler: Handler) -> HandlerId {
        let id = self.next_id();
        self.registry
            .write()
            .by_kind
            .entry(kind)
            .or_default()
            .push(Entry { id, once, handler });
        id
    }

    /// Call `handler` for every event of `kind` (or aliased to `kind`).
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(kind, false, Arc::new(handler))
    }

    /// Like [`on`](Self::on), but the handler is removed after its first call.
    pub fn once<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(kind, true, Arc::new(handler))
    }

    /// Call `handler` once for every emitted event, whatever its kind.
    pub fn on_any<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.registry.write().any.push(Entry {
            id,
            once: false,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut reg = self.registry.write();
        let mut removed = remove_id(&mut reg.any, id);
        for entries in reg.by_kind.values_mut() {
            removed |= remove_id(entries, id);
        }
        removed
    }

    /// Remove every handler for `kind`, or every handler at all with `None`.
    pub fn remove_all(&self, kind: Option<EventKind>) {
        let mut reg = self.registry.write();
        match kind {
            Some(kind) => {
                reg.by_kind.remove(&kind);
            }
            None => {
                reg.by_kind.clear();
                reg.any.clear();
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry.read().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Number of handlers registered with [`on_any`](Self::on_any).
    pub fn catch_all_count(&self) -> usize {
        self.registry.read().any.len()
    }

    /// Deliver `event` to the handlers of its kind, of its alias kinds and to
    /// catch-all handlers. Returns whether any handler ran.
    pub fn emit(&self, event: &Event) -> bool {
        let kind = event.kind();
        let snapshot: Vec<Entry> = {
            let mut reg = self.registry.write();
            let mut snapshot = Vec::new();
            for k in std::iter::once(kind).chain(kind.aliases().iter().copied()) {
                if let Some(entries) = reg.by_kind.get_mut(&k) {
                    snapshot.extend(entries.iter().cloned());
                    entries.retain(|e| !e.once);
                }
            }
            snapshot.extend(reg.any.iter().cloned());
            snapshot
        };

        for entry in &snapshot {
            (entry.handler)(event);
        }
        !snapshot.is_empty()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.registry.read();
        f.debug_struct("Emitter")
            .field("kinds", &reg.by_kind.len())
            .field("any", &reg.any.len())
            .finish()
    }
}

fn remove_id(entries: &mut Vec<Entry>, id: HandlerId) -> bool {
    let before = entries.len();
    entries.retain(|e| e.id != id);
    entries.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn join() -> Event {
        Event::Join {
            channel: "#a".into(),
            username: "b".into(),
            is_self: false,
        }
    }

    #[test]
    fn on_and_off() {
        let em = Emitter::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        let id = em.on(EventKind::Join, move |_| *h.lock() += 1);
        assert!(em.emit(&join()));
        assert!(em.off(id));
        assert!(!em.off(id));
        assert!(!em.emit(&join()));
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn once_fires_once() {
        let em = Emitter::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        em.once(EventKind::Join, move |_| *h.lock() += 1);
        em.emit(&join());
        em.emit(&join());
        assert_eq!(*hits.lock(), 1);
        assert_eq!(em.listener_count(EventKind::Join), 0);
    }

    #[test]
    fn alias_kinds_receive_events() {
        let em = Emitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        em.on(EventKind::Slow, move |e| s.lock().push(e.kind()));
        em.emit(&Event::SlowMode {
            channel: "#a".into(),
            enabled: true,
            seconds: 30,
        });
        assert_eq!(*seen.lock(), vec![EventKind::SlowMode]);
    }

    #[test]
    fn handler_may_remove_itself() {
        let em = Arc::new(Emitter::new());
        let hits = Arc::new(Mutex::new(0));
        let id_slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let (em2, h, slot) = (em.clone(), hits.clone(), id_slot.clone());
        let id = em.on(EventKind::Join, move |_| {
            *h.lock() += 1;
            if let Some(id) = *slot.lock() {
                em2.off(id);
            }
        });
        *id_slot.lock() = Some(id);
        let h2 = hits.clone();
        em.on(EventKind::Join, move |_| *h2.lock() += 10);

        em.emit(&join());
        assert_eq!(*hits.lock(), 11);
        em.emit(&join());
        assert_eq!(*hits.lock(), 21);
    }

    #[test]
    fn remove_all_clears() {
        let em = Emitter::new();
        em.on(EventKind::Join, |_| {});
        em.on(EventKind::Part, |_| {});
        em.remove_all(Some(EventKind::Join));
        assert_eq!(em.listener_count(EventKind::Join), 0);
        assert_eq!(em.listener_count(EventKind::Part), 1);
        em.remove_all(None);
        assert_eq!(em.listener_count(EventKind::Part), 0);
    }
}
