//! Per-connection subscription table.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::Result,
    transport::{SessionId, SubscriptionId, Trampoline, Transport},
    types::{DomainHandle, EventKind},
};

/// Identity of a registered listener: the address of its `Arc`.
///
/// The registration keeps the `Arc` alive through its trampoline, so the
/// address cannot be reused while the key is in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerKey(usize);

impl ListenerKey {
    pub(crate) fn of<L: ?Sized>(listener: &Arc<L>) -> Self {
        Self(Arc::as_ptr(listener).cast::<()>() as usize)
    }
}

/// One active subscription.
pub(crate) struct ListenerRegistration {
    remote_id: SubscriptionId,
    domain: Option<DomainHandle>,
    // Sole strong reference; the transport only holds a `Weak`.
    trampoline: Arc<dyn Trampoline>,
}

impl ListenerRegistration {
    pub(crate) fn remote_id(&self) -> SubscriptionId {
        self.remote_id
    }

    pub(crate) fn domain(&self) -> Option<&DomainHandle> {
        self.domain.as_ref()
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("remote_id", &self.remote_id)
            .field("domain", &self.domain)
            .field("kind", &self.trampoline.kind())
            .finish()
    }
}

/// Outcome of [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registered {
    /// A new subscription was created.
    Added(SubscriptionId),
    /// The listener was already registered for that kind.
    AlreadyPresent,
}

/// `EventKind -> (listener -> registration)`.
///
/// The lock is held across the transport call so two threads adding the same
/// listener cannot both create a subscription.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
    maps: Mutex<HashMap<EventKind, HashMap<ListenerKey, ListenerRegistration>>>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribe `key` to `kind` unless it already is.
    ///
    /// On transport failure the table is left untouched.
    pub(crate) fn register<F>(
        &self,
        transport: &dyn Transport,
        session: SessionId,
        kind: EventKind,
        key: ListenerKey,
        domain: Option<&DomainHandle>,
        make_trampoline: F,
    ) -> Result<Registered>
    where
        F: FnOnce() -> Arc<dyn Trampoline>,
    {
        let mut maps = self.maps.lock();
        if maps.get(&kind).is_some_and(|m| m.contains_key(&key)) {
            return Ok(Registered::AlreadyPresent);
        }

        let trampoline = make_trampoline();
        let remote_id =
            transport.register_event_callback(session, domain, kind, Arc::downgrade(&trampoline))?;

        maps.entry(kind).or_default().insert(
            key,
            ListenerRegistration {
                remote_id,
                domain: domain.cloned(),
                trampoline,
            },
        );
        Ok(Registered::Added(remote_id))
    }

    /// Cancel and remove the registration of `key` for `kind`.
    ///
    /// Returns `None` when there was nothing to remove. On transport failure
    /// the registration stays in place.
    pub(crate) fn deregister(
        &self,
        transport: &dyn Transport,
        session: SessionId,
        kind: EventKind,
        key: ListenerKey,
    ) -> Result<Option<ListenerRegistration>> {
        let mut maps = self.maps.lock();
        let Some(by_listener) = maps.get_mut(&kind) else {
            return Ok(None);
        };
        let Some(registration) = by_listener.get(&key) else {
            return Ok(None);
        };

        transport.deregister_event_callback(session, registration.remote_id)?;

        let removed = by_listener.remove(&key);
        if by_listener.is_empty() {
            maps.remove(&kind);
        }
        Ok(removed)
    }

    /// Remove every registration without contacting the transport.
    pub(crate) fn drain(&self) -> Vec<(EventKind, ListenerRegistration)> {
        let mut maps = self.maps.lock();
        maps.drain()
            .flat_map(|(kind, by_listener)| {
                by_listener
                    .into_values()
                    .map(move |registration| (kind, registration))
            })
            .collect()
    }

    /// Number of registrations for `kind`.
    pub(crate) fn len(&self, kind: EventKind) -> usize {
        self.maps.lock().get(&kind).map_or(0, HashMap::len)
    }

    #[cfg(test)]
    pub(crate) fn trampoline(
        &self,
        kind: EventKind,
        key: ListenerKey,
    ) -> Option<std::sync::Weak<dyn Trampoline>> {
        self.maps
            .lock()
            .get(&kind)?
            .get(&key)
            .map(|registration| Arc::downgrade(&registration.trampoline))
    }
}
