//! Listener lists for catalog notifications.
//!
//! A [`ListenerList`] only holds weak references to callbacks. The strong reference lives in the
//! [`Listener`] handle returned at registration, so dropping the handle unsubscribes.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
};

use crossbeam_skiplist::SkipSet;
use uuid::Uuid;

use crate::document::PersistableKind;

/// An event that can be dispatched to listeners.
pub trait Event: fmt::Debug + Send + Sync {
    /// What each listener returns.
    type HandlerReturnType: fmt::Debug;

    /// Folds a listener's return value into the event before the next listener sees it.
    fn update(&mut self, _handler_result: Self::HandlerReturnType) {}
}

type Callback<E> = dyn Fn(&E) -> <E as Event>::HandlerReturnType + Send + Sync;

struct ListenerEntry<E: Event> {
    callback: Weak<Callback<E>>,
    order: usize,
}

// Entries are ordered (and identified) by registration order only.
impl<E: Event> Eq for ListenerEntry<E> {}

impl<E: Event> PartialEq for ListenerEntry<E> {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl<E: Event> Ord for ListenerEntry<E> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order.cmp(&other.order)
    }
}

impl<E: Event> PartialOrd for ListenerEntry<E> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

static NEXT_LISTENER: AtomicUsize = AtomicUsize::new(0);

/// Listeners for events of type `E`, called in registration order.
pub struct ListenerList<E: Event> {
    inner: SkipSet<ListenerEntry<E>>,
}

impl<E: Event + 'static> ListenerList<E> {
    pub fn new() -> Self {
        ListenerList { inner: SkipSet::new() }
    }

    /// Number of registrations, including ones whose handle was dropped since the last dispatch.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Calls every live listener in order and prunes the ones whose handle was dropped.
    ///
    /// Only the owning crate dispatches, so consumers can listen but not forge events.
    pub(crate) fn dispatch(&self, event: &mut E) {
        for entry in self.inner.iter() {
            match entry.callback.upgrade() {
                Some(callback) => {
                    let result = callback(event);
                    event.update(result);
                }
                None => {
                    entry.remove();
                }
            }
        }
    }
}

impl<E: Event + 'static> Default for ListenerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for ListenerList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList").field("listener_count", &self.inner.len()).finish()
    }
}

/// An active registration. Dropping it deregisters the callback; the stale entry is pruned on
/// the next dispatch.
pub struct Listener<E: Event> {
    _callback: Arc<Callback<E>>,
    order: usize,
}

impl<E: Event + 'static> Listener<E> {
    /// Registers `callback` with `listeners`. Keep the returned handle alive for as long as the
    /// callback should be called.
    pub fn new<F>(listeners: &ListenerList<E>, callback: F) -> Self
    where
        F: Fn(&E) -> E::HandlerReturnType + Send + Sync + 'static,
    {
        let order = NEXT_LISTENER.fetch_add(1, Ordering::SeqCst);
        let callback: Arc<Callback<E>> = Arc::new(callback);
        listeners.inner.insert(ListenerEntry { callback: Arc::downgrade(&callback), order });
        Listener { _callback: callback, order }
    }
}

impl<E: Event> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("order", &self.order).finish()
    }
}

/// Defines a struct with one public `ListenerList` per named event.
macro_rules! define_event_listeners {
    ($struct_name:ident { $($field_name:ident: $event_type:ty),* $(,)? }) => {
        /// Listener lists, one per event.
        #[derive(Debug, Default)]
        pub struct $struct_name {
            $(
                pub $field_name: $crate::event::ListenerList<$event_type>,
            )*
        }

        impl $struct_name {
            pub fn new() -> Self {
                Self {
                    $(
                        $field_name: $crate::event::ListenerList::new(),
                    )*
                }
            }
        }
    };
}

pub(crate) use define_event_listeners;

/// A mutation applied to the catalog snapshot.
///
/// Dispatched on the coordinating thread after the snapshot reflects the change, so listeners may
/// call `Catalog::get_persistable_by_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChanged {
    /// A store was registered and its initial items were loaded.
    Registered { kind: PersistableKind, count: usize },
    Created(Uuid),
    Updated(Uuid),
    Deleted(Uuid),
    Imported { created: Vec<Uuid>, updated: Vec<Uuid> },
}

impl Event for CatalogChanged {
    type HandlerReturnType = ();
}

define_event_listeners!(CatalogEvents {
    changed: CatalogChanged,
});
