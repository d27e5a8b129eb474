use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::listener::{Listener, ListenerOptions};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::models::{Room, RoomId};
use crate::source::RoomSource;

/// Owns the active listeners, at most one per room.
///
/// Mutations are serialized by the registry-wide write lock; lookups share the
/// read lock.
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<RoomId, Arc<Listener>>>,
    source: Arc<dyn RoomSource>,
    bus: EventBus,
    options: ListenerOptions,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new(source: Arc<dyn RoomSource>, bus: EventBus, options: ListenerOptions) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            source,
            bus,
            options,
        }
    }

    /// Create, register and start a listener for `room`.
    ///
    /// The listener is registered before it starts, so the first poll runs without
    /// the registry lock held.
    pub async fn add(&self, room: Room) -> Result<Arc<Listener>> {
        let listener = {
            let mut listeners = self.listeners.write().await;
            if listeners.contains_key(&room.id) {
                return Err(Error::AlreadyExists(format!("listener for room {}", room.url)));
            }

            let listener = Arc::new(Listener::new(
                room,
                Arc::clone(&self.source),
                self.bus.clone(),
                self.options.clone(),
            ));
            listeners.insert(listener.room().id.clone(), Arc::clone(&listener));
            listener
        };

        listener.start().await;

        // A remove during start could not close a listener that was not running yet
        let registered = self
            .listeners
            .read()
            .await
            .get(&listener.room().id)
            .is_some_and(|current| Arc::ptr_eq(current, &listener));
        if !registered {
            listener.close();
            return Err(Error::NotFound(format!(
                "listener for room {} removed while starting",
                listener.room().url
            )));
        }

        info!(room_id = %listener.room().id, "Listener added");
        Ok(listener)
    }

    /// Close and deregister the listener for `room_id`
    pub async fn remove(&self, room_id: &RoomId) -> Result<()> {
        let listener = self
            .listeners
            .write()
            .await
            .remove(room_id)
            .ok_or_else(|| Error::NotFound(format!("listener for room {room_id}")))?;

        listener.close();
        info!(room_id = %room_id, "Listener removed");
        Ok(())
    }

    pub async fn has(&self, room_id: &RoomId) -> bool {
        self.listeners.read().await.contains_key(room_id)
    }

    pub async fn get(&self, room_id: &RoomId) -> Result<Arc<Listener>> {
        self.listeners
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("listener for room {room_id}")))
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.listeners.read().await.keys().cloned().collect()
    }

    /// Close and deregister every listener. Used at shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.listeners.write().await.drain().collect();
        debug!(count = drained.len(), "Closing all listeners");
        for (_, listener) in drained {
            listener.close();
        }
    }
}
