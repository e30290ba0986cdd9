use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::Notify;
use tracing::info;

use crate::sources::ResolvedTrack;

/// Pista ya resuelta esperando en la cola de un guild.
#[derive(Debug, Clone)]
pub struct QueuedTrack {
    pub path: PathBuf,
    pub title: Option<String>,
    pub url: String,
    pub duration: Option<Duration>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueuedTrack {
    pub fn new(track: ResolvedTrack, requested_by: UserId) -> Self {
        Self {
            path: track.path,
            title: track.title,
            url: track.url,
            duration: track.duration,
            requested_by,
            added_at: Utc::now(),
        }
    }

    /// Título para mostrar; cae a la URL canónica si la fuente no dio uno.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// Cola FIFO de un guild, sin límite de tamaño.
///
/// Un solo consumidor (el worker del guild) llama a `dequeue`; los handlers
/// de comandos encolan y limpian desde cualquier tarea.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: Mutex<VecDeque<QueuedTrack>>,
    notify: Notify,
    closed: AtomicBool,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega al final. Nunca bloquea.
    pub fn enqueue(&self, track: QueuedTrack) {
        info!("➕ En cola: {}", track.display_title());
        self.items.lock().push_back(track);
        self.notify.notify_one();
    }

    /// Saca la cabeza, esperando si la cola está vacía. Devuelve `None`
    /// recién cuando la cola fue cerrada (apagado del proceso).
    pub async fn dequeue(&self) -> Option<QueuedTrack> {
        loop {
            if let Some(track) = self.items.lock().pop_front() {
                return Some(track);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Vacía la cola de una sola vez. No afecta la pista ya desencolada
    /// que esté sonando.
    pub fn clear(&self) {
        let removed = {
            let mut items = self.items.lock();
            let n = items.len();
            items.clear();
            n
        };
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} pistas)", removed);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cierra la cola y despierta al worker bloqueado en `dequeue`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
