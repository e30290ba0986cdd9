//! Sesiones de voz detrás de un seam de traits.
//!
//! El resto del bot habla con [`VoiceConnector`] / [`VoiceSession`]; la única
//! implementación real envuelve Songbird. Los tests usan sesiones falsas.

use anyhow::anyhow;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{File, Input},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::PlayerError;

/// Primitiva de conexión: entrega una sesión viva para un canal de voz.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, PlayerError>;
}

/// Sesión de voz activa para un guild.
///
/// `play` transmite un archivo local y recién retorna cuando la pista
/// terminó (o fue detenida); es la llamada que mantiene ocupado al worker
/// durante la duración real de la pista.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    async fn play(&self, path: &Path, volume: f32) -> Result<(), PlayerError>;
    async fn pause(&self) -> Result<(), PlayerError>;
    async fn resume(&self) -> Result<(), PlayerError>;
    /// Corta la pista en curso; `play` retorna poco después.
    async fn stop_playing(&self);
    /// Salta hacia adelante/atrás dentro de la pista actual. No-op sin pista.
    async fn seek(&self, offset_secs: i64) -> Result<(), PlayerError>;
    async fn set_volume(&self, volume: f32) -> Result<(), PlayerError>;
    /// Abandona el canal de voz y libera la sesión.
    async fn destroy(&self);
}

/// Conector real sobre el manager de Songbird.
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, PlayerError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlayerError::Internal(anyhow!("no pude conectar al canal de voz: {e}")))?;

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);
        Ok(Arc::new(SongbirdSession {
            manager: self.manager.clone(),
            guild_id,
            call,
            current: parking_lot::Mutex::new(None),
        }))
    }
}

/// Sesión real: un `Call` de Songbird más el handle de la pista en curso.
pub struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    current: parking_lot::Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    fn current_handle(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn play(&self, path: &Path, volume: f32) -> Result<(), PlayerError> {
        let input: Input = File::new(path.to_path_buf()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };
        let _ = handle.set_volume(volume);

        let done = Arc::new(Notify::new());
        let errored = Arc::new(AtomicBool::new(false));
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackDone {
                    done: done.clone(),
                    errored: errored.clone(),
                    mark_error: false,
                },
            )
            .map_err(|e| PlayerError::PlaybackFailure(anyhow!("{e:?}")))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackDone {
                    done: done.clone(),
                    errored: errored.clone(),
                    mark_error: true,
                },
            )
            .map_err(|e| PlayerError::PlaybackFailure(anyhow!("{e:?}")))?;

        // Falla acá si el archivo no existe o no se puede decodificar.
        if let Err(e) = handle.make_playable_async().await {
            let _ = handle.stop();
            return Err(PlayerError::PlaybackFailure(anyhow!(
                "{}: {e:?}",
                path.display()
            )));
        }

        *self.current.lock() = Some(handle);
        done.notified().await;
        *self.current.lock() = None;

        if errored.load(Ordering::SeqCst) {
            return Err(PlayerError::PlaybackFailure(anyhow!(
                "la pista terminó con error: {}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        if let Some(handle) = self.current_handle() {
            handle
                .pause()
                .map_err(|e| PlayerError::Internal(anyhow!("{e:?}")))?;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlayerError> {
        if let Some(handle) = self.current_handle() {
            handle
                .play()
                .map_err(|e| PlayerError::Internal(anyhow!("{e:?}")))?;
        }
        Ok(())
    }

    async fn stop_playing(&self) {
        if let Some(handle) = self.current_handle() {
            let _ = handle.stop();
        }
    }

    async fn seek(&self, offset_secs: i64) -> Result<(), PlayerError> {
        let Some(handle) = self.current_handle() else {
            return Ok(());
        };

        let info = handle
            .get_info()
            .await
            .map_err(|e| PlayerError::Internal(anyhow!("{e:?}")))?;
        let target = if offset_secs >= 0 {
            info.position + Duration::from_secs(offset_secs as u64)
        } else {
            info.position
                .saturating_sub(Duration::from_secs(offset_secs.unsigned_abs()))
        };

        handle
            .seek_async(target)
            .await
            .map_err(|e| PlayerError::Internal(anyhow!("seek falló: {e:?}")))?;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        if let Some(handle) = self.current_handle() {
            handle
                .set_volume(volume)
                .map_err(|e| PlayerError::Internal(anyhow!("{e:?}")))?;
        }
        Ok(())
    }

    async fn destroy(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
        }
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz: {e}");
        } else {
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
    }
}

/// Despierta al worker cuando la pista termina (fin normal o con error).
struct TrackDone {
    done: Arc<Notify>,
    errored: Arc<AtomicBool>,
    mark_error: bool,
}

#[async_trait]
impl VoiceEventHandler for TrackDone {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.mark_error {
            self.errored.store(true, Ordering::SeqCst);
        }
        self.done.notify_one();
        None
    }
}
