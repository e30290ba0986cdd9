use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    audio::{now_playing::NowPlaying, queue::TrackQueue},
    voice::VoiceSession,
};

/// Estado mutable de reproducción de un guild.
///
/// Lo mutan los comandos a través del controller; el worker solo lee el
/// volumen al arrancar cada pista.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackState {
    pub volume: f32,
}

impl PlaybackState {
    pub fn new(volume: f32) -> Self {
        Self { volume }
    }
}

/// Worker de reproducción: una tarea por guild, viva mientras dure el
/// proceso.
///
/// El bucle: esperar una sesión de voz (sondeo a intervalo fijo, la sesión
/// la establece `/join` o el join implícito de `/play`), desencolar,
/// publicar "ahora suena", reproducir (bloquea por la duración real de la
/// pista), limpiar el registro y, si la cola quedó vacía, soltar la sesión
/// para no retener la conexión de voz al ocioso.
///
/// Ningún error de reproducción tumba al worker: se loguea y se sigue con
/// la próxima pista.
pub struct PlaybackWorker {
    pub guild_id: GuildId,
    pub queue: Arc<TrackQueue>,
    pub sessions: Arc<DashMap<GuildId, Arc<dyn VoiceSession>>>,
    pub now_playing: Arc<NowPlaying>,
    pub state: Arc<RwLock<PlaybackState>>,
    pub poll_interval: Duration,
}

impl PlaybackWorker {
    pub async fn run(self) {
        info!("🛠️ Worker de reproducción iniciado para guild {}", self.guild_id);

        loop {
            if self.wait_for_session().await.is_none() {
                debug!("Worker de guild {} cerrado", self.guild_id);
                break;
            }

            let Some(track) = self.queue.dequeue().await else {
                debug!("Worker de guild {} cerrado", self.guild_id);
                break;
            };

            // La sesión pudo cambiar mientras esperábamos en la cola
            // (desconexión forzada + reconexión); releemos la vigente.
            let Some(session) = self.wait_for_session().await else {
                break;
            };

            let title = track.display_title().to_string();
            self.now_playing.set(self.guild_id, title.clone());
            info!("▶️ Reproduciendo en guild {}: {}", self.guild_id, title);

            let volume = self.state.read().volume;
            if let Err(e) = session.play(&track.path, volume).await {
                warn!(
                    "🎶 Fallo de reproducción en guild {} ({}): {}",
                    self.guild_id, title, e
                );
            }
            self.now_playing.clear(self.guild_id);

            if self.queue.is_empty() {
                if let Some((_, session)) = self.sessions.remove(&self.guild_id) {
                    // Un `play` pudo encolar viendo la sesión todavía en el
                    // mapa; si llegó algo, la devolvemos en vez de soltarla.
                    if self.queue.is_empty() {
                        info!("💤 Cola vacía en guild {}, soltando sesión", self.guild_id);
                        session.destroy().await;
                    } else {
                        self.sessions.insert(self.guild_id, session);
                    }
                }
            }
        }
    }

    /// Sondea hasta que haya una sesión ligada al guild. Queda usable a lo
    /// sumo un intervalo de sondeo después de crearse. Devuelve `None` si la
    /// cola se cierra mientras no hay sesión (apagado del proceso).
    async fn wait_for_session(&self) -> Option<Arc<dyn VoiceSession>> {
        loop {
            if let Some(session) = self.sessions.get(&self.guild_id) {
                return Some(session.clone());
            }
            if self.queue.is_closed() {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::QueuedTrack;
    use crate::audio::testutil::FakeSession;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::path::PathBuf;

    fn track(name: &str) -> QueuedTrack {
        QueuedTrack {
            path: PathBuf::from(format!("/tmp/{name}.opus")),
            title: Some(name.to_string()),
            url: format!("https://example.com/{name}"),
            duration: None,
            requested_by: UserId::new(1),
            added_at: Utc::now(),
        }
    }

    fn worker_setup(
        session: Arc<FakeSession>,
    ) -> (PlaybackWorker, Arc<TrackQueue>, Arc<NowPlaying>) {
        let guild_id = GuildId::new(1);
        let queue = Arc::new(TrackQueue::new());
        let sessions: Arc<DashMap<GuildId, Arc<dyn VoiceSession>>> = Arc::new(DashMap::new());
        sessions.insert(guild_id, session as Arc<dyn VoiceSession>);
        let now_playing = Arc::new(NowPlaying::new());

        let worker = PlaybackWorker {
            guild_id,
            queue: queue.clone(),
            sessions,
            now_playing: now_playing.clone(),
            state: Arc::new(RwLock::new(PlaybackState::new(0.5))),
            poll_interval: Duration::from_millis(10),
        };
        (worker, queue, now_playing)
    }

    #[tokio::test]
    async fn una_falla_no_tumba_al_worker() {
        let session = FakeSession::instant();
        let (worker, queue, now_playing) = worker_setup(session.clone());

        // "fail" hace que la sesión falsa devuelva PlaybackFailure.
        queue.enqueue(track("fail-corrupta"));
        queue.enqueue(track("sana"));

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let played = session.played_titles();
        assert_eq!(played, vec!["fail-corrupta", "sana"]);
        assert_eq!(now_playing.get(GuildId::new(1)), None);
        assert!(!handle.is_finished());

        queue.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("el worker no cerró")
            .unwrap();
    }

    #[tokio::test]
    async fn conserva_la_sesion_mientras_sigan_llegando_pistas() {
        let session = FakeSession::with_duration(Duration::from_millis(150));
        let (worker, queue, _) = worker_setup(session.clone());
        let sessions = worker.sessions.clone();

        queue.enqueue(track("una"));
        tokio::spawn(worker.run());

        // Encolamos mientras la primera sigue sonando.
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(track("dos"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(session.played_titles(), vec!["una", "dos"]);
        assert!(!session.is_destroyed());
        assert!(sessions.contains_key(&GuildId::new(1)));
    }

    #[tokio::test]
    async fn suelta_la_sesion_al_vaciarse_la_cola() {
        let session = FakeSession::instant();
        let (worker, queue, _) = worker_setup(session.clone());
        let sessions = worker.sessions.clone();

        queue.enqueue(track("unica"));
        tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(session.is_destroyed());
        assert!(sessions.is_empty());
    }
}
