use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    audio::{
        now_playing::NowPlaying,
        queue::{QueuedTrack, TrackQueue},
        worker::{PlaybackState, PlaybackWorker},
    },
    config::Config,
    error::PlayerError,
    sources::{ytdlp::YtDlpClient, TrackResolver},
    voice::{VoiceConnector, VoiceSession},
};

use crate::cache::TrackCache;

/// Cola y estado por guild; los workers comparten estos `Arc`.
#[derive(Clone)]
struct GuildEntry {
    queue: Arc<TrackQueue>,
    state: Arc<RwLock<PlaybackState>>,
}

/// API de reproducción que consumen los comandos.
///
/// Es el único camino por el que los handlers tocan colas, sesiones y el
/// registro de "ahora suena"; nunca mutan esos mapas directamente. Los
/// workers se crean perezosamente con el primer comando que toca un guild.
pub struct PlayerController {
    resolver: TrackResolver,
    entries: DashMap<GuildId, GuildEntry>,
    sessions: Arc<DashMap<GuildId, Arc<dyn VoiceSession>>>,
    now_playing: Arc<NowPlaying>,
    workers: DashMap<GuildId, JoinHandle<()>>,
    poll_interval: Duration,
    default_volume: f32,
}

impl PlayerController {
    pub fn new(resolver: TrackResolver, poll_interval: Duration, default_volume: f32) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
            sessions: Arc::new(DashMap::new()),
            now_playing: Arc::new(NowPlaying::new()),
            workers: DashMap::new(),
            poll_interval,
            default_volume,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let resolver = TrackResolver::new(
            TrackCache::new(config.cache_dir.clone()),
            Arc::new(YtDlpClient::new()),
        );
        Self::new(
            resolver,
            Duration::from_millis(config.session_poll_ms),
            config.default_volume,
        )
    }

    /// Conecta (o reutiliza) la sesión de voz del guild.
    /// Invariante: a lo sumo una sesión activa por guild.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        connector: &dyn VoiceConnector,
    ) -> Result<(), PlayerError> {
        let entry = self.entry_for(guild_id);
        self.ensure_worker(guild_id, &entry);

        if self.sessions.contains_key(&guild_id) {
            debug!("Sesión ya activa en guild {}, reutilizando", guild_id);
            return Ok(());
        }

        let session = connector.connect(guild_id, channel_id).await?;

        // Si otra tarea conectó mientras tanto, conservamos la suya.
        let loser = match self.sessions.entry(guild_id) {
            Entry::Occupied(_) => Some(session),
            Entry::Vacant(slot) => {
                slot.insert(session);
                None
            }
        };
        if let Some(session) = loser {
            session.destroy().await;
        }
        Ok(())
    }

    /// Resuelve la referencia, conecta implícitamente si hace falta y
    /// encola. Devuelve el título aceptado para reportar al usuario.
    pub async fn play(
        &self,
        guild_id: GuildId,
        reference: &str,
        user_channel: Option<ChannelId>,
        connector: &dyn VoiceConnector,
        requested_by: UserId,
    ) -> Result<String, PlayerError> {
        let entry = self.entry_for(guild_id);
        self.ensure_worker(guild_id, &entry);

        let resolved = self.resolver.resolve(reference).await?;

        if !self.sessions.contains_key(&guild_id) {
            let channel_id = user_channel.ok_or(PlayerError::NotInVoiceChannel)?;
            self.join(guild_id, channel_id, connector).await?;
        }

        let track = QueuedTrack::new(resolved, requested_by);
        let title = track.display_title().to_string();
        entry.queue.enqueue(track);
        Ok(title)
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let session = self.session_for(guild_id)?;
        session.pause().await?;
        info!("⏸️ Pausado en guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let session = self.session_for(guild_id)?;
        session.resume().await?;
        info!("▶️ Reanudado en guild {}", guild_id);
        Ok(())
    }

    /// Vacía la cola y corta la pista en curso. No destruye la sesión: el
    /// worker la suelta solo cuando detecta la cola vacía.
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        self.entry_for(guild_id).queue.clear();
        if let Some(session) = self.sessions.get(&guild_id).map(|s| s.clone()) {
            session.stop_playing().await;
        }
        info!("⏹️ Detenido en guild {}", guild_id);
        Ok(())
    }

    /// Corta solo la pista en curso; el worker avanza a la siguiente.
    pub async fn skip(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let session = self.session_for(guild_id)?;
        session.stop_playing().await;
        info!("⏭️ Salteado en guild {}", guild_id);
        Ok(())
    }

    /// Normaliza y aplica el volumen.
    ///
    /// Regla canónica: una entrada > 1 se interpreta como porcentaje y se
    /// divide por 100; el resultado tiene que caer en [0, 1] o la llamada
    /// falla con `InvalidVolume` (150 es error, 100 es 1.0).
    pub async fn set_volume(&self, guild_id: GuildId, input: f32) -> Result<f32, PlayerError> {
        let normalized = if input > 1.0 { input / 100.0 } else { input };
        if !(0.0..=1.0).contains(&normalized) {
            return Err(PlayerError::InvalidVolume(input));
        }

        self.entry_for(guild_id).state.write().volume = normalized;
        if let Some(session) = self.sessions.get(&guild_id).map(|s| s.clone()) {
            session.set_volume(normalized).await?;
        }
        info!(
            "🔊 Volumen de guild {} ajustado a {}%",
            guild_id,
            (normalized * 100.0) as u8
        );
        Ok(normalized)
    }

    /// Salta dentro de la pista actual. No-op si no suena nada.
    pub async fn seek(&self, guild_id: GuildId, offset_secs: i64) -> Result<(), PlayerError> {
        if let Some(session) = self.sessions.get(&guild_id).map(|s| s.clone()) {
            session.seek(offset_secs).await?;
        }
        Ok(())
    }

    /// Título de lo que suena ahora, si hay algo.
    pub fn now_playing(&self, guild_id: GuildId) -> Option<String> {
        self.now_playing.get(guild_id)
    }

    /// Detiene todo y abandona el canal de voz.
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        self.entry_for(guild_id).queue.clear();
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return Err(PlayerError::NoActiveSession);
        };
        session.stop_playing().await;
        session.destroy().await;
        Ok(())
    }

    /// Discord nos sacó del canal: vaciamos la cola, cortamos la pista en
    /// curso, descartamos el handle y limpiamos "ahora suena".
    pub async fn handle_disconnect(&self, guild_id: GuildId) {
        self.entry_for(guild_id).queue.clear();
        if let Some((_, session)) = self.sessions.remove(&guild_id) {
            info!("🔌 Sesión de voz perdida en guild {}", guild_id);
            // Un Call muerto puede no emitir nunca su evento de fin; el stop
            // explícito destraba al worker bloqueado en `play`.
            session.stop_playing().await;
            session.destroy().await;
        }
        self.now_playing.clear(guild_id);
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    pub fn queue_len(&self, guild_id: GuildId) -> usize {
        self.entry_for(guild_id).queue.len()
    }

    /// Cierra las colas para que los workers terminen (apagado del proceso).
    pub fn shutdown(&self) {
        for entry in self.entries.iter() {
            entry.queue.close();
        }
    }

    fn entry_for(&self, guild_id: GuildId) -> GuildEntry {
        self.entries
            .entry(guild_id)
            .or_insert_with(|| GuildEntry {
                queue: Arc::new(TrackQueue::new()),
                state: Arc::new(RwLock::new(PlaybackState::new(self.default_volume))),
            })
            .clone()
    }

    fn session_for(&self, guild_id: GuildId) -> Result<Arc<dyn VoiceSession>, PlayerError> {
        self.sessions
            .get(&guild_id)
            .map(|s| s.clone())
            .ok_or(PlayerError::NoActiveSession)
    }

    fn ensure_worker(&self, guild_id: GuildId, entry: &GuildEntry) {
        self.workers.entry(guild_id).or_insert_with(|| {
            let worker = PlaybackWorker {
                guild_id,
                queue: entry.queue.clone(),
                sessions: self.sessions.clone(),
                now_playing: self.now_playing.clone(),
                state: entry.state.clone(),
                poll_interval: self.poll_interval,
            };
            tokio::spawn(worker.run())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testutil::{FakeConnector, FakeDownloader, FakeSession};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const GUILD: GuildId = GuildId::new(10);
    const CHANNEL: ChannelId = ChannelId::new(20);
    const USER: UserId = UserId::new(30);

    fn controller_with(downloader: Arc<FakeDownloader>, dir: &TempDir) -> PlayerController {
        let resolver = TrackResolver::new(TrackCache::new(dir.path().join("cache")), downloader);
        PlayerController::new(resolver, Duration::from_millis(10), 0.5)
    }

    fn setup() -> (PlayerController, Arc<FakeSession>, FakeConnector, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::instant();
        let connector = FakeConnector::new(session.clone());
        (controller, session, connector, dir)
    }

    #[tokio::test]
    async fn normalizacion_de_volumen() {
        let (controller, _session, _connector, _dir) = setup();

        for (input, expected) in [
            (0.0, 0.0),
            (0.5, 0.5),
            (1.0, 1.0),
            (1.0001, 1.0001 / 100.0),
            (50.0, 0.5),
            (100.0, 1.0),
        ] {
            let got = controller.set_volume(GUILD, input).await.unwrap();
            assert!(
                (got - expected).abs() < 1e-6,
                "entrada {input}: esperaba {expected}, obtuve {got}"
            );
        }

        for input in [150.0, -0.5, f32::NAN] {
            assert!(
                matches!(
                    controller.set_volume(GUILD, input).await,
                    Err(PlayerError::InvalidVolume(_))
                ),
                "entrada {input} debería ser inválida"
            );
        }
    }

    #[tokio::test]
    async fn play_sin_canal_de_voz_falla() {
        let (controller, _session, connector, _dir) = setup();

        let err = controller
            .play(GUILD, "una canción", None, &connector, USER)
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::NotInVoiceChannel));
    }

    #[tokio::test]
    async fn control_sin_sesion_falla() {
        let (controller, _session, _connector, _dir) = setup();

        assert!(matches!(
            controller.pause(GUILD).await,
            Err(PlayerError::NoActiveSession)
        ));
        assert!(matches!(
            controller.resume(GUILD).await,
            Err(PlayerError::NoActiveSession)
        ));
        assert!(matches!(
            controller.skip(GUILD).await,
            Err(PlayerError::NoActiveSession)
        ));
        // seek y stop son no-op sin sesión.
        assert!(controller.seek(GUILD, 10).await.is_ok());
        assert!(controller.stop(GUILD).await.is_ok());
    }

    #[tokio::test]
    async fn play_conecta_y_reporta_titulo() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::with_duration(Duration::from_millis(250));
        let connector = FakeConnector::new(session.clone());

        let title = controller
            .play(
                GUILD,
                "https://example.com/a.mp3",
                Some(CHANNEL),
                &connector,
                USER,
            )
            .await
            .unwrap();

        assert_eq!(title, "https://example.com/a.mp3");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(controller.has_session(GUILD));

        // El worker toma la pista, la publica y al terminar la limpia.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            controller.now_playing(GUILD).as_deref(),
            Some("https://example.com/a.mp3")
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(controller.now_playing(GUILD), None);
        assert!(session.is_destroyed());
        assert!(!controller.has_session(GUILD));
    }

    #[tokio::test]
    async fn orden_fifo_de_reproduccion() {
        let (controller, session, connector, dir) = setup();

        for reference in ["primera", "segunda", "tercera"] {
            controller
                .play(GUILD, reference, Some(CHANNEL), &connector, USER)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;

        // Un resolver paralelo sobre la misma caché da las rutas esperadas
        // (todo hit: el descargador no se vuelve a invocar).
        let check = TrackResolver::new(
            TrackCache::new(dir.path().join("cache")),
            Arc::new(FakeDownloader::new(dir.path().to_path_buf())),
        );
        let mut expected = Vec::new();
        for reference in ["primera", "segunda", "tercera"] {
            expected.push(check.resolve(reference).await.unwrap().path);
        }
        assert_eq!(session.played_paths(), expected);
    }

    #[tokio::test]
    async fn stop_vacia_la_cola() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        // Pistas largas: la primera queda sonando hasta el stop.
        let session = FakeSession::with_duration(Duration::from_secs(30));
        let connector = FakeConnector::new(session.clone());

        for reference in ["a", "b", "c", "d"] {
            controller
                .play(GUILD, reference, Some(CHANNEL), &connector, USER)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.queue_len(GUILD), 3); // "a" ya está sonando

        controller.stop(GUILD).await.unwrap();
        assert_eq!(controller.queue_len(GUILD), 0);

        // La pista en curso se corta y el worker suelta la sesión.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.now_playing(GUILD), None);
        assert!(session.is_destroyed());
    }

    #[tokio::test]
    async fn skip_avanza_a_la_siguiente() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::with_duration(Duration::from_secs(30));
        let connector = FakeConnector::new(session.clone());

        controller
            .play(GUILD, "una", Some(CHANNEL), &connector, USER)
            .await
            .unwrap();
        controller
            .play(GUILD, "otra", Some(CHANNEL), &connector, USER)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.now_playing(GUILD).as_deref(), Some("ytsearch:una"));

        controller.skip(GUILD).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.now_playing(GUILD).as_deref(), Some("ytsearch:otra"));
        assert_eq!(session.played_titles().len(), 2);
    }

    #[tokio::test]
    async fn desconexion_forzada_limpia_todo() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::with_duration(Duration::from_secs(30));
        let connector = FakeConnector::new(session.clone());

        for reference in ["larga", "pendiente"] {
            controller
                .play(GUILD, reference, Some(CHANNEL), &connector, USER)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.now_playing(GUILD).as_deref(), Some("ytsearch:larga"));

        // Discord nos echó del canal: no queda cola, ni sesión, ni registro
        // de "ahora suena", y la pista en curso se corta.
        controller.handle_disconnect(GUILD).await;

        assert_eq!(controller.queue_len(GUILD), 0);
        assert!(!controller.has_session(GUILD));
        assert_eq!(controller.now_playing(GUILD), None);
        assert!(session.is_destroyed());
    }

    #[tokio::test]
    async fn pausa_y_reanudacion() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(dir.path().to_path_buf()));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::with_duration(Duration::from_secs(30));
        let connector = FakeConnector::new(session.clone());

        controller
            .play(GUILD, "larga", Some(CHANNEL), &connector, USER)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        controller.pause(GUILD).await.unwrap();
        assert!(session.is_paused());

        controller.resume(GUILD).await.unwrap();
        assert!(!session.is_paused());
    }

    #[tokio::test]
    async fn guilds_concurrentes_no_se_bloquean() {
        let dir = tempfile::tempdir().unwrap();
        // Descargas lentas: si se serializaran, tardarían el doble.
        let downloader = Arc::new(FakeDownloader::with_delay(
            dir.path().to_path_buf(),
            Duration::from_millis(400),
        ));
        let controller = controller_with(downloader, &dir);
        let session = FakeSession::instant();
        let connector = FakeConnector::new(session);

        let started = std::time::Instant::now();
        let (a, b) = tokio::join!(
            controller.play(GuildId::new(1), "uno", Some(CHANNEL), &connector, USER),
            controller.play(GuildId::new(2), "dos", Some(CHANNEL), &connector, USER),
        );
        a.unwrap();
        b.unwrap();

        assert!(
            started.elapsed() < Duration::from_millis(700),
            "las descargas de guilds distintos se serializaron: {:?}",
            started.elapsed()
        );
    }
}
