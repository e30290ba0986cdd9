//! # Sources Module
//!
//! Resolución de referencias de usuario a archivos reproducibles.
//!
//! Una referencia es lo que el usuario escribió en `/play`: una URL o texto
//! libre de búsqueda. [`NormalizedReference`] la normaliza,
//! [`TrackResolver`] la convierte en un archivo local consultando primero la
//! caché en disco y recién después al descargador externo
//! ([`MediaDownloader`], implementado con yt-dlp en [`ytdlp`]).

pub mod ytdlp;

use async_trait::async_trait;
use std::{
    fmt,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info};
use url::Url;

use crate::{
    cache::{CacheKey, CachedTrack, TrackCache},
    error::PlayerError,
};

/// Referencia de usuario ya normalizada.
///
/// Si no parsea como URL http(s) se trata como búsqueda y se le antepone el
/// prefijo `ytsearch:` que entiende el descargador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedReference {
    Url(String),
    Search(String),
}

impl NormalizedReference {
    pub fn parse(raw: &str) -> Result<Self, PlayerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PlayerError::InvalidReference(raw.to_string()));
        }

        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                Ok(Self::Url(url.to_string()))
            }
            _ => Ok(Self::Search(trimmed.to_string())),
        }
    }
}

impl fmt::Display for NormalizedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Search(query) => write!(f, "ytsearch:{query}"),
        }
    }
}

/// Resultado de una descarga del colaborador externo.
pub struct DownloadedMedia {
    /// Archivo de audio ya extraído
    pub file: PathBuf,
    /// Título informado por la fuente
    pub title: Option<String>,
    /// URL canónica de la pista
    pub url: String,
    /// Duración si se conoce
    pub duration: Option<Duration>,
    /// Directorio de trabajo de la descarga; se limpia al soltar el valor,
    /// así que tiene que vivir hasta que el audio se copie a la caché.
    pub scratch: Option<tempfile::TempDir>,
}

impl fmt::Debug for DownloadedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadedMedia")
            .field("file", &self.file)
            .field("title", &self.title)
            .field("url", &self.url)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Colaborador externo que baja audio dada una referencia normalizada.
///
/// Puede bloquear por tiempo arbitrario (red + transcodificación); jamás se
/// invoca sosteniendo locks que necesiten los workers de otros guilds.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, reference: &NormalizedReference) -> anyhow::Result<DownloadedMedia>;
}

/// Pista lista para encolar.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub path: PathBuf,
    pub title: Option<String>,
    pub url: String,
    pub duration: Option<Duration>,
}

/// Resuelve referencias contra la caché y, en miss, contra el descargador.
pub struct TrackResolver {
    cache: TrackCache,
    downloader: Arc<dyn MediaDownloader>,
}

impl TrackResolver {
    pub fn new(cache: TrackCache, downloader: Arc<dyn MediaDownloader>) -> Self {
        Self { cache, downloader }
    }

    /// Convierte una referencia de usuario en un archivo local.
    ///
    /// Hit de caché ⇒ sin red. Miss ⇒ descarga, guarda en caché y devuelve.
    pub async fn resolve(&self, raw: &str) -> Result<ResolvedTrack, PlayerError> {
        let reference = NormalizedReference::parse(raw)?;
        let key = CacheKey::from_reference(&reference);

        if let Some((path, meta)) = self.cache.lookup(&key).await {
            debug!("💾 Resuelta desde caché: {}", reference);
            return Ok(ResolvedTrack {
                path,
                title: meta.title,
                url: meta.url,
                duration: meta.duration,
            });
        }

        info!("⬇️ Descargando: {}", reference);
        let media = self
            .downloader
            .download(&reference)
            .await
            .map_err(|cause| PlayerError::DownloadFailed {
                reference: reference.to_string(),
                cause,
            })?;

        let meta = CachedTrack {
            title: media.title.clone(),
            url: media.url.clone(),
            duration: media.duration,
        };
        let path = self
            .cache
            .store(&key, &media.file, &meta)
            .await
            .map_err(PlayerError::Internal)?;

        Ok(ResolvedTrack {
            path,
            title: media.title,
            url: media.url,
            duration: media.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Descargador falso que cuenta invocaciones y fabrica un archivo.
    struct CountingDownloader {
        dir: PathBuf,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingDownloader {
        fn new(dir: PathBuf) -> Self {
            Self {
                dir,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing(dir: PathBuf) -> Self {
            Self {
                fail: true,
                ..Self::new(dir)
            }
        }
    }

    #[async_trait]
    impl MediaDownloader for CountingDownloader {
        async fn download(
            &self,
            reference: &NormalizedReference,
        ) -> anyhow::Result<DownloadedMedia> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("fuente no disponible");
            }
            let file = self.dir.join(format!("descarga-{n}.opus"));
            std::fs::write(&file, b"audio")?;
            Ok(DownloadedMedia {
                file,
                title: Some(format!("Pista {reference}")),
                url: "https://example.com/pista".to_string(),
                duration: Some(Duration::from_secs(60)),
                scratch: None,
            })
        }
    }

    #[test]
    fn url_pasa_sin_cambios() {
        let r = NormalizedReference::parse("  https://example.com/a.mp3 ").unwrap();
        assert_eq!(r.to_string(), "https://example.com/a.mp3");
    }

    #[test]
    fn texto_libre_se_vuelve_busqueda() {
        let r = NormalizedReference::parse("lofi hip hop radio").unwrap();
        assert_eq!(r, NormalizedReference::Search("lofi hip hop radio".into()));
        assert_eq!(r.to_string(), "ytsearch:lofi hip hop radio");
    }

    #[test]
    fn esquema_raro_es_busqueda() {
        // `Url::parse` acepta "spotify:algo" pero no es reproducible directo.
        let r = NormalizedReference::parse("spotify:track:123").unwrap();
        assert_eq!(r.to_string(), "ytsearch:spotify:track:123");
    }

    #[test]
    fn referencia_vacia_es_invalida() {
        assert!(matches!(
            NormalizedReference::parse("   "),
            Err(PlayerError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn segunda_resolucion_no_descarga() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(CountingDownloader::new(dir.path().to_path_buf()));
        let resolver = TrackResolver::new(
            TrackCache::new(dir.path().join("cache")),
            downloader.clone(),
        );

        let first = resolver.resolve("mi canción favorita").await.unwrap();
        let second = resolver.resolve("mi canción favorita").await.unwrap();

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.path, second.path);
        assert_eq!(second.title.as_deref(), Some("Pista ytsearch:mi canción favorita"));
    }

    #[tokio::test]
    async fn falla_de_descarga_se_reporta() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = TrackResolver::new(
            TrackCache::new(dir.path().join("cache")),
            Arc::new(CountingDownloader::failing(dir.path().to_path_buf())),
        );

        let err = resolver.resolve("algo imposible").await.unwrap_err();
        match err {
            PlayerError::DownloadFailed { reference, .. } => {
                assert_eq!(reference, "ytsearch:algo imposible");
            }
            other => panic!("error inesperado: {other:?}"),
        }
    }
}
