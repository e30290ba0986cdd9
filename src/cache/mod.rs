//! # Cache Module
//!
//! Caché en disco de pistas ya descargadas, compartida por todos los guilds.
//!
//! Cada entrada es un par de archivos con nombre derivado de la clave:
//!
//! ```text
//! <cache_dir>/track-<sha256hex>.opus   # audio
//! <cache_dir>/track-<sha256hex>.json   # metadatos (sidecar)
//! ```
//!
//! El sidecar se escribe **después** del audio y su presencia es la única
//! señal de validez: un lector nunca puede tomar una descarga a medias como
//! un hit. Limitaciones asumidas del diseño:
//!
//! - La caché crece sin límite; no hay política de expulsión.
//! - Dos descargas concurrentes de la **misma** referencia no se deduplican
//!   y pueden descargar dos veces. Escrituras a claves distintas son seguras.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

use crate::sources::NormalizedReference;

/// Clave de caché: digest SHA-256 en hex de la referencia normalizada.
/// Determinística: misma referencia ⇒ misma clave.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_reference(reference: &NormalizedReference) -> Self {
        let digest = Sha256::digest(reference.to_string().as_bytes());
        Self(format!("{:x}", digest))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadatos persistidos junto al audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTrack {
    /// Título según la fuente (puede faltar)
    pub title: Option<String>,
    /// URL canónica de la pista
    pub url: String,
    /// Duración si la fuente la informó
    pub duration: Option<Duration>,
}

/// Caché de pistas en disco.
#[derive(Debug, Clone)]
pub struct TrackCache {
    dir: PathBuf,
}

impl TrackCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn audio_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("track-{key}.opus"))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("track-{key}.json"))
    }

    /// Busca una entrada. Devuelve hit solo si existen el audio **y** el
    /// sidecar y este último se puede parsear. Nunca toca la red.
    pub async fn lookup(&self, key: &CacheKey) -> Option<(PathBuf, CachedTrack)> {
        let meta_path = self.meta_path(key);
        let audio_path = self.audio_path(key);

        if tokio::fs::metadata(&meta_path).await.is_err()
            || tokio::fs::metadata(&audio_path).await.is_err()
        {
            return None;
        }

        let raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ No pude leer el sidecar {}: {}", meta_path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<CachedTrack>(&raw) {
            Ok(meta) => {
                debug!("💾 Hit de caché para clave {}", key);
                Some((audio_path, meta))
            }
            Err(e) => {
                // Sidecar corrupto: lo tratamos como miss y dejamos que la
                // próxima descarga lo reescriba.
                warn!("⚠️ Sidecar corrupto {}: {}", meta_path.display(), e);
                None
            }
        }
    }

    /// Guarda una entrada copiando el audio primero y escribiendo el sidecar
    /// al final, de modo que `lookup` recién la vea cuando está completa.
    /// Devuelve la ruta final del audio dentro de la caché.
    pub async fn store(
        &self,
        key: &CacheKey,
        audio_src: &Path,
        meta: &CachedTrack,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let audio_path = self.audio_path(key);
        tokio::fs::copy(audio_src, &audio_path).await?;

        let raw = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(self.meta_path(key), raw).await?;

        debug!("💾 Guardada en caché: {} ({})", key, audio_path.display());
        Ok(audio_path)
    }
}
