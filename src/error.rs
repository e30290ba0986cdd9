use thiserror::Error;

/// Errores del subsistema de reproducción.
///
/// Los mensajes de `Display` se envían tal cual como respuesta al usuario,
/// por eso están redactados para el chat y no para los logs.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// La referencia no se pudo normalizar (vacía o ilegible).
    #[error("❌ No entendí qué querés reproducir: `{0}`")]
    InvalidReference(String),

    /// El descargador externo falló o expiró.
    ///
    /// `cause` es un campo común y no `#[source]` porque `anyhow::Error`
    /// no implementa `std::error::Error`.
    #[error("❌ No pude descargar `{reference}`: {cause}")]
    DownloadFailed {
        reference: String,
        cause: anyhow::Error,
    },

    /// Se pidió conectar sin que el usuario esté en un canal de voz.
    #[error("❌ Tenés que estar en un canal de voz")]
    NotInVoiceChannel,

    /// Comando de control sin sesión de voz activa.
    #[error("❌ No hay ninguna sesión de voz activa")]
    NoActiveSession,

    /// El archivo local no se pudo reproducir (corrupto o ausente).
    /// Se captura dentro del worker; nunca tumba el proceso.
    #[error("❌ No pude reproducir el archivo: {0}")]
    PlaybackFailure(anyhow::Error),

    /// Volumen fuera del rango permitido una vez normalizado a [0, 1].
    #[error("❌ Volumen fuera de rango: {0} (usá 0-100 o una fracción 0-1)")]
    InvalidVolume(f32),

    /// Falla interna (I/O de caché, conexión de voz, etc.).
    #[error("❌ Error interno: {0}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for PlayerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}
