use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,

    // Paths
    pub cache_dir: PathBuf,

    // Workers
    /// Intervalo de sondeo del worker esperando una sesión de voz (ms)
    pub session_poll_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,

            // Paths
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "/app/cache".to_string())
                .into(),

            // Workers
            session_poll_ms: std::env::var("SESSION_POLL_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
        };

        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Chequeos de sanidad antes de arrancar el bot.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "DEFAULT_VOLUME tiene que estar entre 0.0 y 1.0, recibí: {}",
                self.default_volume
            );
        }

        if self.session_poll_ms == 0 {
            anyhow::bail!("SESSION_POLL_MS tiene que ser mayor que 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults - hay que proveerlos)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 0.5,
            cache_dir: "/app/cache".into(),
            session_poll_ms: 500,
        }
    }
}
