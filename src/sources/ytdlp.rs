use anyhow::Result;
use async_trait::async_trait;
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};

use super::{DownloadedMedia, MediaDownloader, NormalizedReference};

/// Descargador basado en yt-dlp con extracción de audio a opus.
pub struct YtDlpClient;

impl YtDlpClient {
    pub fn new() -> Self {
        Self
    }

    /// Verifica que yt-dlp esté disponible antes de arrancar el bot.
    pub async fn verify_dependencies() -> Result<()> {
        let check = tokio::process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await;

        match check {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
                Ok(())
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                anyhow::bail!("yt-dlp no disponible")
            }
        }
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDownloader for YtDlpClient {
    async fn download(&self, reference: &NormalizedReference) -> Result<DownloadedMedia> {
        let workdir = tempfile::Builder::new().prefix("ritmo-dl-").tempdir()?;
        let template = workdir.path().join("%(id)s.%(ext)s");

        let mut cmd = tokio::process::Command::new("yt-dlp");
        cmd.args([
            "--extract-audio",
            "--audio-format", "opus",
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--default-search", "ytsearch",
            "--socket-timeout", "30",
            "--retries", "3",
            // Una sola línea por descarga, campos separados por |
            "--print", "after_move:%(filepath)s|%(title)s|%(webpage_url)s|%(duration)s",
        ]);
        cmd.arg("-o").arg(&template);
        cmd.arg(reference.to_string());

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp falló: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow::anyhow!("yt-dlp no devolvió resultados"))?;
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            anyhow::bail!("salida de yt-dlp con formato inesperado: {}", line);
        }

        let file = PathBuf::from(parts[0]);
        if tokio::fs::metadata(&file).await.is_err() {
            anyhow::bail!("yt-dlp reportó un archivo inexistente: {}", file.display());
        }

        let title = match parts[1].trim() {
            "" | "NA" => None,
            t => Some(t.to_string()),
        };
        let duration = parts[3]
            .trim()
            .parse::<f64>()
            .ok()
            .map(Duration::from_secs_f64);

        info!(
            "🎶 Descarga completa: {} ({})",
            title.as_deref().unwrap_or(parts[2]),
            file.display()
        );

        Ok(DownloadedMedia {
            file,
            title,
            url: parts[2].to_string(),
            duration,
            scratch: Some(workdir),
        })
    }
}
