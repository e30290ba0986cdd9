//! # Bot Module
//!
//! Capa Discord del bot: registro de comandos slash, despacho de
//! interacciones hacia el [`PlayerController`] y limpieza cuando Discord
//! nos desconecta de un canal de voz. Toda la lógica de reproducción vive
//! en `crate::audio`; acá solo hay pegamento declarativo.

use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::controller::PlayerController, config::Config};

/// Handler principal del bot.
pub struct RitmoBot {
    config: Arc<Config>,
    pub controller: Arc<PlayerController>,
}

impl RitmoBot {
    pub fn new(config: Config, controller: Arc<PlayerController>) -> Self {
        Self {
            config: Arc::new(config),
            controller,
        }
    }

    async fn register_commands(&self, ctx: &Context) -> anyhow::Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos registrados para guild {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for RitmoBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si Discord nos saca del canal (kick, canal borrado), descartamos la
    /// sesión de ese guild y vaciamos su cola.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                warn!("🔌 Bot desconectado del canal de voz en guild {}", guild_id);
                self.controller.handle_disconnect(guild_id).await;
            }
        }
    }
}
