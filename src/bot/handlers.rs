use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::info;

use crate::{
    bot::RitmoBot,
    error::PlayerError,
    voice::SongbirdConnector,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "join" => handle_join(ctx, command, bot, guild_id).await?,
        "play" => handle_play(ctx, command, bot, guild_id).await?,
        "pause" => {
            let result = bot.controller.pause(guild_id).await;
            respond_result(ctx, &command, result, "⏸️ Pausado").await?;
        }
        "resume" => {
            let result = bot.controller.resume(guild_id).await;
            respond_result(ctx, &command, result, "▶️ Reanudado").await?;
        }
        "stop" => {
            let result = bot.controller.stop(guild_id).await;
            respond_result(ctx, &command, result, "⏹️ Reproducción detenida y cola limpiada")
                .await?;
        }
        "skip" => handle_skip(ctx, command, bot, guild_id).await?,
        "seek" => handle_seek(ctx, command, bot, guild_id).await?,
        "volume" => handle_volume(ctx, command, bot, guild_id).await?,
        "nowplaying" => {
            let text = match bot.controller.now_playing(guild_id) {
                Some(title) => format!("🎵 Ahora suena: {title}"),
                None => "🔇 Nada sonando".to_string(),
            };
            respond(ctx, &command, text).await?;
        }
        "leave" => {
            let result = bot.controller.leave(guild_id).await;
            respond_result(ctx, &command, result, "👋 Desconectado del canal de voz").await?;
        }
        _ => {
            respond_ephemeral(ctx, &command, "❌ Comando no reconocido").await?;
        }
    }

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_join(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        respond_ephemeral(ctx, &command, PlayerError::NotInVoiceChannel.to_string()).await?;
        return Ok(());
    };

    let connector = songbird_connector(ctx).await?;
    let result = bot.controller.join(guild_id, channel_id, &connector).await;
    respond_result(ctx, &command, result, "🔊 Conectado al canal de voz").await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer: la resolución puede descargar y tardar más de 3 segundos.
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let user_channel = user_voice_channel(ctx, guild_id, command.user.id);
    let connector = songbird_connector(ctx).await?;

    let text = match bot
        .controller
        .play(guild_id, &query, user_channel, &connector, command.user.id)
        .await
    {
        Ok(title) => format!("🎵 En cola: {title}"),
        Err(e) => e.to_string(),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await?;
    Ok(())
}

async fn handle_skip(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    if let Err(e) = bot.controller.skip(guild_id).await {
        respond_ephemeral(ctx, &command, e.to_string()).await?;
        return Ok(());
    }

    // Pequeña espera para que el worker publique la siguiente pista.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let text = match bot.controller.now_playing(guild_id) {
        Some(title) => format!("⏭️ Salteado. Ahora suena: {title}"),
        None => "⏭️ Salteado".to_string(),
    };
    respond(ctx, &command, text).await?;
    Ok(())
}

async fn handle_seek(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let seconds = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "seconds")
        .and_then(|opt| opt.value.as_i64())
        .ok_or_else(|| anyhow::anyhow!("Offset no proporcionado"))?;

    let result = bot.controller.seek(guild_id, seconds).await;
    let ok = if seconds >= 0 {
        format!("⏩ Adelantando {seconds}s")
    } else {
        format!("⏪ Retrocediendo {}s", -seconds)
    };
    respond_result(ctx, &command, result, &ok).await?;
    Ok(())
}

async fn handle_volume(
    ctx: &Context,
    command: CommandInteraction,
    bot: &RitmoBot,
    guild_id: GuildId,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_f64())
        .ok_or_else(|| anyhow::anyhow!("Nivel no proporcionado"))? as f32;

    match bot.controller.set_volume(guild_id, level).await {
        Ok(normalized) => {
            let text = format!("🔊 Volumen ajustado a {}%", (normalized * 100.0) as u8);
            respond(ctx, &command, text).await?;
        }
        Err(e) => respond_ephemeral(ctx, &command, e.to_string()).await?,
    }
    Ok(())
}

// Funciones auxiliares

/// Respuesta pública en éxito; el error va como reply efímera al usuario.
async fn respond_result(
    ctx: &Context,
    command: &CommandInteraction,
    result: Result<(), PlayerError>,
    ok: &str,
) -> Result<()> {
    match result {
        Ok(()) => respond(ctx, command, ok).await,
        Err(e) => respond_ephemeral(ctx, command, e.to_string()).await,
    }
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    text: impl Into<String>,
) -> Result<()> {
    send(ctx, command, text.into(), false).await
}

async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    text: impl Into<String>,
) -> Result<()> {
    send(ctx, command, text.into(), true).await
}

async fn send(
    ctx: &Context,
    command: &CommandInteraction,
    text: String,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn songbird_connector(ctx: &Context) -> Result<SongbirdConnector> {
    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
    Ok(SongbirdConnector::new(manager))
}

/// Canal de voz del usuario según el caché del guild, si está en uno.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
