use dashmap::DashMap;
use serenity::model::id::GuildId;

/// Registro de "ahora suena" por guild.
///
/// Escribe únicamente el worker dueño del guild; lee cualquier handler de
/// comandos. `DashMap` sincroniza lectores y escritor concurrentes.
#[derive(Debug, Default)]
pub struct NowPlaying {
    entries: DashMap<GuildId, String>,
}

impl NowPlaying {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, guild_id: GuildId, title: String) {
        self.entries.insert(guild_id, title);
    }

    pub fn clear(&self, guild_id: GuildId) {
        self.entries.remove(&guild_id);
    }

    /// `None` cuando no suena nada en el guild.
    pub fn get(&self, guild_id: GuildId) -> Option<String> {
        self.entries.get(&guild_id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_get_clear() {
        let registry = NowPlaying::new();
        let guild = GuildId::new(7);

        assert_eq!(registry.get(guild), None);

        registry.set(guild, "Una pista".to_string());
        assert_eq!(registry.get(guild).as_deref(), Some("Una pista"));

        registry.clear(guild);
        assert_eq!(registry.get(guild), None);
    }

    #[test]
    fn guilds_independientes() {
        let registry = NowPlaying::new();
        registry.set(GuildId::new(1), "a".to_string());
        registry.set(GuildId::new(2), "b".to_string());

        registry.clear(GuildId::new(1));
        assert_eq!(registry.get(GuildId::new(2)).as_deref(), Some("b"));
    }
}
