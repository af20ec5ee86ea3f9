use serde::Deserialize;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: Option<u32>,
}

impl AppConfig {
    /// Reads `DATABASE_URL` and `MAX_CONNECTIONS` from the environment.
    pub fn from_env() -> Result<AppConfig, envy::Error> {
        envy::from_env::<AppConfig>()
    }

    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }
}
