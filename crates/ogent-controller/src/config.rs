use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub admin_username: String,
    pub admin_password: String,
    pub listen_host: String,
    pub port: u16,
    pub messaging_url: Option<String>,
    pub ai_backend_key: Option<String>,
    pub command_retention: usize,
    pub command_deadline_default_secs: u64,
    pub grace_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "your-secret-key-change-in-production".to_string()),
            token_ttl_minutes: env::var("TOKEN_TTL_MINUTES")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid TOKEN_TTL_MINUTES: {}", e))?,
            admin_username: env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            admin_password: env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "change-me".to_string()),
            listen_host: env::var("LISTEN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT: {}", e))?,
            messaging_url: env::var("MESSAGING_URL").ok(),
            ai_backend_key: env::var("AI_BACKEND_KEY").ok(),
            command_retention: env::var("COMMAND_RETENTION")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid COMMAND_RETENTION: {}", e))?,
            command_deadline_default_secs: env::var("COMMAND_DEADLINE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid COMMAND_DEADLINE_SECS: {}", e))?,
            grace_interval_secs: env::var("GRACE_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid GRACE_INTERVAL_SECS: {}", e))?,
        })
    }
}
