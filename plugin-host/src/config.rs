#[derive(Debug, Clone)]
pub struct HostConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl HostConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            host: std::env::var("PLUGIN_HOST_ADDR").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PLUGIN_HOST_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9700),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
