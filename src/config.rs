use std::collections::HashMap;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_SERVER_URL: &str = "https://platform.ringcentral.com";
const DEFAULT_PROCORE_LOGIN_URL: &str = "https://login.procore.com";
const DEFAULT_PROCORE_API_URL: &str = "https://api.procore.com";
const DEFAULT_WS_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub platform: PlatformConfig,
    /// `None` when the Procore variables are not all set.
    pub procore: Option<ProcoreConfig>,
    pub ws_queue: usize,
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub server_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub jwt: String,
    pub webhook_address: String,
    /// Origin number for SMS and ring-out.
    pub from_number: String,
}

#[derive(Debug, Clone)]
pub struct ProcoreConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub company_id: String,
    pub project_id: String,
    pub login_url: String,
    pub api_url: String,
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "failed to read .env file");
            }
        }
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).filter(|v| !v.trim().is_empty()).cloned();
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { name: "PORT", value: v })?,
            None => DEFAULT_PORT,
        };

        let ws_queue = match get("WS_CLIENT_QUEUE") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "WS_CLIENT_QUEUE",
                        value: v,
                    })
                }
            },
            None => DEFAULT_WS_QUEUE,
        };

        let platform = PlatformConfig {
            server_url: trim_base(
                get("RINGCENTRAL_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            ),
            client_id: require("RINGCENTRAL_CLIENT_ID")?,
            client_secret: require("RINGCENTRAL_CLIENT_SECRET")?,
            jwt: require("RINGCENTRAL_JWT")?,
            webhook_address: require("RINGCENTRAL_WEBHOOK_DELIVERY_ADDRESS")?,
            from_number: require("RINGCENTRAL_USERNAME")?,
        };

        let procore = match (
            get("PROCORE_CLIENT_ID"),
            get("PROCORE_CLIENT_SECRET"),
            get("PROCORE_REDIRECT_URI"),
            get("PROCORE_COMPANY_ID"),
            get("PROCORE_PROJECT_ID"),
        ) {
            (
                Some(client_id),
                Some(client_secret),
                Some(redirect_uri),
                Some(company_id),
                Some(project_id),
            ) => Some(ProcoreConfig {
                client_id,
                client_secret,
                redirect_uri,
                company_id,
                project_id,
                login_url: trim_base(
                    get("PROCORE_LOGIN_URL")
                        .unwrap_or_else(|| DEFAULT_PROCORE_LOGIN_URL.to_string()),
                ),
                api_url: trim_base(
                    get("PROCORE_API_URL").unwrap_or_else(|| DEFAULT_PROCORE_API_URL.to_string()),
                ),
            }),
            _ => None,
        };

        Ok(Self {
            port,
            platform,
            procore,
            ws_queue,
        })
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
