use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

/// Flat variable names from earlier deployments, mapped onto settings paths.
/// Applied as the last (highest-priority) layer.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("BOT_TOKEN", "telegram.token"),
    ("WEBHOOK_URL", "telegram.webhook_url"),
    ("PORT", "server.port"),
    ("ADMIN_CHAT_ID", "admin.chat_id"),
    ("ADMIN_USER_IDS", "admin.user_ids"),
    ("ADMIN_USERNAMES", "admin.usernames"),
    ("DELETION_THRESHOLD", "deletion.threshold"),
    ("DELETION_CHECK_DELAY_MS", "deletion.check_delay_ms"),
    ("TYPO_DISTANCE_THRESHOLD", "typosquat.distance_threshold"),
    ("SIMILARITY_THRESHOLD", "impersonation.similarity_threshold"),
    ("OPENAI_API_KEY", "impersonation.openai.api_key"),
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub telegram: Telegram,
    pub server: Server,
    pub admin: Admin,
    pub deletion: DeletionConfig,
    pub typosquat: TyposquatConfig,
    pub impersonation: ImpersonationConfig,
    pub logging: Logging,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Telegram {
    pub token: String,
    pub api_base: String,
    pub webhook_url: Option<String>,
    /// Checked against `X-Telegram-Bot-Api-Secret-Token` when set.
    pub webhook_secret: Option<String>,
    pub drop_pending_updates: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Admin {
    /// Administrative channel receiving every alert. Required.
    pub chat_id: Option<i64>,
    #[serde(default, deserialize_with = "comma_list")]
    pub user_ids: Vec<i64>,
    #[serde(default, deserialize_with = "comma_list")]
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeletionConfig {
    pub threshold: u32,
    pub check_delay_ms: u64,
}

impl DeletionConfig {
    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.check_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TyposquatConfig {
    pub distance_threshold: usize,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Vision chat-completion endpoint.
    Openai,
    /// Local average-hash comparison.
    Ahash,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImpersonationConfig {
    pub similarity_threshold: f64,
    pub oracle: OracleKind,
    pub openai: OpenAi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAi {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: "development".into(),
            app: App {
                name: "spamwatch".into(),
            },
            telegram: Telegram {
                token: String::new(),
                api_base: "https://api.telegram.org".into(),
                webhook_url: None,
                webhook_secret: None,
                drop_pending_updates: true,
            },
            server: Server {
                host: "0.0.0.0".into(),
                port: 3000,
                webhook_path: "/webhook".into(),
            },
            admin: Admin::default(),
            deletion: DeletionConfig {
                threshold: 3,
                check_delay_ms: 1000,
            },
            typosquat: TyposquatConfig {
                distance_threshold: 1,
            },
            impersonation: ImpersonationConfig {
                similarity_threshold: 0.8,
                oracle: OracleKind::Openai,
                openai: OpenAi {
                    api_key: None,
                    model: "gpt-4o-mini".into(),
                    base_url: "https://api.openai.com/v1".into(),
                },
            },
            logging: Logging {
                level: Some("info".into()),
            },
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env = std::env::var("SPAMWATCH_ENV").unwrap_or_else(|_| "development".to_string());

        // .env.<env> first so it wins over the shared .env
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        let mut s: Settings = Self::figment(&env).extract()?;
        s.env = env;
        s.normalize();
        s.validate()?;
        Ok(s)
    }

    /// Layers: defaults -> config/<env>.toml -> SPAMWATCH_* -> legacy flat names.
    pub fn figment(env: &str) -> Figment {
        Figment::from(Serialized::defaults(Settings {
            env: env.to_string(),
            ..Settings::default()
        }))
        .merge(Toml::file(format!("config/{}.toml", env)))
        // SPAMWATCH_DELETION__THRESHOLD => deletion.threshold
        .merge(Env::prefixed("SPAMWATCH_").split("__"))
        .merge(
            Env::raw()
                .only(&LEGACY_ENV.iter().map(|(k, _)| *k).collect::<Vec<_>>())
                .map(|key| match legacy_path(key.as_str()) {
                    Some(path) => path.into(),
                    None => key.into(),
                }),
        )
    }

    /// Protected handles are compared lowercased and without the leading `@`.
    pub fn normalize(&mut self) {
        self.admin.usernames = self
            .admin
            .usernames
            .iter()
            .map(|u| u.trim().trim_start_matches('@').to_lowercase())
            .filter(|u| !u.is_empty())
            .collect();
        self.admin.user_ids.retain(|id| *id != 0);
        if !self.server.webhook_path.starts_with('/') {
            self.server.webhook_path = format!("/{}", self.server.webhook_path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin.chat_id.is_none() {
            bail!("admin.chat_id (ADMIN_CHAT_ID) is required");
        }
        let t = self.impersonation.similarity_threshold;
        if !t.is_finite() || t < 0.0 {
            bail!("impersonation.similarity_threshold must be a non-negative number, got {t}");
        }
        if self.deletion.check_delay_ms == 0 {
            bail!("deletion.check_delay_ms must be greater than zero");
        }
        Ok(())
    }

    /// Only valid after [`Settings::validate`].
    pub fn admin_chat_id(&self) -> i64 {
        self.admin.chat_id.unwrap_or_default()
    }
}

fn legacy_path(key: &str) -> Option<&'static str> {
    LEGACY_ENV
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, path)| *path)
}

/// Accepts `"a, b"`, a bare scalar, or a proper array.
fn comma_list<'de, D, T>(de: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        List(Vec<T>),
        Text(String),
        One(T),
    }

    match Raw::<T>::deserialize(de)? {
        Raw::List(v) => Ok(v),
        Raw::One(v) => Ok(vec![v]),
        Raw::Text(s) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<T>().map_err(serde::de::Error::custom))
            .collect(),
    }
}
