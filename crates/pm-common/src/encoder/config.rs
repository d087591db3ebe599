use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Call the external analyzer at all. When false every profile is encoded
    /// with the deterministic fallback.
    pub enabled: bool,
    /// Chat-completions style endpoint of the language-understanding service.
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    /// Upper bound for one analyzer round trip; on expiry the fallback is used.
    pub timeout: Duration,
    /// How many candidate encodings run at once inside a batch.
    pub batch_concurrency: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            timeout: Duration::from_millis(8_000),
            batch_concurrency: 4,
        }
    }
}

impl EncoderConfig {
    pub fn from_env() -> Self {
        fn parse_bool(key: &str, default: bool) -> bool {
            match std::env::var(key) {
                Ok(val) => matches!(val.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
                Err(_) => default,
            }
        }

        fn parse_u64(key: &str, default: u64) -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        let api_key = std::env::var("PM_ANALYZER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();

        Self {
            // Without a key the remote path can only fail, so default it off.
            enabled: parse_bool("PM_ANALYZER_ENABLED", !api_key.is_empty()),
            endpoint: std::env::var("PM_ANALYZER_ENDPOINT").unwrap_or(defaults.endpoint),
            model: std::env::var("PM_ANALYZER_MODEL").unwrap_or(defaults.model),
            api_key,
            timeout: Duration::from_millis(parse_u64("PM_ANALYZER_TIMEOUT_MS", 8_000).max(1)),
            batch_concurrency: (parse_u64("PM_ENCODER_BATCH", 4) as usize).clamp(1, 32),
        }
    }
}
