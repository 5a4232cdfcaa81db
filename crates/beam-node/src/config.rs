use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use beam_transfer::TransferConfig;
use url::Url;

/// Node settings, read from `BEAM_*` environment variables (a `.env` file is
/// loaded first if present). Command-line flags override them.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Base URL put into share links. Defaults to `http://localhost:<port>/`.
    pub public_url: Option<Url>,
    pub output_dir: PathBuf,
    pub transfer: TransferConfig,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = TransferConfig::default();
        let transfer = TransferConfig {
            heartbeat_interval: millis(&lookup, "BEAM_HEARTBEAT_MS", defaults.heartbeat_interval)?,
            liveness_timeout: millis(
                &lookup,
                "BEAM_LIVENESS_TIMEOUT_MS",
                defaults.liveness_timeout,
            )?,
            reconnect_delay: millis(&lookup, "BEAM_RECONNECT_DELAY_MS", defaults.reconnect_delay)?,
            max_reconnects: parsed(&lookup, "BEAM_MAX_RECONNECTS", defaults.max_reconnects)?,
            max_stalled_rounds: parsed(
                &lookup,
                "BEAM_MAX_STALLED_ROUNDS",
                defaults.max_stalled_rounds,
            )?,
            max_file_size: parsed(&lookup, "BEAM_MAX_FILE_SIZE", defaults.max_file_size)?,
            auto_start: defaults.auto_start,
        };
        if transfer.heartbeat_interval.is_zero() {
            anyhow::bail!("BEAM_HEARTBEAT_MS must be greater than zero");
        }

        Ok(Self {
            host: lookup("BEAM_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "BEAM_PORT", 3000)?,
            public_url: lookup("BEAM_PUBLIC_URL")
                .map(|raw| Url::parse(&raw).with_context(|| format!("BEAM_PUBLIC_URL={raw:?}")))
                .transpose()?,
            output_dir: lookup("BEAM_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            transfer,
        })
    }

    /// Base URL for share links.
    pub fn link_base(&self) -> anyhow::Result<Url> {
        match &self.public_url {
            Some(url) => Ok(url.clone()),
            None => Ok(Url::parse(&format!("http://localhost:{}/", self.port))?),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key}={raw:?} is not valid")),
        None => Ok(default),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> anyhow::Result<Duration> {
    let ms = parsed(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}
