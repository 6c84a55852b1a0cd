use std::path::PathBuf;
use std::time::Duration;

/// Canonical public MRP registry host.
pub const DEFAULT_REGISTRY_BASE: &str = "https://www.moltrouter.dev";

/// Raw JSON list used when the registry API is unavailable.
pub const DEFAULT_BOOTSTRAP_REGISTRY_RAW: &str =
    "https://raw.githubusercontent.com/thorthur22/moltrouter-registry/main/data/registry.json";

/// Sender id for envelopes this client originates.
pub const DEFAULT_SENDER_ID: &str = "agent:mrpd/client";

const REGISTRY_TIMEOUT_SECS: u64 = 20;
const DISCOVER_TIMEOUT_SECS: u64 = 20;
const MANIFEST_TIMEOUT_SECS: u64 = 30;
const EXECUTE_TIMEOUT_SECS: u64 = 60;
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Configuration loaded from environment variables.
///
/// Built once and passed to the components that need it; nothing reads the
/// environment after construction.
#[derive(Debug, Clone)]
pub struct MrpConfig {
    pub registry_base: String,
    /// `None` disables the bootstrap fallback.
    pub bootstrap_raw: Option<String>,
    pub artifact_dir: PathBuf,
    pub evidence_dir: PathBuf,
    pub sender_id: String,
    pub registry_timeout: Duration,
    pub discover_timeout: Duration,
    pub manifest_timeout: Duration,
    pub execute_timeout: Duration,
    /// Timeout of the built-in provider's content fetch.
    pub fetch_timeout: Duration,
}

impl MrpConfig {
    /// Load configuration from environment.
    ///
    /// - `MRP_REGISTRY_BASE` (optional): registry base URL
    /// - `MRP_BOOTSTRAP_REGISTRY_RAW` (optional): raw registry list (`file://` or `http(s)://`); empty disables
    /// - `MRPD_ARTIFACT_DIR` / `MRPD_EVIDENCE_DIR` (optional): store roots, default under `~/.mrpd`
    /// - `MRPD_SENDER_ID` (optional): sender id on outgoing requests
    /// - `MRPD_HTTP_TIMEOUT_SECS` (optional): overrides every outbound timeout
    pub fn from_env() -> Result<Self, String> {
        let home = dirs::home_dir()
            .map(|h| h.join(".mrpd"))
            .unwrap_or_else(|| PathBuf::from(".mrpd"));

        let mut config = Self::with_home(&home);

        if let Ok(base) = std::env::var("MRP_REGISTRY_BASE") {
            if !base.trim().is_empty() {
                config.registry_base = base.trim().to_string();
            }
        }

        if let Ok(raw) = std::env::var("MRP_BOOTSTRAP_REGISTRY_RAW") {
            config.bootstrap_raw = Some(raw).filter(|s| !s.trim().is_empty());
        }

        if let Ok(dir) = std::env::var("MRPD_ARTIFACT_DIR") {
            config.artifact_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("MRPD_EVIDENCE_DIR") {
            config.evidence_dir = PathBuf::from(dir);
        }

        if let Ok(id) = std::env::var("MRPD_SENDER_ID") {
            config.sender_id = id;
        }

        if let Ok(val) = std::env::var("MRPD_HTTP_TIMEOUT_SECS") {
            let secs = val
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| "MRPD_HTTP_TIMEOUT_SECS must be a positive integer".to_string())?;
            config = config.with_uniform_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Defaults with stores under `home` (`<home>/artifacts`, `<home>/evidence`).
    pub fn with_home(home: &std::path::Path) -> Self {
        Self {
            registry_base: DEFAULT_REGISTRY_BASE.to_string(),
            bootstrap_raw: Some(DEFAULT_BOOTSTRAP_REGISTRY_RAW.to_string()),
            artifact_dir: home.join("artifacts"),
            evidence_dir: home.join("evidence"),
            sender_id: DEFAULT_SENDER_ID.to_string(),
            registry_timeout: Duration::from_secs(REGISTRY_TIMEOUT_SECS),
            discover_timeout: Duration::from_secs(DISCOVER_TIMEOUT_SECS),
            manifest_timeout: Duration::from_secs(MANIFEST_TIMEOUT_SECS),
            execute_timeout: Duration::from_secs(EXECUTE_TIMEOUT_SECS),
            fetch_timeout: Duration::from_secs(FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_uniform_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self.discover_timeout = timeout;
        self.manifest_timeout = timeout;
        self.execute_timeout = timeout;
        self.fetch_timeout = timeout;
        self
    }
}
