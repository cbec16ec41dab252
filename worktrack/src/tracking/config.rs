// Environment configuration for the tracking client
// Resolves the state directory (persistent store) and the API endpoint

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:3000/api";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Configuration for client paths and the remote API
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent state (store.json)
    pub state_dir: PathBuf,
    /// Base URL of the project API
    pub api_url: String,
    /// Bearer token issued by the login flow, if any
    pub api_token: Option<String>,
    /// Per-request timeout imposed by the transport
    pub http_timeout: Duration,
}

impl Config {
    /// Create configuration using default paths and endpoint
    pub fn default_paths() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default_paths();

        if let Ok(dir) = std::env::var("WORKTRACK_STATE_DIR") {
            if !dir.trim().is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }

        if let Ok(url) = std::env::var("WORKTRACK_API_URL") {
            if !url.trim().is_empty() {
                config.api_url = url.trim().to_string();
            }
        }

        config.api_token = std::env::var("WORKTRACK_API_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if let Some(secs) = std::env::var("WORKTRACK_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.http_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Get the default state directory
    fn default_state_dir() -> PathBuf {
        // All platforms: ~/.worktrack/ (or <tmp>/worktrack if home unavailable)
        dirs::home_dir()
            .map(|h| h.join(".worktrack"))
            .unwrap_or_else(|| std::env::temp_dir().join("worktrack"))
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Get the store.json file path
    pub fn store_file(&self) -> PathBuf {
        self.state_dir.join("store.json")
    }

    /// Ensure the state directory exists, private to the user on Unix
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.state_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}
