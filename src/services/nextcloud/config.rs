use std::time::Duration;

/// Nextcloud instance configuration
#[derive(Debug, Clone)]
pub struct NextcloudConfig {
    pub instance_url: String,
    pub username: String,
    pub password: String,
    pub usage_folder: Option<String>,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

/// Retry policy a caller may wrap around whole operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 250,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(std::cmp::min(delay, self.max_delay_ms))
    }
}

impl NextcloudConfig {
    /// Creates a new configuration with default timeouts
    pub fn new(
        instance_url: String,
        username: String,
        password: String,
        usage_folder: Option<String>,
    ) -> Self {
        Self {
            instance_url: instance_url.trim_end_matches('/').to_string(),
            username,
            password,
            usage_folder: usage_folder.filter(|f| !f.trim_matches('/').is_empty()),
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instance_url.is_empty() {
            return Err(anyhow::anyhow!("Instance URL cannot be empty"));
        }

        if !self.instance_url.starts_with("http://") && !self.instance_url.starts_with("https://") {
            return Err(anyhow::anyhow!("Instance URL must start with http:// or https://"));
        }

        url::Url::parse(&self.instance_url)
            .map_err(|e| anyhow::anyhow!("Instance URL is not a valid URL: {}", e))?;

        if self.username.is_empty() {
            return Err(anyhow::anyhow!("Username cannot be empty"));
        }

        if self.password.is_empty() {
            return Err(anyhow::anyhow!("Password cannot be empty"));
        }

        if let Some(folder) = &self.usage_folder {
            if folder.split('/').any(|segment| segment == "." || segment == "..") {
                return Err(anyhow::anyhow!("Usage folder must not contain '.' or '..' segments"));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Timeout must be at least one second"));
        }

        Ok(())
    }

    /// Returns the WebDAV root of the account, without trailing slash
    /// e.g. "https://cloud.example.com/remote.php/dav/files/alice"
    pub fn webdav_root_url(&self) -> String {
        format!(
            "{}/remote.php/dav/files/{}",
            self.instance_url.trim_end_matches('/'),
            urlencoding::encode(&self.username)
        )
    }

    /// Path component of the WebDAV root as it appears in PROPFIND hrefs
    pub fn webdav_root_path(&self) -> String {
        let root = self.webdav_root_url();
        match url::Url::parse(&root) {
            Ok(parsed) => parsed.path().trim_end_matches('/').to_string(),
            Err(_) => format!("/remote.php/dav/files/{}", urlencoding::encode(&self.username)),
        }
    }

    /// OCS share API endpoint
    pub fn ocs_shares_url(&self) -> String {
        format!(
            "{}/ocs/v2.php/apps/files_sharing/api/v1/shares",
            self.instance_url.trim_end_matches('/')
        )
    }

    /// Total per-call timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}
