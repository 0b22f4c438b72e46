use std::collections::HashMap;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub backend_url: String,
    pub backend_anon_key: String,
    pub backend_service_key: String,
    pub backend_timeout_ms: u64,
    pub max_upload_bytes: usize,
    pub documents_bucket: String,
    pub photos_bucket: String,
    pub search_limit: usize,
    pub list_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl StartupError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: "ERR_INVALID_CONFIG",
            message: message.into(),
        }
    }
}

impl ServerConfig {
    /// Reads `CASEWORK_CONFIG_PATH` (if set) as a dotenv-style file, then lets
    /// the process environment override it.
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = match std::env::var("CASEWORK_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => read_env_file(path.trim())?,
            _ => HashMap::new(),
        };
        merged.extend(std::env::vars());
        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let settings = Settings(kv);

        let bind_addr = settings.parsed(
            "CASEWORK_BIND_ADDR",
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "a host:port socket address",
        )?;

        let backend_url = settings.required("CASEWORK_BACKEND_URL")?;
        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(StartupError::invalid(
                "CASEWORK_BACKEND_URL must start with http:// or https://",
            ));
        }

        Ok(Self {
            bind_addr,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            backend_anon_key: settings.required("CASEWORK_BACKEND_ANON_KEY")?,
            backend_service_key: settings.required("CASEWORK_BACKEND_SERVICE_KEY")?,
            backend_timeout_ms: settings.bounded(
                "CASEWORK_BACKEND_TIMEOUT_MS",
                10_000,
                1..=u64::MAX,
            )?,
            max_upload_bytes: settings.bounded(
                "CASEWORK_MAX_UPLOAD_BYTES",
                10 * 1024 * 1024,
                1..=usize::MAX,
            )?,
            documents_bucket: settings
                .text_or("CASEWORK_DOCUMENTS_BUCKET", "application-documents"),
            photos_bucket: settings.text_or("CASEWORK_PHOTOS_BUCKET", "visit-photos"),
            search_limit: settings.bounded("CASEWORK_SEARCH_LIMIT", 20, 1..=100)?,
            list_limit: settings.bounded("CASEWORK_LIST_LIMIT", 1000, 1..=5000)?,
        })
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

/// Trimmed lookups over the merged key/value map. Blank values count as unset.
struct Settings<'a>(&'a HashMap<String, String>);

impl Settings<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, StartupError> {
        self.get(key).map(str::to_string).ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
    }

    fn text_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T, expected: &str) -> Result<T, StartupError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<T>()
                .map_err(|_| StartupError::invalid(format!("{} must be {}", key, expected))),
        }
    }

    fn bounded<T>(
        &self,
        key: &str,
        default: T,
        range: RangeInclusive<T>,
    ) -> Result<T, StartupError>
    where
        T: FromStr + PartialOrd + Display,
    {
        let value = self.parsed(key, default, "an integer")?;
        if !range.contains(&value) {
            return Err(StartupError::invalid(format!(
                "{} must be between {} and {}",
                key,
                range.start(),
                range.end()
            )));
        }
        Ok(value)
    }
}

fn read_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;
    parse_env_lines(&contents)
}

/// `KEY=VALUE` per line; `#` comments and blank lines are skipped and one
/// layer of matching quotes is removed from values.
fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let parse_error = |line_no: usize, reason: &str| StartupError {
        code: "ERR_CONFIG_FILE_PARSE",
        message: format!("invalid config line {} ({})", line_no, reason),
    };

    contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| parse_error(line_no, "expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error(line_no, "empty key"));
            }
            Ok((key.to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| {
            value
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        })
        .unwrap_or(value)
}
