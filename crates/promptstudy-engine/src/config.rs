use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MIN_TIMEOUT_SECS: u64 = 5;
const MAX_TIMEOUT_SECS: u64 = 600;
const SESSION_DIR_NAME: &str = "promptstudy-session";

/// Runtime settings read from the environment.
///
/// - `STUDY_API_URL`: backend base url
/// - `STUDY_AUTH_TOKEN`: bearer token attached to every backend call
/// - `STUDY_HTTP_TIMEOUT_SECS`: per-call timeout, clamped to 5..=600
/// - `STUDY_SESSION_DIR`: where session storage and the event log live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub session_dir: PathBuf,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            session_dir: env::temp_dir().join(SESSION_DIR_NAME),
        }
    }
}

impl StudyConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: non_empty_env("STUDY_API_URL")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            auth_token: non_empty_env("STUDY_AUTH_TOKEN"),
            timeout: non_empty_env("STUDY_HTTP_TIMEOUT_SECS")
                .and_then(|value| parse_timeout(&value))
                .unwrap_or(defaults.timeout),
            session_dir: non_empty_env("STUDY_SESSION_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_dir),
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_session_dir(mut self, session_dir: impl Into<PathBuf>) -> Self {
        self.session_dir = session_dir.into();
        self
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_timeout(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(
        secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS),
    ))
}
