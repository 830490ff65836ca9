use std::net::IpAddr;
use std::time::Duration;

const LEASE_TIMEOUT_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// Logger identity recorded on every invocation span.
    pub logger_name: String,
    pub mosip_get_uin_url: String,
    pub oauth: OAuthConfig,
    pub max_request_attempts: i32,
    pub request_timeout: Duration,
    pub lease_duration: Duration,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;
        let mosip_get_uin_url = env_required("MOSIP_GET_UIN_URL")?;

        let oauth = OAuthConfig {
            token_url: env_required("OAUTH_TOKEN_URL")?,
            client_id: env_required("OAUTH_CLIENT_ID")?,
            client_secret: env_required("OAUTH_CLIENT_SECRET")?,
        };

        let host: IpAddr = env_or("IDGEN_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid IDGEN_HOST: {e}"))?;

        let port: u16 = env_or("IDGEN_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid IDGEN_PORT: {e}"))?;

        let max_request_attempts: i32 = env_or("IDGEN_MAX_REQUEST_ATTEMPTS", "3")
            .parse()
            .map_err(|e| format!("Invalid IDGEN_MAX_REQUEST_ATTEMPTS: {e}"))?;
        if max_request_attempts < 1 {
            return Err("IDGEN_MAX_REQUEST_ATTEMPTS must be at least 1".to_string());
        }

        let request_timeout = env_secs("IDGEN_REQUEST_TIMEOUT_SECS", "30")?;
        let lease_duration = env_secs("IDGEN_LEASE_SECS", "300")?;
        check_lease(request_timeout, lease_duration)?;

        let worker_count: usize = env_or("IDGEN_WORKER_COUNT", "4")
            .parse()
            .map_err(|e| format!("Invalid IDGEN_WORKER_COUNT: {e}"))?;
        if worker_count == 0 {
            return Err("IDGEN_WORKER_COUNT must be at least 1".to_string());
        }

        let queue_capacity: usize = env_or("IDGEN_QUEUE_CAPACITY", "1024")
            .parse()
            .map_err(|e| format!("Invalid IDGEN_QUEUE_CAPACITY: {e}"))?;
        if queue_capacity == 0 {
            return Err("IDGEN_QUEUE_CAPACITY must be at least 1".to_string());
        }

        let logger_name = env_or("IDGEN_LOGGER_NAME", "idgen_worker");
        let log_level = env_or("IDGEN_LOG_LEVEL", "info");

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            logger_name,
            mosip_get_uin_url,
            oauth,
            max_request_attempts,
            request_timeout,
            lease_duration,
            worker_count,
            queue_capacity,
        })
    }
}

/// The lease must outlast the bounded remote step with room left for the
/// storage round trips around it.
fn check_lease(request_timeout: Duration, lease_duration: Duration) -> Result<(), String> {
    if lease_duration < request_timeout * LEASE_TIMEOUT_FACTOR {
        return Err(format!(
            "IDGEN_LEASE_SECS ({}) must be at least {LEASE_TIMEOUT_FACTOR}x IDGEN_REQUEST_TIMEOUT_SECS ({})",
            lease_duration.as_secs(),
            request_timeout.as_secs()
        ));
    }
    Ok(())
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: &str) -> Result<Duration, String> {
    let secs: u64 = env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))?;
    if secs == 0 {
        return Err(format!("{key} must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
