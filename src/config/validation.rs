use crate::config::types::{Config, HarvesterConfig, OutputConfig, PdfConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Longest robots.txt cache lifetime (one week)
const MAX_TTL_HOURS: u64 = 24 * 7;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvester_config(&config.harvester)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_pdf_config(&config.pdf)?;
    validate_output_config(&config.output)?;
    validate_seeds(&config.seeds)?;

    if config.permissions.ttl_hours == 0 || config.permissions.ttl_hours > MAX_TTL_HOURS {
        return Err(ConfigError::Validation(format!(
            "permissions ttl_hours must be between 1 and {}, got {}",
            MAX_TTL_HOURS, config.permissions.ttl_hours
        )));
    }

    Ok(())
}

/// Validates pacing and retry configuration
fn validate_harvester_config(config: &HarvesterConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 16 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent must be between 1 and 16, got {}",
            config.max_concurrent
        )));
    }

    if config.min_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "min_interval_ms must be >= 100ms, got {}ms",
            config.min_interval_ms
        )));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.backoff_base_ms == 0 || config.backoff_base_ms > config.backoff_cap_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_base_ms must be in 1..={} (backoff_cap_ms), got {}",
            config.backoff_cap_ms, config.backoff_base_ms
        )));
    }

    if config.max_page_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_page_bytes must be greater than zero".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_pdf_config(config: &PdfConfig) -> Result<(), ConfigError> {
    if config.max_bytes == 0 {
        return Err(ConfigError::Validation(
            "pdf max_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates seed URLs: http(s), parseable, and all on one host
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    let mut host: Option<String> = None;

    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }

        let seed_host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidUrl(format!("Seed URL '{}' has no host", seed)))?
            .to_lowercase();

        match &host {
            None => host = Some(seed_host),
            Some(first) if *first != seed_host => {
                return Err(ConfigError::Validation(format!(
                    "All seeds must share one host: '{}' differs from '{}'",
                    seed_host, first
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
