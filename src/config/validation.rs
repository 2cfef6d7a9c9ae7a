use crate::config::types::{
    AuthConfig, Config, CrawlerConfig, Frequency, JobConfig, ScheduleConfig, StorageConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    for job in &config.jobs {
        validate_job(job)?;
    }
    Ok(())
}

/// Validates engine-wide crawler settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.fetch_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "fetch_timeout_ms must be >= 100ms, got {}ms",
            config.fetch_timeout_ms
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.max_backoff_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) must be >= backoff_base_ms ({})",
            config.max_backoff_ms, config.backoff_base_ms
        )));
    }

    if config.failure_window < 1 {
        return Err(ConfigError::Validation(
            "failure_window must be >= 1".to_string(),
        ));
    }

    if !(config.failure_rate_threshold > 0.0 && config.failure_rate_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "failure_rate_threshold must be in (0, 1], got {}",
            config.failure_rate_threshold
        )));
    }

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(
            "max_consecutive_failures must be >= 1".to_string(),
        ));
    }

    if config.scheduling_tick_ms < 1 {
        return Err(ConfigError::Validation(
            "scheduling_tick_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    // The name doubles as the robots.txt product token
    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates a single job definition
///
/// Called for every `[[job]]` entry at load time and again whenever a job is
/// created through the engine API.
pub fn validate_job(job: &JobConfig) -> Result<(), ConfigError> {
    let start = Url::parse(&job.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", job.start_url, e))
    })?;

    if start.scheme() != "http" && start.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' must use http or https",
            job.start_url
        )));
    }

    if start.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Start URL '{}' has no host",
            job.start_url
        )));
    }

    if job.owner.is_empty() {
        return Err(ConfigError::Validation("owner cannot be empty".to_string()));
    }

    if job.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            job.max_pages
        )));
    }

    if job.max_concurrent < 1 || job.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent must be between 1 and 100, got {}",
            job.max_concurrent
        )));
    }

    for pattern in job.include_patterns.iter().chain(&job.exclude_patterns) {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Pattern '{}' does not compile: {}", pattern, e))
        })?;
    }

    validate_content_types(&job.content_types)?;

    for name in job.headers.keys() {
        reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ConfigError::Validation(format!("Invalid header name '{}'", name))
        })?;
    }

    if let Some(AuthConfig::Basic { username, .. }) = &job.auth {
        if username.is_empty() {
            return Err(ConfigError::Validation(
                "basic auth username cannot be empty".to_string(),
            ));
        }
    }

    if let Some(schedule) = &job.schedule {
        validate_schedule(schedule)?;
    }

    Ok(())
}

/// Validates the content type allowlist
fn validate_content_types(content_types: &[String]) -> Result<(), ConfigError> {
    if content_types.is_empty() {
        return Err(ConfigError::Validation(
            "content_types must list at least one MIME type".to_string(),
        ));
    }

    for content_type in content_types {
        match content_type.split_once('/') {
            Some((family, subtype)) if !family.is_empty() && !subtype.is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Invalid content type '{}', expected 'type/subtype' or 'type/*'",
                    content_type
                )))
            }
        }
    }

    Ok(())
}

/// Validates the anchor fields of a recurring schedule
fn validate_schedule(schedule: &ScheduleConfig) -> Result<(), ConfigError> {
    if schedule.hour > 23 {
        return Err(ConfigError::Validation(format!(
            "schedule hour must be 0-23, got {}",
            schedule.hour
        )));
    }

    match schedule.frequency {
        Frequency::Daily => {}
        Frequency::Weekly => match schedule.day_of_week {
            Some(day) if day <= 6 => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "weekly schedules need day-of-week 0-6, got {:?}",
                    other
                )))
            }
        },
        Frequency::Monthly => match schedule.day_of_month {
            Some(day) if (1..=31).contains(&day) => {}
            other => {
                return Err(ConfigError::Validation(format!(
                    "monthly schedules need day-of-month 1-31, got {:?}",
                    other
                )))
            }
        },
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

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_job_defaults() {
        let job = JobConfig::new("https://example.com/");
        assert!(validate_job(&job).is_ok());
    }

    #[test]
    fn test_validate_job_rejects_bad_start_url() {
        assert!(validate_job(&JobConfig::new("not a url")).is_err());
        assert!(validate_job(&JobConfig::new("ftp://example.com/")).is_err());
    }

    #[test]
    fn test_validate_job_rejects_bad_pattern() {
        let mut job = JobConfig::new("https://example.com/");
        job.exclude_patterns.push("([unclosed".to_string());
        assert!(matches!(
            validate_job(&job),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_validate_job_limits() {
        let mut job = JobConfig::new("https://example.com/");
        job.max_pages = 0;
        assert!(validate_job(&job).is_err());

        let mut job = JobConfig::new("https://example.com/");
        job.max_concurrent = 101;
        assert!(validate_job(&job).is_err());
    }

    #[test]
    fn test_validate_content_types() {
        assert!(validate_content_types(&["text/html".to_string()]).is_ok());
        assert!(validate_content_types(&["text/*".to_string()]).is_ok());
        assert!(validate_content_types(&[]).is_err());
        assert!(validate_content_types(&["html".to_string()]).is_err());
    }

    #[test]
    fn test_validate_schedule() {
        let weekly = ScheduleConfig {
            frequency: Frequency::Weekly,
            hour: 4,
            day_of_week: None,
            day_of_month: None,
        };
        assert!(validate_schedule(&weekly).is_err());

        let monthly = ScheduleConfig {
            frequency: Frequency::Monthly,
            hour: 4,
            day_of_week: None,
            day_of_month: Some(31),
        };
        assert!(validate_schedule(&monthly).is_ok());

        let bad_hour = ScheduleConfig {
            frequency: Frequency::Daily,
            hour: 24,
            day_of_week: None,
            day_of_month: None,
        };
        assert!(validate_schedule(&bad_hour).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@domain").is_err());
    }
}
