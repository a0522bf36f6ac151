use crate::config::types::{
    Config, CrawlerConfig, JobConfig, OutputConfig, RecordRule, SessionConfig, ThrottleConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_throttle_config(&config.throttle)?;
    validate_output_config(&config.output)?;
    if let Some(session) = &config.session {
        validate_session_config(session)?;
    }
    validate_jobs(&config.jobs)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.fetch_timeout == 0 {
        return Err(ConfigError::Validation(
            "fetch-timeout must be at least 1 second".to_string(),
        ));
    }

    if config.concurrent_per_domain < 1 || config.concurrent_per_domain > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrent-per-domain must be between 1 and 100, got {}",
            config.concurrent_per_domain
        )));
    }

    if !(0.0..1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be in [0, 1), got {}",
            config.jitter
        )));
    }

    if config.retry_backoff > config.retry_backoff_max {
        return Err(ConfigError::Validation(format!(
            "retry-backoff ({}ms) exceeds retry-backoff-max ({}ms)",
            config.retry_backoff, config.retry_backoff_max
        )));
    }

    if let Some(code) = config
        .retry_http_codes
        .iter()
        .find(|c| !(100..=599).contains(*c))
    {
        return Err(ConfigError::Validation(format!(
            "retry-http-codes contains invalid status {}",
            code
        )));
    }

    if config.progress_every == 0 {
        return Err(ConfigError::Validation(
            "progress-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.min_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "throttle min-delay ({}ms) exceeds max-delay ({}ms)",
            config.min_delay, config.max_delay
        )));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.base_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "output base-dir cannot be empty".to_string(),
        ));
    }

    if config.destinations.keys().any(|d| d.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "output destinations cannot contain an empty name".to_string(),
        ));
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    parse_http_url(&config.login_url, "session login-url")?;
    if let Some(submit) = &config.submit_url {
        parse_http_url(submit, "session submit-url")?;
    }
    if config.username_field.is_empty() || config.password_field.is_empty() {
        return Err(ConfigError::Validation(
            "session form field names cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates job entries
fn validate_jobs(jobs: &[JobConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for job in jobs {
        if job.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "job name cannot be empty".to_string(),
            ));
        }

        if !names.insert(job.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate job name '{}'",
                job.name
            )));
        }

        validate_job_input(job)?;

        if let Some(wait_for) = &job.wait_for {
            if !job.render {
                return Err(ConfigError::Validation(format!(
                    "job '{}': wait-for requires render = true",
                    job.name
                )));
            }
            validate_selector(wait_for, &job.name)?;
        }

        if let Some(next) = &job.next {
            validate_selector(next, &job.name)?;
        }

        for rule in &job.records {
            validate_record_rule(rule, &job.name)?;
        }
    }

    Ok(())
}

/// A job reads either an identifier file or literal start URLs, never both
fn validate_job_input(job: &JobConfig) -> Result<(), ConfigError> {
    match (&job.ids_file, job.start_urls.is_empty()) {
        (Some(_), false) => Err(ConfigError::Validation(format!(
            "job '{}': ids-file and start-urls are mutually exclusive",
            job.name
        ))),
        (None, true) => Err(ConfigError::Validation(format!(
            "job '{}': needs either ids-file or start-urls",
            job.name
        ))),
        (Some(_), true) => {
            let template = job.url_template.as_deref().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "job '{}': ids-file requires url-template",
                    job.name
                ))
            })?;
            if !template.contains("{id}") {
                return Err(ConfigError::Validation(format!(
                    "job '{}': url-template must contain {{id}}",
                    job.name
                )));
            }
            parse_http_url(&template.replace("{id}", "0"), "url-template")?;
            if job.id_digits == 0 {
                return Err(ConfigError::Validation(format!(
                    "job '{}': id-digits must be >= 1",
                    job.name
                )));
            }
            Ok(())
        }
        (None, false) => {
            for seed in &job.start_urls {
                parse_http_url(seed, "start url")?;
            }
            Ok(())
        }
    }
}

fn validate_record_rule(rule: &RecordRule, job: &str) -> Result<(), ConfigError> {
    if rule.destination.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "job '{}': record destination cannot be empty",
            job
        )));
    }

    if let Some(rows) = &rule.rows {
        validate_selector(rows, job)?;
    }

    if rule.fields.is_empty() {
        return Err(ConfigError::Validation(format!(
            "job '{}': record '{}' has no fields",
            job, rule.destination
        )));
    }

    for field in &rule.fields {
        match (&field.select, &field.context) {
            (Some(select), None) => validate_selector(select, job)?,
            (None, Some(_)) => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "job '{}': field '{}' needs exactly one of select or context",
                    job, field.name
                )))
            }
        }
    }

    Ok(())
}

fn validate_selector(selector: &str, job: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map_err(|e| {
        ConfigError::InvalidSelector(format!("job '{}': '{}': {:?}", job, selector, e))
    })?;
    Ok(())
}

fn parse_http_url(raw: &str, what: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, raw
        )));
    }
    Ok(url)
}
