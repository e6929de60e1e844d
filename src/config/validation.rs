use crate::config::types::{
    Config, CrawlerConfig, OutputConfig, RateLimitConfig, SourceConfig, SourceKind, TargetEntry,
    WindowConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_output_config(&config.output)?;
    validate_targets(&config.targets)?;
    validate_window(config.crawler.source, config.window.as_ref())?;
    validate_source_config(config.crawler.source, &config.source)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 16 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 16, got {}",
            config.concurrency
        )));
    }

    if config.target_count == Some(0) {
        return Err(ConfigError::Validation(
            "target-count must be >= 1 when set".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.soft_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "soft-limit must be >= 1, got {}",
            config.soft_limit
        )));
    }

    if config.window_secs < 1 {
        return Err(ConfigError::Validation(
            "window-secs must be >= 1".to_string(),
        ));
    }

    if config.min_spacing_ms > config.max_spacing_ms {
        return Err(ConfigError::Validation(format!(
            "min-spacing-ms ({}) must not exceed max-spacing-ms ({})",
            config.min_spacing_ms, config.max_spacing_ms
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_targets(targets: &[TargetEntry]) -> Result<(), ConfigError> {
    if targets.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[target]] is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for target in targets {
        if target.id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "target '{}' has an empty id",
                target.label
            )));
        }

        if target.target_count == Some(0) {
            return Err(ConfigError::Validation(format!(
                "target '{}' has target-count 0",
                target.id
            )));
        }

        if !seen.insert(target.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate target id '{}'",
                target.id
            )));
        }
    }

    Ok(())
}

fn validate_window(source: SourceKind, window: Option<&WindowConfig>) -> Result<(), ConfigError> {
    match window {
        Some(window) if window.start_year > window.end_year => {
            Err(ConfigError::Validation(format!(
                "window start-year {} is after end-year {}",
                window.start_year, window.end_year
            )))
        }
        None if source.needs_window() => Err(ConfigError::Validation(format!(
            "source '{}' requires a [window] section",
            source
        ))),
        _ => Ok(()),
    }
}

fn validate_source_config(source: SourceKind, config: &SourceConfig) -> Result<(), ConfigError> {
    if let Some(base) = &config.base_url {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "base-url '{}' must use http or https",
                base
            )));
        }
    }

    if source == SourceKind::Pullpush && config.tickers.is_empty() {
        return Err(ConfigError::Validation(
            "source 'pullpush' requires at least one ticker".to_string(),
        ));
    }

    if config.page_size == Some(0) {
        return Err(ConfigError::Validation(
            "page-size must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}
