use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Batch size must be positive: {field} = 0")]
    ZeroBatchSize { field: &'static str },

    #[error("Invalid endpoint URL in {field}: '{url}' ({reason})")]
    InvalidEndpoint {
        field: &'static str,
        url: String,
        reason: String,
    },

    #[error("Ledger endpoint is configured but CONTENTMIG_AUTHORITY_KEY is not set")]
    MissingAuthorityKey,

    #[error("migration.results_dir must not be empty")]
    EmptyResultsDir,

    #[error("http.max_retries must be at least 1")]
    ZeroRetries,

    #[error("source.page_size must be positive")]
    ZeroPageSize,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_batch_sizes(config)?;
    validate_endpoints(config)?;
    validate_ledger(config)?;
    validate_paths(config)?;

    if config.http.max_retries == 0 {
        return Err(ValidationError::ZeroRetries);
    }
    if config.source.page_size == 0 {
        return Err(ValidationError::ZeroPageSize);
    }

    Ok(())
}

fn validate_batch_sizes(config: &Config) -> Result<(), ValidationError> {
    let sizes = [
        ("migration.category_batch_size", config.migration.category_batch_size),
        ("migration.channel_batch_size", config.migration.channel_batch_size),
        ("migration.video_batch_size", config.migration.video_batch_size),
        ("migration.member_batch_size", config.migration.member_batch_size),
    ];

    match sizes.iter().find(|(_, size)| *size == 0) {
        Some((field, _)) => Err(ValidationError::ZeroBatchSize { field: *field }),
        None => Ok(()),
    }
}

fn validate_endpoints(config: &Config) -> Result<(), ValidationError> {
    let single = [
        ("ledger.endpoint", config.ledger.endpoint.as_ref()),
        ("source.query_endpoint", config.source.query_endpoint.as_ref()),
    ];
    for (field, url) in single {
        if let Some(url) = url {
            check_url(field, url)?;
        }
    }

    for url in &config.source.distributor_endpoints {
        check_url("source.distributor_endpoints", url)?;
    }
    for url in &config.destination.upload_endpoints {
        check_url("destination.upload_endpoints", url)?;
    }

    Ok(())
}

fn check_url(field: &'static str, url: &str) -> Result<(), ValidationError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ValidationError::InvalidEndpoint {
        field,
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidEndpoint {
            field,
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn validate_ledger(config: &Config) -> Result<(), ValidationError> {
    if config.ledger.endpoint.is_some() && config.ledger.authority_key.is_none() {
        return Err(ValidationError::MissingAuthorityKey);
    }
    Ok(())
}

fn validate_paths(config: &Config) -> Result<(), ValidationError> {
    if config.migration.results_dir.as_os_str().is_empty() {
        return Err(ValidationError::EmptyResultsDir);
    }
    Ok(())
}
