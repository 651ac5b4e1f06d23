use anyhow::Result;
use opendal::Operator;
use opendal::services;

use crate::config::{OssConfig, S3Config, StorageConfig};

/// Build an operator for the configured backend
pub fn create_operator(config: &StorageConfig) -> Result<Operator> {
    let op = match config {
        StorageConfig::Fs { root } => {
            tracing::info!("[storage] filesystem backend rooted at {}", root);
            Operator::new(services::Fs::default().root(root))?.finish()
        }
        StorageConfig::S3(s3) => {
            tracing::info!(
                "[storage] s3 backend bucket={} region={:?}",
                s3.bucket,
                s3.region
            );
            Operator::new(s3_builder(s3))?.finish()
        }
        StorageConfig::Oss(oss) => {
            tracing::info!(
                "[storage] oss backend bucket={} region={}",
                oss.bucket,
                oss.region
            );
            Operator::new(oss_builder(oss))?.finish()
        }
    };
    Ok(op)
}

fn s3_builder(cfg: &S3Config) -> services::S3 {
    let mut builder = services::S3::default()
        .bucket(&cfg.bucket)
        .root(cfg.root.trim_start_matches('/'));

    if let Some(region) = &cfg.region {
        builder = builder.region(region);
    }
    if let Some(endpoint) = &cfg.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(key) = &cfg.access_key_id {
        builder = builder.access_key_id(key);
    }
    if let Some(secret) = &cfg.secret_access_key {
        builder = builder.secret_access_key(secret);
    }
    if let Some(token) = &cfg.session_token {
        builder = builder.session_token(token);
    }
    if cfg.disable_config_load {
        builder = builder.disable_config_load();
    }
    if cfg.enable_virtual_host_style {
        builder = builder.enable_virtual_host_style();
    }
    builder
}

// OSS speaks the S3 protocol with virtual host addressing
fn oss_builder(cfg: &OssConfig) -> services::S3 {
    let mut builder = services::S3::default()
        .bucket(&cfg.bucket)
        .root(cfg.root.trim_start_matches('/'))
        .region(&cfg.region)
        .endpoint(&cfg.endpoint)
        .enable_virtual_host_style();

    if let Some(key) = &cfg.access_key_id {
        builder = builder.access_key_id(key);
    }
    if let Some(secret) = &cfg.access_key_secret {
        builder = builder.secret_access_key(secret);
    }
    if let Some(token) = &cfg.security_token {
        builder = builder.session_token(token);
    }
    builder
}

/// Build the operator and probe it; a failed probe is logged, not fatal,
/// so a recorder can come up while the bucket is briefly unreachable.
pub async fn init_operator(config: &StorageConfig) -> Result<Operator> {
    let operator = create_operator(config)?;
    match operator.check().await {
        Ok(()) => tracing::info!("[storage] backend verified"),
        Err(e) => tracing::warn!("[storage] backend check failed, continuing: {}", e),
    }
    Ok(operator)
}
