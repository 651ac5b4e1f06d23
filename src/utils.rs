use tracing::{debug, error};

pub async fn shutdown_signal() {
    let name = wait_for_stop_signal().await;
    debug!("Received signal: {}", name);
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut terminate), Ok(mut interrupt)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        error!("failed to install signal handlers, falling back to ctrl-c");
        let _ = tokio::signal::ctrl_c().await;
        return "CTRL_C";
    };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "CTRL_C"
}

/// Reads `path`, then `{name}.toml`, then `/etc/livenvr/{name}.toml`,
/// falling back to defaults
pub fn load<T>(name: String, path: Option<String>) -> T
where
    T: serde::de::DeserializeOwned + std::default::Default,
{
    use std::fs::read_to_string;
    let result = path
        .map(read_to_string)
        .unwrap_or_else(|| read_to_string(format!("{name}.toml")))
        .or_else(|_| read_to_string(format!("/etc/livenvr/{name}.toml")))
        .unwrap_or_default();
    match toml::from_str(result.as_str()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("config load error: {}", err);
            Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liverec::config::Config;

    #[test]
    fn test_load_missing_falls_back_to_defaults() {
        let cfg: Config = load(
            "livenvr-missing".to_string(),
            Some("/nonexistent/livenvr.toml".to_string()),
        );
        assert_eq!(cfg.streaming.max_streams, Config::default().streaming.max_streams);
    }

    #[test]
    fn test_load_reads_given_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("livenvr.toml");
        std::fs::write(&path, "[streaming]\nmax_streams = 3\n").unwrap();

        let cfg: Config = load(
            "livenvr".to_string(),
            Some(path.to_string_lossy().into_owned()),
        );
        assert_eq!(cfg.streaming.max_streams, 3);
    }
}
