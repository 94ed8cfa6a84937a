use std::path::Path;

use {thiserror::Error, tracing::debug};

use crate::schema::ParleyConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Load config from the given TOML path.
pub fn load_config(path: &Path) -> Result<ParleyConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Load config, falling back to defaults when the file does not exist.
///
/// A file that exists but fails to read or parse is an error: starting a
/// process against half a config is worse than refusing to start.
pub fn load_or_default(path: &Path) -> Result<ParleyConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ParleyConfig::default());
    }
    load_config(path)
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = load_or_default(Path::new("/nonexistent/conf.conf")).unwrap();
        assert_eq!(cfg.http.port_or(crate::DEFAULT_EDGE_HTTP_PORT), 8081);
        assert_eq!(cfg.http.port_or(crate::DEFAULT_LOGIC_HTTP_PORT), 8090);
        assert_eq!(cfg.kafka.topic, "my-topic");
        assert_eq!(cfg.session.ttl_secs, 86_400);
        assert_eq!(cfg.log_filter(), "info");
    }

    #[test]
    fn parses_recognised_keys() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
log_level = 0

[http]
port = 9000

[grpc]
port = 9001
advertise_addr = "10.0.0.5:9001"

[metrics]
port = 9100

[kafka]
workers = 8

[[rooms]]
id = "0001"
name = "general"

[[rooms]]
id = "0002"
name = "random"
"#
        )
        .unwrap();

        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.log_filter(), "error");
        assert_eq!(cfg.http.port_or(crate::DEFAULT_EDGE_HTTP_PORT), 9000);
        assert_eq!(cfg.grpc.advertise_addr.as_deref(), Some("10.0.0.5:9001"));
        assert_eq!(cfg.metrics.port, Some(9100));
        assert_eq!(cfg.kafka.workers, 8);
        assert_eq!(cfg.seed_rooms().len(), 2);
        // Unconfigured sections keep defaults.
        assert_eq!(cfg.history.persist_batch_size, 100);
    }

    #[test]
    fn garbage_config_is_fatal() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "http = \"not a table\"").unwrap();
        assert!(matches!(
            load_config(f.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn empty_seed_defaults_to_lobby() {
        let cfg = ParleyConfig::default();
        let rooms = cfg.seed_rooms();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "0001");
    }
}
