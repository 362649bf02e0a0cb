use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};

/// How the server treats requests that carry no valid session token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Protected endpoints answer 401.
    #[default]
    Strict,
    /// Unauthenticated callers proceed as a read-mostly guest.
    Demo,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Strict => f.write_str("strict"),
            AuthMode::Demo => f.write_str("demo"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(AuthMode::Strict),
            "demo" => Ok(AuthMode::Demo),
            other => Err(format!("unknown auth mode '{other}' (expected strict or demo)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub auth_mode: AuthMode,
    pub session_ttl_hours: i64,
    /// Mirror directory for uploaded photos. Backups are skipped when unset.
    pub backup_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("schoolyard.db")
    }

    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    #[must_use]
    pub fn password_file(&self) -> PathBuf {
        self.data_dir.join(".superadmin_password")
    }

    /// Overlays the values present in `file` onto this config.
    pub fn merge(&mut self, file: FileConfig) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(data_dir) = file.data_dir {
            self.data_dir = data_dir;
        }
        if let Some(auth_mode) = file.auth_mode {
            self.auth_mode = auth_mode;
        }
        if let Some(ttl) = file.session_ttl_hours {
            self.session_ttl_hours = ttl;
        }
        if file.backup_dir.is_some() {
            self.backup_dir = file.backup_dir;
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            auth_mode: AuthMode::Strict,
            session_ttl_hours: 24,
            backup_dir: None,
        }
    }
}

/// On-disk TOML configuration. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub auth_mode: Option<AuthMode>,
    pub session_ttl_hours: Option<i64>,
    pub backup_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(ttl) = config.session_ttl_hours {
            if ttl <= 0 {
                return Err(Error::Config("session_ttl_hours must be positive".into()));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_values_override_defaults() {
        let file = FileConfig::parse(
            r#"
            port = 9090
            auth_mode = "demo"
            backup_dir = "/srv/backup"
            "#,
        )
        .unwrap();

        let mut config = ServerConfig::default();
        config.merge(file);

        assert_eq!(config.port, 9090);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.auth_mode, AuthMode::Demo);
        assert_eq!(config.backup_dir, Some(PathBuf::from("/srv/backup")));
        assert_eq!(config.session_ttl_hours, 24);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = FileConfig::parse("prot = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_non_positive_ttl_is_rejected() {
        assert!(FileConfig::parse("session_ttl_hours = 0").is_err());
    }

    #[test]
    fn test_auth_mode_parse() {
        assert_eq!("Demo".parse::<AuthMode>().unwrap(), AuthMode::Demo);
        assert_eq!("strict".parse::<AuthMode>().unwrap(), AuthMode::Strict);
        assert!("open".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = ServerConfig {
            data_dir: PathBuf::from("/var/lib/schoolyard"),
            ..ServerConfig::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/schoolyard/schoolyard.db"));
        assert_eq!(config.uploads_dir(), PathBuf::from("/var/lib/schoolyard/uploads"));
    }
}
