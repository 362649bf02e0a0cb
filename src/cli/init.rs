use std::fs;
use std::path::PathBuf;

use anyhow::bail;

use super::set_restrictive_permissions;
use crate::auth::{generate_password, hash_password};
use crate::config::ServerConfig;
use crate::store::{SqliteStore, Store};
use crate::types::{NewUser, Role};

pub struct InitOutcome {
    pub username: String,
    pub password: String,
    pub password_file: PathBuf,
}

/// Creates the database and the superadmin account of a fresh data
/// directory. Fails when a superadmin already exists.
pub fn run_init(config: &ServerConfig, username: &str) -> anyhow::Result<InitOutcome> {
    let username = username.trim();
    if username.is_empty() || username.contains(char::is_whitespace) {
        bail!("Username cannot be empty or contain whitespace");
    }

    fs::create_dir_all(&config.data_dir)?;
    fs::create_dir_all(config.uploads_dir())?;

    let store = SqliteStore::new(config.db_path())?;
    store.initialize()?;

    let password_file = config.password_file();
    if store.superadmin_exists()? {
        bail!(
            "Server already initialized. Superadmin password was written to: {}",
            password_file.display()
        );
    }

    let password = generate_password();
    store.create_user(&NewUser {
        username: username.to_string(),
        password_hash: hash_password(&password)?,
        role: Role::Superadmin,
        name: "System Administrator".to_string(),
        email: None,
        institution_id: None,
    })?;

    fs::write(&password_file, format!("{username}:{password}\n"))?;
    set_restrictive_permissions(&password_file);
    store.close()?;

    Ok(InitOutcome {
        username: username.to_string(),
        password,
        password_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::auth::verify_password;

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            data_dir: dir.path().join("data"),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_init_creates_superadmin_once() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let outcome = run_init(&config, "superadmin").unwrap();
        assert!(outcome.password_file.exists());
        assert!(config.uploads_dir().is_dir());

        let store = SqliteStore::new(config.db_path()).unwrap();
        let user = store.get_user_by_username("superadmin").unwrap().unwrap();
        assert_eq!(user.role, Role::Superadmin);
        assert!(verify_password(&outcome.password, &user.password_hash).unwrap());

        let err = run_init(&config, "superadmin").err().unwrap();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn test_init_rejects_blank_username() {
        let dir = TempDir::new().unwrap();
        assert!(run_init(&config(&dir), "  ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_password_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let outcome = run_init(&config(&dir), "root").unwrap();
        let mode = fs::metadata(&outcome.password_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
