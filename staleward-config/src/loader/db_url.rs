use std::{fs, path::Path};

use url::Url;

use crate::{
    ConfigLoadError,
    models::sources::{EnvConfig, FileDatabaseConfig},
};

const DEFAULT_PORT: u16 = 5432;

/// Host, user and database name taken from `DATABASE_*` variables. All three
/// must be present for a URL to be assembled from parts.
struct ConnectionParts<'a> {
    host: &'a str,
    port: u16,
    user: &'a str,
    database: &'a str,
}

impl<'a> ConnectionParts<'a> {
    fn from_env(env: &'a EnvConfig) -> Option<Self> {
        Some(Self {
            host: non_blank(&env.database_host)?,
            port: env.database_port.unwrap_or(DEFAULT_PORT),
            user: non_blank(&env.database_user)?,
            database: non_blank(&env.database_name)?,
        })
    }

    fn to_url(&self) -> Result<Url, ConfigLoadError> {
        let mut url = parse(&format!(
            "postgresql://{}:{}/{}",
            self.host, self.port, self.database
        ))?;
        url.set_username(self.user).map_err(|()| {
            ConfigLoadError::InvalidDatabaseUsername {
                username: self.user.to_string(),
            }
        })?;
        Ok(url)
    }
}

/// PostgreSQL connection string. The first source that yields a value wins:
///
/// 1. `DATABASE_URL`
/// 2. contents of `DATABASE_URL_FILE`
/// 3. `[database] url` in the TOML file
/// 4. `DATABASE_HOST`, `DATABASE_PORT`, `DATABASE_USER`, `DATABASE_NAME`
///
/// Sources 3 and 4 take the password from `DATABASE_PASSWORD` or a password
/// file when the URL carries none.
pub fn resolve_database_url(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = non_blank(&env.database_url) {
        return Ok(Some(url.to_string()));
    }
    if let Some(path) = &env.database_url_file
        && let Some(url) = secret_from_file(path)?
    {
        return Ok(Some(url));
    }

    let url = if let Some(raw) = non_blank(&file_database.url) {
        parse(raw.trim())?
    } else if let Some(parts) = ConnectionParts::from_env(env) {
        parts.to_url()?
    } else {
        return Ok(None);
    };
    with_password(url, env, file_database).map(|url| Some(url.to_string()))
}

fn with_password(
    mut url: Url,
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Url, ConfigLoadError> {
    if url.password().is_some() {
        return Ok(url);
    }
    if let Some(password) = database_password(env, file_database)? {
        url.set_password(Some(&password))
            .map_err(|()| ConfigLoadError::InvalidDatabasePassword)?;
    }
    Ok(url)
}

/// `DATABASE_PASSWORD`, then `DATABASE_PASSWORD_FILE`, then the TOML
/// `password_file`.
fn database_password(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(password) = non_blank(&env.database_password) {
        return Ok(Some(password.to_string()));
    }
    let files = [&env.database_password_file, &file_database.password_file];
    for path in files.into_iter().flatten() {
        if let Some(password) = secret_from_file(path)? {
            return Ok(Some(password));
        }
    }
    Ok(None)
}

fn secret_from_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| {
        ConfigLoadError::SecretFileIo {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let secret = contents.trim();
    Ok((!secret.is_empty()).then(|| secret.to_string()))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}

fn parse(raw: &str) -> Result<Url, ConfigLoadError> {
    Url::parse(raw)
        .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn secret_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn explicit_url_wins() {
        let env = EnvConfig {
            database_url: Some("postgresql://a@db/inventory".into()),
            database_host: Some("ignored".into()),
            ..EnvConfig::default()
        };
        let url =
            resolve_database_url(&env, &FileDatabaseConfig::default()).unwrap();
        assert_eq!(url.as_deref(), Some("postgresql://a@db/inventory"));
    }

    #[test]
    fn url_file_is_trimmed() {
        let file = secret_file("  postgresql://a@db/inventory  ");
        let env = EnvConfig {
            database_url_file: Some(file.path().to_path_buf()),
            ..EnvConfig::default()
        };
        let url =
            resolve_database_url(&env, &FileDatabaseConfig::default()).unwrap();
        assert_eq!(url.as_deref(), Some("postgresql://a@db/inventory"));
    }

    #[test]
    fn parts_are_assembled_with_password_file() {
        let secret = secret_file("s3cr3t");
        let env = EnvConfig {
            database_host: Some("db".into()),
            database_user: Some("inventory".into()),
            database_name: Some("insights".into()),
            database_password_file: Some(secret.path().to_path_buf()),
            ..EnvConfig::default()
        };

        let url =
            resolve_database_url(&env, &FileDatabaseConfig::default()).unwrap();
        assert_eq!(
            url.as_deref(),
            Some("postgresql://inventory:s3cr3t@db:5432/insights")
        );
    }

    #[test]
    fn incomplete_parts_yield_none() {
        let env = EnvConfig {
            database_host: Some("db".into()),
            database_user: Some("  ".into()),
            database_name: Some("insights".into()),
            ..EnvConfig::default()
        };
        let url =
            resolve_database_url(&env, &FileDatabaseConfig::default()).unwrap();
        assert!(url.is_none());
    }

    #[test]
    fn file_url_gets_password_injected() {
        let env = EnvConfig {
            database_password: Some("pw".into()),
            ..EnvConfig::default()
        };
        let file = FileDatabaseConfig {
            url: Some("postgresql://inventory@db:5432/insights".into()),
            ..FileDatabaseConfig::default()
        };
        let url = resolve_database_url(&env, &file).unwrap();
        assert_eq!(
            url.as_deref(),
            Some("postgresql://inventory:pw@db:5432/insights")
        );
    }

    #[test]
    fn password_in_file_url_is_kept() {
        let env = EnvConfig {
            database_password: Some("other".into()),
            ..EnvConfig::default()
        };
        let file = FileDatabaseConfig {
            url: Some("postgresql://inventory:pw@db:5432/insights".into()),
            ..FileDatabaseConfig::default()
        };
        let url = resolve_database_url(&env, &file).unwrap();
        assert_eq!(
            url.as_deref(),
            Some("postgresql://inventory:pw@db:5432/insights")
        );
    }

    #[test]
    fn missing_secret_file_is_an_error() {
        let env = EnvConfig {
            database_url_file: Some("/nonexistent/staleward-db-url".into()),
            ..EnvConfig::default()
        };
        let err = resolve_database_url(&env, &FileDatabaseConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigLoadError::SecretFileIo { .. }));
    }

    #[test]
    fn nothing_configured_yields_none() {
        let url = resolve_database_url(
            &EnvConfig::default(),
            &FileDatabaseConfig::default(),
        )
        .unwrap();
        assert!(url.is_none());
    }
}
