//! Bearer-token credential and its durable storage
//!
//! A single value under a fixed key. Read once at startup, written whenever
//! the user saves or clears it.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// File name the credential is stored under
pub const CREDENTIAL_KEY: &str = "groq_api_key";

/// Opaque bearer token; never printed by `Debug`
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token. Blank values are not credentials.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credential from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write credential to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable single-value storage for the credential
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, CredentialError>;

    /// Persist the value, or remove it when `None`
    fn save(&self, credential: Option<&Credential>) -> Result<(), CredentialError>;
}

/// Stores the credential as a file inside the data directory
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CREDENTIAL_KEY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                debug!(path = ?self.path, "credential loaded");
                Ok(Credential::new(contents))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, credential: Option<&Credential>) -> Result<(), CredentialError> {
        let write_err = |source: std::io::Error| CredentialError::Write {
            path: self.path.clone(),
            source,
        };

        match credential {
            Some(credential) => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(write_err)?;
                }
                std::fs::write(&self.path, credential.expose()).map_err(write_err)?;

                // Owner-only (0600)
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                        .map_err(write_err)?;
                }

                info!(path = ?self.path, "credential saved");
            }
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => info!(path = ?self.path, "credential cleared"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(write_err(e)),
            },
        }

        Ok(())
    }
}
