//! Access tokens for the editing routes.
//!
//! A token is the base64 HMAC-SHA256 of the identifier it belongs to under a
//! secret key, so the tokens file can be edited by hand but not forged
//! without the key. The file maps identifiers to tokens and is re-verified
//! on every reload.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "application::tokens";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to access `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tokens file `{}` is not a JSON object of strings", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("key file `{}` does not hold a hex-encoded key", .path.display())]
    InvalidKey {
        path: PathBuf,
        #[source]
        source: hex::FromHexError,
    },
    #[error("key file `{}` holds an empty key", .path.display())]
    EmptyKey { path: PathBuf },
    #[error("key is not usable for HMAC-SHA256")]
    KeyLength(#[from] hmac::digest::InvalidLength),
    #[error("key file `{}` already exists", .path.display())]
    KeyExists { path: PathBuf },
    #[error("token for `{identifier}` was not issued with the configured key")]
    Mismatch { identifier: String },
}

impl TokenError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

struct TokenEntry {
    identifier: String,
    token: String,
}

pub struct TokenManager {
    signer: TokenSigner,
    file: PathBuf,
    cookie_name: String,
    tokens: RwLock<Vec<TokenEntry>>,
}

impl TokenManager {
    /// Read the key and the tokens file. A missing tokens file is created empty.
    pub fn load(
        key_file: &Path,
        tokens_file: impl Into<PathBuf>,
        cookie_name: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let key = read_key_file(key_file)?;
        Self::with_key(key, tokens_file, cookie_name)
    }

    pub fn with_key(
        key: Vec<u8>,
        tokens_file: impl Into<PathBuf>,
        cookie_name: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let manager = Self {
            signer: TokenSigner::new(&key)?,
            file: tokens_file.into(),
            cookie_name: cookie_name.into(),
            tokens: RwLock::new(Vec::new()),
        };
        match fs::metadata(&manager.file) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::write(&manager.file, "{}").map_err(|err| TokenError::io(&manager.file, err))?;
                info!(op = "tokens::load", file = %manager.file.display(), "Created empty tokens file");
            }
            Err(err) => return Err(TokenError::io(&manager.file, err)),
        }
        manager.reload()?;
        Ok(manager)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn issue(&self, identifier: &str) -> String {
        self.signer.issue(identifier)
    }

    /// The identifier `token` belongs to, if any.
    pub fn identify(&self, token: &str) -> Option<String> {
        let tokens = rw_read(&self.tokens, SOURCE, "identify");
        let mut found = None;
        // No early exit: every entry is compared.
        for entry in tokens.iter() {
            if bool::from(entry.token.as_bytes().ct_eq(token.as_bytes())) {
                found = Some(entry.identifier.clone());
            }
        }
        found
    }

    /// Re-read the tokens file. Any token that does not verify rejects the
    /// whole file and keeps the current set.
    pub fn reload(&self) -> Result<usize, TokenError> {
        let result = self.read_verified();
        match result {
            Ok(entries) => {
                let count = entries.len();
                *rw_write(&self.tokens, SOURCE, "reload") = entries;
                info!(op = "tokens::reload", file = %self.file.display(), tokens = count, "Tokens loaded");
                Ok(count)
            }
            Err(err) => {
                warn!(
                    op = "tokens::reload",
                    file = %self.file.display(),
                    error = %err,
                    "Tokens file rejected; keeping previous tokens"
                );
                Err(err)
            }
        }
    }

    fn read_verified(&self) -> Result<Vec<TokenEntry>, TokenError> {
        let text = fs::read_to_string(&self.file).map_err(|err| TokenError::io(&self.file, err))?;
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&text).map_err(|source| TokenError::Parse {
                path: self.file.clone(),
                source,
            })?;

        raw.into_iter()
            .map(|(identifier, token)| {
                if self.signer.verify(&identifier, &token) {
                    Ok(TokenEntry { identifier, token })
                } else {
                    Err(TokenError::Mismatch { identifier })
                }
            })
            .collect()
    }
}

/// Issues and verifies tokens under one key.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(key: &[u8]) -> Result<Self, TokenError> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(key)?,
        })
    }

    /// The token the key grants to `identifier`.
    pub fn issue(&self, identifier: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(identifier.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Whether `token` is the one the key grants to `identifier`. The tag is
    /// compared in constant time.
    pub fn verify(&self, identifier: &str, token: &str) -> bool {
        let Ok(tag) = BASE64.decode(token.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(identifier.as_bytes());
        mac.verify_slice(&tag).is_ok()
    }
}

pub fn read_key_file(path: &Path) -> Result<Vec<u8>, TokenError> {
    let text = fs::read_to_string(path).map_err(|err| TokenError::io(path, err))?;
    let key = hex::decode(text.trim()).map_err(|source| TokenError::InvalidKey {
        path: path.to_path_buf(),
        source,
    })?;
    if key.is_empty() {
        return Err(TokenError::EmptyKey {
            path: path.to_path_buf(),
        });
    }
    Ok(key)
}

/// 32 random bytes.
pub fn generate_key() -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(Uuid::new_v4().as_bytes());
    key.extend_from_slice(Uuid::new_v4().as_bytes());
    key
}

/// Write a fresh key to `path`. An existing key file is never overwritten.
pub fn init_key_file(path: &Path) -> Result<(), TokenError> {
    if path.exists() {
        return Err(TokenError::KeyExists {
            path: path.to_path_buf(),
        });
    }
    fs::write(path, hex::encode(generate_key())).map_err(|err| TokenError::io(path, err))
}
