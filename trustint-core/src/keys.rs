//! HMAC key resolution.
//!
//! Precedence: `TRUSTINT_HMAC_KEY` (env), then the key file
//! (`TRUSTINT_HMAC_KEY_FILE` env override, else `vault/.hmac_key`), then a
//! freshly generated 32-byte key written back to the file. Key material in
//! text form may be base64url or hex; files may also hold the raw bytes.
//!
//! The status string is part of the observable contract: it names the source
//! and encoding so operators can audit which key a verification ran against.

use anyhow::Context;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::RngCore;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding key material directly.
pub const ENV_KEY: &str = "TRUSTINT_HMAC_KEY";
/// Environment variable overriding the key file path.
pub const ENV_KEY_FILE: &str = "TRUSTINT_HMAC_KEY_FILE";

/// Minimum accepted key length in bytes.
const MIN_KEY_LEN: usize = 16;
/// Recommended key length in bytes.
const RECOMMENDED_KEY_LEN: usize = 32;

/// Errors raised while resolving key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key material decoded to fewer than 16 bytes.
    #[error("FAIL: key from {key_source} is {len} bytes; too short (minimum 16)")]
    TooShort {
        /// Where the key came from.
        key_source: String,
        /// Decoded length.
        len: usize,
    },
    /// Key material could not be decoded as hex or base64url.
    #[error("FAIL: Invalid format for key from {0}")]
    InvalidFormat(String),
    /// Filesystem failure while reading or writing the key file.
    #[error("key io error: {0}")]
    Io(#[from] anyhow::Error),
}

/// Resolved key material plus its provenance status line.
#[derive(Debug, Clone)]
pub struct LoadedKey {
    /// Raw key bytes.
    pub bytes: Vec<u8>,
    /// `PASS`/`WARN` status naming source and encoding.
    pub status: String,
}

impl LoadedKey {
    /// Whether the key loaded with a length warning.
    pub fn is_warning(&self) -> bool {
        self.status.starts_with("WARN")
    }
}

/// Resolver for HMAC key material.
#[derive(Debug, Clone)]
pub struct KeyLoader {
    key_path: PathBuf,
    consult_env: bool,
}

impl KeyLoader {
    /// Loader honoring the environment, with `default_path` as the fallback
    /// key file (`TRUSTINT_HMAC_KEY_FILE` overrides it).
    pub fn from_env(default_path: impl Into<PathBuf>) -> Self {
        let key_path = env::var(ENV_KEY_FILE)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_path.into());
        Self {
            key_path,
            consult_env: true,
        }
    }

    /// Loader bound to one file, ignoring the environment. Test seam.
    pub fn file_only(path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: path.into(),
            consult_env: false,
        }
    }

    /// The key file this loader reads and writes.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Resolve the key per the documented precedence.
    pub fn load(&self) -> Result<LoadedKey, KeyError> {
        if self.consult_env {
            if let Some(value) = env::var(ENV_KEY).ok().filter(|v| !v.is_empty()) {
                let (bytes, encoding) = decode_env_key(&value)?;
                return check_length(bytes, format!("{ENV_KEY} (env, {encoding})"));
            }
        }

        if self.key_path.exists() {
            return self.load_from_file();
        }

        self.generate()
    }

    fn load_from_file(&self) -> Result<LoadedKey, KeyError> {
        let path = &self.key_path;
        let raw = fs::read(path)
            .with_context(|| format!("failed to read key file {}", path.display()))?;
        let source_of = |encoding: &str| format!("{} ({encoding})", path.display());

        match String::from_utf8(raw.clone()) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() && is_base64url_text(text) {
                    let bytes = decode_base64url(text)
                        .ok_or_else(|| KeyError::InvalidFormat(source_of("base64url")))?;
                    check_length(bytes, source_of("base64url"))
                } else if !text.is_empty() && is_hex_text(text) {
                    let bytes = hex::decode(text)
                        .map_err(|_| KeyError::InvalidFormat(source_of("hex")))?;
                    check_length(bytes, source_of("hex"))
                } else {
                    Err(KeyError::InvalidFormat(path.display().to_string()))
                }
            }
            // Not UTF-8: the file content is the key.
            Err(_) => check_length(raw, source_of("binary")),
        }
    }

    /// Generate a fresh 32-byte key and write it base64url (no padding) to
    /// the key file, replacing any existing content.
    pub fn generate(&self) -> Result<LoadedKey, KeyError> {
        let path = &self.key_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create key directory {}", parent.display()))?;
        }
        let mut bytes = vec![0u8; RECOMMENDED_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let encoded = URL_SAFE_NO_PAD.encode(&bytes);
        fs::write(path, &encoded)
            .with_context(|| format!("failed to write key file {}", path.display()))?;
        restrict_permissions(path)?;
        tracing::info!(path = %path.display(), "generated new HMAC key");
        Ok(LoadedKey {
            bytes,
            status: format!(
                "PASS: new {RECOMMENDED_KEY_LEN}-byte HMAC key generated at {}",
                path.display()
            ),
        })
    }
}

/// Decode the `TRUSTINT_HMAC_KEY` value: exactly 64 hex chars means hex,
/// anything else is treated as base64url (padding repaired).
fn decode_env_key(value: &str) -> Result<(Vec<u8>, &'static str), KeyError> {
    if value.len() == 64 && is_hex_text(value) {
        let bytes =
            hex::decode(value).map_err(|_| KeyError::InvalidFormat(format!("{ENV_KEY} (env)")))?;
        return Ok((bytes, "hex"));
    }
    decode_base64url(value)
        .map(|bytes| (bytes, "base64url"))
        .ok_or_else(|| KeyError::InvalidFormat(format!("{ENV_KEY} (env)")))
}

fn check_length(bytes: Vec<u8>, source: String) -> Result<LoadedKey, KeyError> {
    match bytes.len() {
        len if len < MIN_KEY_LEN => Err(KeyError::TooShort {
            key_source: source,
            len,
        }),
        RECOMMENDED_KEY_LEN => Ok(LoadedKey {
            status: format!("PASS: loaded key from {source}"),
            bytes,
        }),
        len => Ok(LoadedKey {
            status: format!(
                "WARN: loaded key from {source}; {len} bytes, not the recommended {RECOMMENDED_KEY_LEN}"
            ),
            bytes,
        }),
    }
}

fn is_base64url_text(text: &str) -> bool {
    text.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn is_hex_text(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_base64url(text: &str) -> Option<Vec<u8>> {
    let mut padded = text.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    URL_SAFE.decode(padded.as_bytes()).ok()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 32 bytes of 0x00, base64url, no padding.
    const KEY_B64: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    fn key_bytes() -> Vec<u8> {
        vec![0u8; 32]
    }

    #[test]
    fn env_value_as_hex() {
        let hex_key = "ab".repeat(32);
        let (bytes, encoding) = decode_env_key(&hex_key).unwrap();
        assert_eq!(encoding, "hex");
        assert_eq!(bytes, vec![0xabu8; 32]);
    }

    #[test]
    fn env_value_as_base64url() {
        let (bytes, encoding) = decode_env_key(KEY_B64).unwrap();
        assert_eq!(encoding, "base64url");
        assert_eq!(bytes, key_bytes());
    }

    #[test]
    fn env_value_with_bad_padding_is_invalid() {
        let err = decode_env_key("not valid b64!").unwrap_err();
        assert!(matches!(err, KeyError::InvalidFormat(_)));
    }

    #[test]
    fn file_binary_key_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        let mut raw = vec![0xffu8; 32];
        raw[0] = 0xfe; // invalid UTF-8 lead sequence stays invalid
        fs::write(&path, &raw).unwrap();
        let key = KeyLoader::file_only(&path).load().unwrap();
        assert_eq!(key.bytes, raw);
        assert!(key.status.contains("binary"));
        assert!(key.status.starts_with("PASS"));
    }

    #[test]
    fn file_base64url_text_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        fs::write(&path, KEY_B64).unwrap();
        let key = KeyLoader::file_only(&path).load().unwrap();
        assert_eq!(key.bytes, key_bytes());
        assert!(key.status.contains("base64url"));
    }

    #[test]
    fn trailing_newline_in_key_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        fs::write(&path, format!("{KEY_B64}\n")).unwrap();
        let key = KeyLoader::file_only(&path).load().unwrap();
        assert_eq!(key.bytes, key_bytes());
    }

    #[test]
    fn missing_file_generates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault").join(".hmac_key");
        let loader = KeyLoader::file_only(&path);
        let first = loader.load().unwrap();
        assert_eq!(first.bytes.len(), 32);
        assert!(first.status.contains("generated"));
        // Written form must be unpadded base64url that decodes to the key.
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains('='));
        assert_eq!(decode_base64url(&written).unwrap(), first.bytes);
        // Second load reads the file back instead of regenerating.
        let second = loader.load().unwrap();
        assert_eq!(second.bytes, first.bytes);
        assert!(second.status.contains("base64url"));
    }

    #[test]
    fn fifteen_byte_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        fs::write(&path, URL_SAFE_NO_PAD.encode(vec![7u8; 15])).unwrap();
        let err = KeyLoader::file_only(&path).load().unwrap_err();
        assert!(matches!(err, KeyError::TooShort { len: 15, .. }));
    }

    #[test]
    fn twenty_four_byte_key_warns_but_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        fs::write(&path, URL_SAFE_NO_PAD.encode(vec![7u8; 24])).unwrap();
        let key = KeyLoader::file_only(&path).load().unwrap();
        assert_eq!(key.bytes.len(), 24);
        assert!(key.is_warning());
        assert!(key.status.contains("not the recommended 32"));
    }

    #[test]
    fn garbage_text_file_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".hmac_key");
        fs::write(&path, "not a key at all!").unwrap();
        let err = KeyLoader::file_only(&path).load().unwrap_err();
        assert!(matches!(err, KeyError::InvalidFormat(_)));
    }
}
