use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use bytes::Bytes;
use url::Url;

use crate::{remote_jwk_set::RemoteJwkSet, KeySetError};

/// Where a decoder loads its key material from.
///
/// Parsed from a string by scheme prefix: `http://` and `https://` denote a remote endpoint, anything else a local
/// file path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyLocation {
    File(PathBuf),
    Remote(Url),
}

impl KeyLocation {
    pub fn is_remote(&self) -> bool {
        matches!(self, KeyLocation::Remote(_))
    }
}

impl FromStr for KeyLocation {
    type Err = KeySetError;

    fn from_str(location: &str) -> Result<Self, Self::Err> {
        let lowercase = location.to_ascii_lowercase();
        if lowercase.starts_with("http://") || lowercase.starts_with("https://") {
            let url = Url::parse(location).map_err(|reason| KeySetError::InvalidSource {
                location: location.to_string(),
                reason,
            })?;
            Ok(KeyLocation::Remote(url))
        } else {
            Ok(KeyLocation::File(PathBuf::from(location)))
        }
    }
}

impl From<PathBuf> for KeyLocation {
    fn from(path: PathBuf) -> Self {
        KeyLocation::File(path)
    }
}

impl From<&Path> for KeyLocation {
    fn from(path: &Path) -> Self {
        KeyLocation::File(path.to_path_buf())
    }
}

impl From<Url> for KeyLocation {
    fn from(url: Url) -> Self {
        KeyLocation::Remote(url)
    }
}

impl fmt::Display for KeyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyLocation::File(path) => write!(f, "{}", path.display()),
            KeyLocation::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Fetches raw key material from a local file or a remote endpoint.
pub(crate) enum KeySource {
    File(PathBuf),
    Remote(RemoteJwkSet),
}

impl KeySource {
    /// Re-reads the file, or re-fetches the remote document, on every call.
    pub(crate) async fn fetch(&self) -> Result<Bytes, KeySetError> {
        match self {
            KeySource::File(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|error| KeySetError::Io {
                    path: path.clone(),
                    error: Arc::new(error),
                }),
            KeySource::Remote(remote_jwk_set) => remote_jwk_set.fetch().await,
        }
    }

    pub(crate) fn is_remote(&self) -> bool {
        matches!(self, KeySource::Remote(_))
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::File(path) => write!(f, "{}", path.display()),
            KeySource::Remote(remote_jwk_set) => write!(f, "{}", remote_jwk_set.url()),
        }
    }
}
