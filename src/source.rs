use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::error::FetchError;

/// Boxed future returned by [`ModuleSource::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>, FetchError>> + Send + 'a>>;

/// Where the module binary comes from.
///
/// The host calls `fetch` once per acquisition attempt and applies its own
/// timeout around it.
pub trait ModuleSource: Send + Sync {
    /// Human-readable address, used in logs and error messages.
    fn address(&self) -> &str;

    /// Fetch the complete module binary.
    fn fetch(&self) -> FetchFuture<'_>;
}

impl<S: ModuleSource + ?Sized> ModuleSource for Box<S> {
    fn address(&self) -> &str {
        (**self).address()
    }

    fn fetch(&self) -> FetchFuture<'_> {
        (**self).fetch()
    }
}

/// Pick a source for `address` by its scheme.
///
/// `http://` and `https://` go over the network, `file://` and anything
/// without a scheme are read from the local filesystem.
pub fn source_for_address(address: &str) -> Box<dyn ModuleSource> {
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Box::new(HttpSource::new(address))
    } else if let Some(path) = address.strip_prefix("file://") {
        Box::new(FileSource::new(path))
    } else if lower.contains("://") {
        Box::new(UnsupportedSource(address.to_string()))
    } else {
        Box::new(FileSource::new(address))
    }
}

/// Single HTTP GET against a fixed address.
pub struct HttpSource {
    client: reqwest::Client,
    address: String,
}

impl HttpSource {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), address)
    }

    pub fn with_client(client: reqwest::Client, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }
}

impl ModuleSource for HttpSource {
    fn address(&self) -> &str {
        &self.address
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let response = self.client.get(&self.address).send().await.map_err(|e| {
                if e.is_builder() {
                    FetchError::InvalidAddress(self.address.clone())
                } else {
                    FetchError::Network {
                        address: self.address.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchError::NotFound(self.address.clone()));
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    address: self.address.clone(),
                    status: status.as_u16(),
                });
            }

            let body = response.bytes().await.map_err(|e| FetchError::Network {
                address: self.address.clone(),
                message: e.to_string(),
            })?;
            if body.is_empty() {
                return Err(FetchError::Empty(self.address.clone()));
            }
            Ok(body.to_vec())
        })
    }
}

/// Module binary on the local filesystem.
pub struct FileSource {
    path: PathBuf,
    address: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let address = path.display().to_string();
        Self { path, address }
    }
}

impl ModuleSource for FileSource {
    fn address(&self) -> &str {
        &self.address
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    FetchError::NotFound(self.address.clone())
                } else {
                    FetchError::Io {
                        path: self.address.clone(),
                        source: e,
                    }
                }
            })?;
            if bytes.is_empty() {
                return Err(FetchError::Empty(self.address.clone()));
            }
            Ok(bytes)
        })
    }
}

/// Module binary already held in memory.
#[derive(Clone)]
pub struct BytesSource {
    bytes: Vec<u8>,
    address: String,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            address: "<memory>".to_string(),
        }
    }

    /// Attach a label shown in logs in place of `<memory>`.
    pub fn labelled(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

impl ModuleSource for BytesSource {
    fn address(&self) -> &str {
        &self.address
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            if self.bytes.is_empty() {
                return Err(FetchError::Empty(self.address.clone()));
            }
            Ok(self.bytes.clone())
        })
    }
}

struct UnsupportedSource(String);

impl ModuleSource for UnsupportedSource {
    fn address(&self) -> &str {
        &self.0
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(async move { Err(FetchError::InvalidAddress(self.0.clone())) })
    }
}
