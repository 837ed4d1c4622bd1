use thiserror::Error;

/// Errors reported by a tile store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Reading from or writing to the backing medium failed
    #[error("Store I/O error: {0}")]
    Io(String),

    /// A persisted record could not be parsed
    #[error("Corrupt record at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    /// An upsert mutator returned a document without an image
    #[error("Refusing to store entry '{key}' without an encoded image")]
    MissingImage { key: String },

    /// The record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors that can occur while fetching a tile from the network.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The tile key is not a fetchable URL
    #[error("Invalid tile URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Errors raised while turning a tile into a storable payload and back.
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// The fetched bytes are not a decodable image
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Re-encoding into the cache format failed
    #[error("Failed to encode image as {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    /// A stored payload is not a data URL this encoder understands
    #[error("Malformed data URL: {0}")]
    MalformedDataUrl(String),

    /// The requested MIME type has no encoder
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Top-level error for cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The network fetch failed and there was nothing cached to fall back to
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Persisting or reading a tile failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The tile could not be encoded for storage
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A detached save task did not run to completion
    #[error("Save task aborted: {0}")]
    SaveAborted(String),
}
