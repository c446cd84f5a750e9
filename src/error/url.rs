use thiserror::Error;

/// Indicates the specific type/cause of URL error.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum UrlError {
    /// `wss://` was used; TLS belongs to the transport the caller
    /// supplies, not to this crate.
    #[error("tls support not compiled in")]
    TlsFeatureNotEnabled,
    /// The URL does not include a host name.
    #[error("no host name in the url")]
    NoHostName,
    /// Failed to connect with this URL.
    #[error("unable to connect to {0}")]
    UnableToConnect(String),
    /// Unsupported URL scheme (only `ws://` may be used).
    #[error("url scheme not supported")]
    UnsupportedUrlScheme,
    /// The URL host name, though included, is empty.
    #[error("url contains empty host name")]
    EmptyHostName,
}
