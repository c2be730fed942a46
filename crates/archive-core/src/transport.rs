//! Blocking HTTP transport for listings, sidecars and artifact bodies

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::DownloadSettings;
use crate::download::{ArtifactFetcher, FetchedBody};
use crate::error::DownloadFailure;
use crate::resolver::ListingClient;
use crate::{Error, Result};

const USER_AGENT: &str = concat!("zim-archiver/", env!("CARGO_PKG_VERSION"));

/// Failure of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),
}

impl From<TransportError> for DownloadFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(message) => Self::Timeout(message),
            TransportError::Status(code) => Self::Status(code),
            TransportError::Network(message) => Self::Network(message),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Whether a failed body read hit a request deadline.
///
/// The blocking reader reports timeouts as [`io::ErrorKind::Other`] wrapping
/// the `reqwest::Error`, so the whole cause chain is inspected.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::TimedOut {
        return true;
    }
    let mut cause: Option<&(dyn StdError + 'static)> =
        err.get_ref().map(|e| e as &(dyn StdError + 'static));
    while let Some(e) = cause {
        if let Some(http) = e.downcast_ref::<reqwest::Error>()
            && http.is_timeout()
        {
            return true;
        }
        if let Some(inner) = e.downcast_ref::<io::Error>()
            && inner.kind() == io::ErrorKind::TimedOut
        {
            return true;
        }
        cause = e.source();
    }
    false
}

/// HTTP client pair: a short-timeout one for listings and a long-timeout
/// one for artifact bodies that can run to tens of gigabytes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    listing: Client,
    download: Client,
}

impl HttpTransport {
    /// Build clients from the shared download settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TLS backend cannot be initialised.
    pub fn new(settings: &DownloadSettings) -> Result<Self> {
        let listing = build_client(settings.connect_timeout(), settings.listing_timeout())?;
        let download = build_client(settings.connect_timeout(), settings.download_timeout())?;
        Ok(Self { listing, download })
    }
}

fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

impl ListingClient for HttpTransport {
    fn get_text(&self, url: &str) -> std::result::Result<String, TransportError> {
        tracing::debug!(url, "fetching listing");
        let response = self.listing.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }
}

impl ArtifactFetcher for HttpTransport {
    fn fetch(&self, url: &str) -> std::result::Result<FetchedBody, TransportError> {
        tracing::debug!(url, "requesting artifact");
        let response = self.download.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(FetchedBody {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_onto_download_failures() {
        assert_eq!(
            DownloadFailure::from(TransportError::Status(503)),
            DownloadFailure::Status(503)
        );
        assert!(DownloadFailure::from(TransportError::Timeout("connect".into())).is_transient());
        assert!(!DownloadFailure::from(TransportError::Status(404)).is_transient());
    }

    #[test]
    fn wrapped_timeouts_are_recognised() {
        let direct = io::Error::new(io::ErrorKind::TimedOut, "deadline");
        let wrapped = io::Error::other(io::Error::new(io::ErrorKind::TimedOut, "body read"));
        let reset = io::Error::other(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        assert!(is_timeout(&direct));
        assert!(is_timeout(&wrapped));
        assert!(!is_timeout(&reset));
        assert!(!is_timeout(&io::Error::other("plain")));
    }

    #[test]
    fn clients_build_from_default_settings() {
        HttpTransport::new(&DownloadSettings::default()).unwrap();
    }
}
