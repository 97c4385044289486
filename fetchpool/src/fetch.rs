//! This module provides the unit of work run by pool workers: fetching a resource and digesting its content.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use reqwest::Client;

use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCHEME};

#[derive(Debug, Error)]
pub enum Error {
    #[error("error while preparing the request: {0}")]
    Address(#[from] url::ParseError),
    /// Request builder failure left over once the address has been validated as a `Url`.
    #[error("error while preparing the request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("error while making the request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("error while reading the response: {0}")]
    Read(#[source] reqwest::Error),
    #[error("deadline exceeded after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
}

/// A successfully fetched resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchOutcome {
    address: String,
    digest: String,
}

impl FetchOutcome {
    #[inline]
    pub fn new(address: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            digest: digest.into(),
        }
    }

    /// The fully qualified address the resource was fetched from.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The hex-encoded MD5 digest of the response body.
    #[inline]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Fetcher interface.
///
/// The [`Pool`](crate::task::Pool) only relies on this contract, so any implementor can be plugged in place of [`HttpFetcher`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the resource at `address` and digest its content.
    async fn fetch(&self, address: &str) -> Result<FetchOutcome, Error>;
}

/// Compute the hex-encoded MD5 digest of `bytes`.
///
/// ```
/// assert_eq!(fetchpool::fetch::digest(b"sample response"), "d38cbaf4a9b7626cb2c420be3f918c11");
/// ```
#[inline]
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Turn `address` into a fully qualified one, prefixing `default_scheme` when it carries none.
///
/// ```
/// # use fetchpool::fetch::normalize;
/// assert_eq!(normalize("a.example", "http").unwrap(), "http://a.example");
/// assert_eq!(normalize("https://a.example/x", "http").unwrap(), "https://a.example/x");
/// assert!(normalize("", "http").is_err());
/// ```
pub fn normalize(address: &str, default_scheme: &str) -> Result<String, Error> {
    parse(address, default_scheme).map(|(address, _)| address)
}

fn parse(address: &str, default_scheme: &str) -> Result<(String, Url), Error> {
    let address = address.trim();

    let address = if has_scheme(address) {
        address.to_owned()
    } else {
        format!("{default_scheme}://{address}")
    };

    let url = Url::parse(&address)?;

    Ok((address, url))
}

/// Whether `address` starts with a `scheme://` prefix, `://` may still appear later on in a path or a query.
fn has_scheme(address: &str) -> bool {
    address.split_once("://").is_some_and(|(scheme, _)| {
        let mut chars = scheme.chars();

        chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// HTTP fetcher.
///
/// Every fetch is bounded by a per-request timeout and aborted as soon as the cancellation token it was built with is cancelled.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    cancel: CancellationToken,
    request_timeout: Duration,
    default_scheme: String,
}

impl HttpFetcher {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            client: Client::default(),
            cancel,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_scheme: DEFAULT_SCHEME.to_owned(),
        }
    }

    pub fn from_config(config: &Config, cancel: CancellationToken) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            default_scheme: config.default_scheme().to_owned(),
            ..Self::new(cancel)
        }
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client, ..self }
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn get(&self, url: Url) -> Result<String, Error> {
        let request = self.client.get(url).build().map_err(Error::Request)?;

        let mut resp = self.client.execute(request).await.map_err(Error::Transport)?;

        tracing::trace!("Response status {} for `{}`", resp.status(), resp.url());

        // digest chunks as they arrive instead of buffering the whole body
        let mut context = md5::Context::new();
        let mut len = 0;

        while let Some(chunk) = resp.chunk().await.map_err(Error::Read)? {
            len += chunk.len();
            context.consume(&chunk);
        }

        tracing::trace!("Read {len} bytes from `{}`", resp.url());

        Ok(format!("{:x}", context.compute()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, address: &str) -> Result<FetchOutcome, Error> {
        let (address, url) = parse(address, &self.default_scheme)?;

        tracing::debug!("Fetching `{address}`...");

        let digest = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(self.request_timeout, self.get(url)) => {
                res.map_err(|_| Error::Timeout(self.request_timeout))?
            }
        }?;

        Ok(FetchOutcome::new(address, digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(route: &str, template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;

        Mock::given(method("GET")).and(path(route)).respond_with(template).mount(&server).await;

        server
    }

    #[test]
    fn test_digest() {
        assert_eq!(digest(b"sample response"), "d38cbaf4a9b7626cb2c420be3f918c11");
        assert_eq!(digest("sample response from youtube"), "573b3fbccf725497a4112c4842668b05");
        assert_eq!(digest(b"x"), digest(b"x".to_vec()));
        assert_ne!(digest(b"x"), digest(b"y"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("www.google.com", "http").unwrap(), "http://www.google.com");
        assert_eq!(normalize(" www.reddit.com/r/funny ", "http").unwrap(), "http://www.reddit.com/r/funny");
        assert_eq!(normalize("a.example", "https").unwrap(), "https://a.example");
        assert_eq!(normalize("ftp://a.example", "http").unwrap(), "ftp://a.example");
        assert_eq!(
            normalize("a.example/login?next=http://b.example", "http").unwrap(),
            "http://a.example/login?next=http://b.example"
        );
        assert_eq!(normalize("a.example:8080/r#https://b.example", "https").unwrap(), "https://a.example:8080/r#https://b.example");
        assert_eq!(normalize("svn+ssh://a.example/repo", "http").unwrap(), "svn+ssh://a.example/repo");
        assert!(matches!(normalize("", "http"), Err(Error::Address(_))));
        assert!(matches!(normalize("exa mple.com", "http"), Err(Error::Address(_))));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_fetch_without_scheme() {
        let server = serve("/page", ResponseTemplate::new(200).set_body_string("sample response")).await;
        let address = format!("{}/page", server.address());

        let fetcher = HttpFetcher::new(CancellationToken::new());
        let outcome = fetcher.fetch(&address).await.unwrap();

        assert_eq!(outcome.address(), format!("http://{address}"));
        assert_eq!(outcome.digest(), "d38cbaf4a9b7626cb2c420be3f918c11");
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let body = vec![0u8, 1, 2, 3, 255];
        let server = serve("/bin", ResponseTemplate::new(200).set_body_bytes(body.clone())).await;
        let address = format!("{}/bin", server.uri());

        let fetcher = HttpFetcher::new(CancellationToken::new());
        let first = fetcher.fetch(&address).await.unwrap();
        let second = fetcher.fetch(&address).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.address(), address);
        assert_eq!(first.digest(), digest(&body));
    }

    #[tokio::test]
    async fn test_fetch_digests_any_status() {
        let server = serve("/missing", ResponseTemplate::new(404).set_body_string("not found")).await;

        let fetcher = HttpFetcher::new(CancellationToken::new());
        let outcome = fetcher.fetch(&format!("{}/missing", server.uri())).await.unwrap();

        assert_eq!(outcome.digest(), digest("not found"));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let template = ResponseTemplate::new(200).set_body_string("late").set_delay(Duration::from_secs(2));
        let server = serve("/slow", template).await;

        let config = Config::default().with_request_timeout(Duration::from_millis(50));
        let fetcher = HttpFetcher::from_config(&config, CancellationToken::new());
        let err = fetcher.fetch(&format!("{}/slow", server.uri())).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(timeout) if timeout == Duration::from_millis(50)));
        assert!(err.to_string().contains("deadline exceeded"));
    }

    #[tokio::test]
    async fn test_fetch_cancelled() {
        let template = ResponseTemplate::new(200).set_delay(Duration::from_secs(2));
        let server = serve("/slow", template).await;

        let cancel = CancellationToken::new();
        let fetcher = HttpFetcher::new(cancel.clone());

        let address = format!("{}/slow", server.uri());
        let (res, _) = tokio::join!(fetcher.fetch(&address), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_fetch_transport_error() {
        // grab a free port then release it so nothing listens there
        let address = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let fetcher = HttpFetcher::new(CancellationToken::new());
        let err = fetcher.fetch(&address.to_string()).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_fetch_truncated_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        // announce more bytes than sent, then hang up
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();

            socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort").await.unwrap();
            socket.shutdown().await.unwrap();
        });

        let fetcher = HttpFetcher::new(CancellationToken::new());
        let err = fetcher.fetch(&address.to_string()).await.unwrap_err();

        assert!(matches!(err, Error::Read(_)), "unexpected error: {err}");
        assert!(err.to_string().starts_with("error while reading the response"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_with_client() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/agent"))
            .and(header("user-agent", "fetchpool-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("sample response"))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::builder().user_agent("fetchpool-test").build().unwrap();
        let fetcher = HttpFetcher::new(CancellationToken::new()).with_client(client);
        let outcome = fetcher.fetch(&format!("{}/agent", server.uri())).await.unwrap();

        assert_eq!(outcome.digest(), "d38cbaf4a9b7626cb2c420be3f918c11");
    }

    #[tokio::test]
    async fn test_fetch_invalid_address() {
        let fetcher = HttpFetcher::new(CancellationToken::new());

        assert!(matches!(fetcher.fetch("").await, Err(Error::Address(_))));
    }
}
