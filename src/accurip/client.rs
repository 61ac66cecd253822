use crate::accurip::error::{AccurateRipError, AccurateRipResult};
use crate::accurip::response::{AccurateRipResponse, parse_responses};
use crate::util::cache_dir;
use crate::util::http::{CLIENT, USER_AGENT};
use bytes::Bytes;
use log::{debug, error, warn};
use reqwest::{Client, Method, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::limit::RateLimit;
use tower::{Service, ServiceBuilder, ServiceExt};

pub const ACCURATERIP_URL: &str = "http://www.accuraterip.com/accuraterip/";
const ACCURATERIP_URL_ENV: &str = "CDRIP_ACCURATERIP_URL";

/// Fetches disc entries from the AccurateRip database, keeping a copy of
/// every entry under the cache directory.
pub struct AccurateRipClient {
    client: Client,
    service: RateLimit<Client>,
    headers: reqwest::header::HeaderMap,
    base_url: String,
    cache_dir: PathBuf,
}

impl AccurateRipClient {
    pub fn new() -> AccurateRipResult<Self> {
        let base_url =
            std::env::var(ACCURATERIP_URL_ENV).unwrap_or_else(|_| ACCURATERIP_URL.to_string());
        Self::with_client(CLIENT.clone(), base_url, cache_dir().join("accurip"))
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        cache_dir: impl AsRef<Path>,
    ) -> AccurateRipResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(USER_AGENT),
        );

        let service = ServiceBuilder::new()
            .rate_limit(2, Duration::from_secs(1))
            .service(client.clone());

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            client,
            service,
            headers,
            base_url,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        })
    }

    /// All responses for a disc, `path` as built by
    /// [`Table::accuraterip_path`](crate::image::table::Table::accuraterip_path).
    pub async fn get_db_entry(&mut self, path: &str) -> AccurateRipResult<Vec<AccurateRipResponse>> {
        let cached_path = self.cache_dir.join(path);

        let raw_entry = match tokio::fs::read(&cached_path).await {
            Ok(data) => {
                debug!("Found AccurateRip entry at {}", cached_path.display());
                Bytes::from(data)
            }
            Err(_) => {
                let data = self.download_entry(path).await?;
                if !data.is_empty() {
                    self.save_entry(&data, &cached_path).await;
                }
                data
            }
        };

        if raw_entry.is_empty() {
            warn!("Entry {path} not found in AccurateRip database");
            return Err(AccurateRipError::EntryNotFound(path.to_string()));
        }

        parse_responses(&raw_entry)
    }

    async fn download_entry(&mut self, path: &str) -> AccurateRipResult<Bytes> {
        let url = format!("{}{path}", self.base_url);
        debug!("Downloading AccurateRip entry from {url}");

        let req = self
            .client
            .request(Method::GET, url)
            .headers(self.headers.clone())
            .build()?;

        let res = self.service.ready().await?.call(req).await?;

        match res.status() {
            StatusCode::NOT_FOUND => {
                warn!("Entry {path} not found in AccurateRip database");
                Err(AccurateRipError::EntryNotFound(path.to_string()))
            }
            status if !status.is_success() => Err(AccurateRipError::NoSuccessStatusCode(status)),
            _ => Ok(res.bytes().await?),
        }
    }

    async fn save_entry(&self, raw_entry: &[u8], path: &Path) {
        debug!("Saving AccurateRip entry to {}", path.display());

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, raw_entry).await
        }
        .await;

        if let Err(e) = result {
            error!("Could not save AccurateRip entry to {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accurip::response::tests::{encode, two_pressings};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PATH: &str = "c/1/2/dBAR-002-0000f21c-00027ef8-05021002.bin";

    /// Serves `body` with `status` to every request.
    async fn serve(status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{address}/accuraterip")
    }

    fn client(base_url: &str, cache: &Path) -> AccurateRipClient {
        let client = Client::builder().no_proxy().build().unwrap();
        AccurateRipClient::with_client(client, base_url, cache).unwrap()
    }

    #[tokio::test]
    async fn uses_cached_entry_without_network() {
        let cache = tempfile::tempdir().unwrap();
        let other = "4/8/2/dBAR-011-0010e284-009228a3-9809ff0b.bin";
        let cached = cache.path().join(other);
        tokio::fs::create_dir_all(cached.parent().unwrap()).await.unwrap();
        tokio::fs::write(&cached, encode(&two_pressings())).await.unwrap();

        let mut client = client("http://127.0.0.1:9/", cache.path());
        assert_eq!(client.get_db_entry(other).await.unwrap(), two_pressings());
    }

    #[tokio::test]
    async fn downloads_and_saves_entry() {
        let cache = tempfile::tempdir().unwrap();
        let url = serve("200 OK", encode(&two_pressings())).await;

        let mut client = client(&url, cache.path());
        assert_eq!(client.get_db_entry(PATH).await.unwrap(), two_pressings());
        assert!(cache.path().join(PATH).exists());
    }

    #[tokio::test]
    async fn missing_entry_is_entry_not_found() {
        let cache = tempfile::tempdir().unwrap();
        let url = serve("404 Not Found", Vec::new()).await;

        let mut client = client(&url, cache.path());
        assert!(matches!(
            client.get_db_entry(PATH).await,
            Err(AccurateRipError::EntryNotFound(_))
        ));
        assert!(!cache.path().join(PATH).exists());
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let cache = tempfile::tempdir().unwrap();
        let url = serve("500 Internal Server Error", Vec::new()).await;

        let mut client = client(&url, cache.path());
        assert!(matches!(
            client.get_db_entry(PATH).await,
            Err(AccurateRipError::NoSuccessStatusCode(StatusCode::INTERNAL_SERVER_ERROR))
        ));
    }
}
