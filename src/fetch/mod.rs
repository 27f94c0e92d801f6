mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;

use crate::config::FeedAuth;
use auth::{ApiKey, UrlParam};

/// Builds the client stack a source's [`FeedAuth`] calls for.
///
/// # Errors
///
/// Returns an error if the source needs a key and `key` is `None`, or if the
/// header name/value is invalid.
pub fn client_for(auth: &FeedAuth, key: Option<String>) -> Result<Box<dyn HttpClient>> {
    let base = BasicClient::with_timeouts()?;
    let client: Box<dyn HttpClient> = match auth {
        FeedAuth::None => Box::new(base),
        FeedAuth::UrlParam { param_name } => Box::new(UrlParam::new(
            base,
            param_name,
            key.context("URL-parameter auth needs an API key")?,
        )),
        FeedAuth::Header { header_name } => {
            let key = key.context("Header auth needs an API key")?;
            Box::new(ApiKey::new(base, header_name, &key)?)
        }
    };
    Ok(client)
}

/// GETs `url` through `client` and returns the body.
///
/// # Errors
///
/// Returns an error on transport failure or a non-success status.
#[tracing::instrument(skip(client), fields(url = %url))]
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("Invalid URL '{url}'"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one HTTP response and hands back the raw request head.
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}/feed"), handle)
    }

    #[tokio::test]
    async fn test_fetch_bytes_returns_body() {
        let (url, server) = one_shot_server("200 OK", "abc").await;
        let body = fetch_bytes(&BasicClient::new(), &url).await.unwrap();
        assert_eq!(&body[..], b"abc");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_bytes_rejects_error_status() {
        let (url, server) = one_shot_server("503 Service Unavailable", "down").await;
        assert!(fetch_bytes(&BasicClient::new(), &url).await.is_err());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_header_auth_sends_key() {
        let (url, server) = one_shot_server("200 OK", "").await;
        let auth = FeedAuth::Header {
            header_name: "x-api-key".to_string(),
        };
        let client = client_for(&auth, Some("secret".to_string())).unwrap();
        fetch_bytes(&client, &url).await.unwrap();

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("x-api-key: secret"));
    }

    #[tokio::test]
    async fn test_url_param_auth_appends_query() {
        let (url, server) = one_shot_server("200 OK", "").await;
        let auth = FeedAuth::UrlParam {
            param_name: "appid".to_string(),
        };
        let client = client_for(&auth, Some("k1".to_string())).unwrap();
        fetch_bytes(&*client, &format!("{url}?lat=53.3")).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /feed?lat=53.3&appid=k1 "));
    }

    #[test]
    fn test_auth_without_key_is_an_error() {
        let auth = FeedAuth::Header {
            header_name: "x-api-key".to_string(),
        };
        assert!(client_for(&auth, None).is_err());
    }

    #[test]
    fn test_invalid_header_name_is_an_error() {
        assert!(ApiKey::new(BasicClient::new(), "bad header", "k").is_err());
    }
}
