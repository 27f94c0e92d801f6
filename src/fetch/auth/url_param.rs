use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::Url;

/// An [`HttpClient`] wrapper that carries an API key in the query string.
///
/// Used for OpenWeatherMap (`appid`). A value for the same parameter already
/// present in the configured URL is replaced, never duplicated.
pub struct UrlParam<C> {
    inner: C,
    param_name: String,
    key: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, param_name: &str, key: String) -> Self {
        Self {
            inner,
            param_name: param_name.to_string(),
            key,
        }
    }

    fn apply(&self, url: &mut Url) {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != self.param_name.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(&self.param_name, &self.key);
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.apply(req.url_mut());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_appends_key_after_existing_query() {
        let auth = UrlParam::new(BasicClient::new(), "appid", "k1".to_string());
        let mut url: Url = "https://api.example.org/weather?lat=53.3&lon=-6.26".parse().unwrap();
        auth.apply(&mut url);
        assert_eq!(url.query(), Some("lat=53.3&lon=-6.26&appid=k1"));
    }

    #[test]
    fn test_replaces_configured_key() {
        let auth = UrlParam::new(BasicClient::new(), "appid", "k2".to_string());
        let mut url: Url = "https://api.example.org/weather?appid=old&units=metric".parse().unwrap();
        auth.apply(&mut url);
        assert_eq!(url.query(), Some("units=metric&appid=k2"));
    }
}
