use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, ETAG, IF_NONE_MATCH},
    StatusCode, Url,
};

use crate::{Error, Result};

/// Answer to a conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    /// Definitions have not changed since the given freshness token.
    NotChanged,
    /// New definitions document and its freshness token.
    Changed {
        payload: String,
        etag: Option<String>,
    },
    /// The server answered with a status that carries no definitions.
    Unavailable { status: u16 },
}

/// Source of feature definitions.
///
/// `Err` is reserved for transport failures: no answer was received at all.
pub trait Fetcher: Send {
    fn fetch(&mut self, etag: Option<&str>) -> Result<FetchResponse>;
}

impl<T: FnMut(Option<&str>) -> Result<FetchResponse> + Send> Fetcher for T {
    fn fetch(&mut self, etag: Option<&str>) -> Result<FetchResponse> {
        self(etag)
    }
}

const FEATURES_ENDPOINT: &str = "/client/features";

/// Settings for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub api_url: String,
    pub app_name: String,
    pub instance_id: String,
    pub api_key: Option<String>,
    pub project_name: Option<String>,
    pub name_prefix: Option<String>,
    pub custom_headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Fetches `<api_url>/client/features` with `reqwest`, using `If-None-Match` to avoid
/// downloading unchanged definitions.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    url: Url,
}

impl HttpFetcher {
    pub fn new(config: &HttpFetcherConfig) -> Result<HttpFetcher> {
        let mut url = Url::parse(&format!(
            "{}{}",
            config.api_url.trim_end_matches('/'),
            FEATURES_ENDPOINT
        ))
        .map_err(Error::InvalidApiUrl)?;

        let query: Vec<(&str, &str)> = [
            ("project", config.project_name.as_deref()),
            ("namePrefix", config.name_prefix.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key, value?)))
        .collect();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            "unleash-appname",
            header_value("unleash-appname", &config.app_name)?,
        );
        headers.insert(
            "unleash-instanceid",
            header_value("unleash-instanceid", &config.instance_id)?,
        );
        headers.insert(
            "unleash-sdk",
            HeaderValue::from_static(concat!("flagkit:", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(api_key) = &config.api_key {
            let mut value = header_value(AUTHORIZATION.as_str(), api_key)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::InvalidHeader(name.clone()))?;
            let value = header_value(name.as_str(), value)?;
            headers.insert(name, value);
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent(config.app_name.clone())
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;

        Ok(HttpFetcher { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Errors name the header only; values may be credentials.
fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(name.to_owned()))
}

impl Fetcher for HttpFetcher {
    fn fetch(&mut self, etag: Option<&str>) -> Result<FetchResponse> {
        let mut request = self.client.get(self.url.clone());
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        log::debug!(target: "flagkit", url = self.url.as_str(); "fetching feature definitions");
        let response = request.send()?;

        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(FetchResponse::NotChanged),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let payload = response.text()?;
                Ok(FetchResponse::Changed { payload, etag })
            }
            status => Ok(FetchResponse::Unavailable {
                status: status.as_u16(),
            }),
        }
    }
}
