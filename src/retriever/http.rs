use std::time::Duration;

use log::debug;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use super::{RetrieveError, SourceId};

/// Longest upstream body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Parse a configured base URL, making sure relative joins append to it.
pub(crate) fn base_url(raw: &str) -> Result<Url, RetrieveError> {
    let mut url =
        Url::parse(raw).map_err(|e| RetrieveError::Config(format!("invalid URL {raw}: {e}")))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

/// Parse a configured endpoint URL as is.
pub(crate) fn endpoint_url(raw: &str) -> Result<Url, RetrieveError> {
    Url::parse(raw).map_err(|e| RetrieveError::Config(format!("invalid URL {raw}: {e}")))
}

#[derive(Serialize)]
struct GraphQlRequest<'a, V: Serialize> {
    query: &'a str,
    variables: V,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// JSON / GraphQL client shared by all retrievers of one source.
///
/// Every request carries the per-request timeout the client was built with,
/// so a hung upstream surfaces as an ordinary transport error.
#[derive(Clone)]
pub(crate) struct HttpClient {
    client: Client,
    source: SourceId,
}

impl HttpClient {
    pub fn new(source: SourceId, timeout: Duration) -> Result<Self, RetrieveError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("daopulse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, source })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RetrieveError> {
        debug!("[{}] GET {}", self.source, redact(&url));
        self.send(self.client.get(url)).await
    }

    /// POST a GraphQL query and return its `data` member.
    ///
    /// A non-empty `errors` array or a missing `data` member is a schema
    /// failure even when the HTTP status is 200.
    pub async fn post_graphql<T, V>(
        &self,
        url: &Url,
        authorization: Option<&str>,
        query: &str,
        variables: V,
    ) -> Result<T, RetrieveError>
    where
        T: DeserializeOwned,
        V: Serialize,
    {
        let body = GraphQlRequest { query, variables };
        debug!(
            "[{}] POST {} variables={}",
            self.source,
            url,
            serde_json::to_string(&body.variables).unwrap_or_default()
        );

        let mut request = self.client.post(url.clone()).json(&body);
        if let Some(token) = authorization {
            request = request.header(header::AUTHORIZATION, token);
        }

        let response: GraphQlResponse<T> = self.send(request).await?;

        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(RetrieveError::Schema(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }

        response
            .data
            .ok_or_else(|| RetrieveError::Schema("GraphQL response without data".to_string()))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RetrieveError> {
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        debug!(
            "[{}] response status={} bytes={}",
            self.source,
            status.as_u16(),
            bytes.len()
        );

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RetrieveError::Authentication {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(RetrieveError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| RetrieveError::Schema(e.to_string()))
    }
}

/// Strip credentials carried in query parameters before logging a URL.
fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();

    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }

    redacted.to_string()
}
