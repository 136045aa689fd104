//! HTTP transport shared by every client call.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::auth::Auth;
use crate::endpoints::Scope;
use crate::error::{ApiError, DatabricksError, DatabricksResult};
use crate::rate_limit::RateLimitInfo;
use crate::vars::{QueryParams, QueryVars};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Error payload returned by Databricks for non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: String,
    #[serde(default)]
    message: String,
}

/// Sends signed JSON requests and decodes their responses.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    auth: Auth,
}

impl HttpTransport {
    #[must_use]
    pub fn new(http_client: reqwest::Client, auth: Auth) -> Self {
        Self { http_client, auth }
    }

    #[must_use]
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Performs a GET request.
    ///
    /// # Errors
    ///
    /// Returns `DatabricksError::Api` for non-2xx responses and transport or
    /// decoding errors otherwise.
    pub async fn get<T: DeserializeOwned>(
        &self,
        scope: &Scope,
        url: Url,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<(T, RateLimitInfo)> {
        self.request(Method::GET, scope, url, None::<&()>, vars).await
    }

    /// Performs a PUT request. `body` of `None` sends an empty body.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        scope: &Scope,
        url: Url,
        body: Option<&B>,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<(T, RateLimitInfo)> {
        self.request(Method::PUT, scope, url, body, vars).await
    }

    /// Performs a POST request.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        scope: &Scope,
        url: Url,
        body: &B,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<(T, RateLimitInfo)> {
        self.request(Method::POST, scope, url, Some(body), vars).await
    }

    /// Performs a DELETE request, ignoring any response body.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn delete(&self, scope: &Scope, url: Url) -> DatabricksResult<RateLimitInfo> {
        let (_, rate_limit): (serde::de::IgnoredAny, _) = self
            .request(Method::DELETE, scope, url, None::<&()>, &[])
            .await?;
        Ok(rate_limit)
    }

    #[instrument(skip_all, fields(method = %method, scope = %scope))]
    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        scope: &Scope,
        url: Url,
        body: Option<&B>,
        vars: &[&dyn QueryVars],
    ) -> DatabricksResult<(T, RateLimitInfo)> {
        let url = prepare_url(&url, &QueryParams::from_vars(vars))?;
        debug!(url = %url, "Sending request");

        let is_write = matches!(method, Method::PUT | Method::POST);
        let mut request = self
            .http_client
            .request(method, url)
            .header(ACCEPT, JSON_CONTENT_TYPE);

        if let Some(b) = body {
            request = request.json(b);
        } else if is_write {
            request = request.header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        }

        let request = self.auth.apply(request, scope).await?;
        let response = request.send().await?;

        let status = response.status();
        let rate_limit = RateLimitInfo::from_response(status, response.headers());
        let bytes = response.bytes().await?;

        debug!(status = status.as_u16(), len = bytes.len(), "Received response");

        if !status.is_success() {
            return Err(DatabricksError::Api(decode_error(
                status.as_u16(),
                &bytes,
                rate_limit,
            )));
        }

        // Databricks labels JSON bodies as text/plain, so the content type is ignored.
        let data = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_slice(b"null")?
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok((data, rate_limit))
    }
}

/// Decodes percent-escapes in `url`, re-parses it and replaces its query.
fn prepare_url(url: &Url, params: &QueryParams) -> DatabricksResult<Url> {
    let decoded = urlencoding::decode(url.as_str())
        .map_err(|e| DatabricksError::Config(format!("invalid URL encoding in {url}: {e}")))?;
    let mut url = Url::parse(&decoded)?;

    if !params.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(params.iter());
    }

    Ok(url)
}

fn decode_error(status: u16, bytes: &[u8], rate_limit: RateLimitInfo) -> ApiError {
    let body = serde_json::from_slice::<ErrorBody>(bytes).unwrap_or_else(|_| ErrorBody {
        detail: String::new(),
        message: String::from_utf8_lossy(bytes).trim().to_string(),
    });

    ApiError {
        status,
        detail: body.detail,
        message: body.message,
        rate_limit,
    }
}
