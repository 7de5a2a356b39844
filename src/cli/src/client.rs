//! HTTP client for the Agora API server.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Success envelope returned by the server.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API error ({status}): {message}")]
    Status {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("API returned success but no data")]
    MissingData,
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::MissingData => None,
        }
    }
}

/// HTTP client for the Agora API.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Invalid API URL: {}", base_url);
        }

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let resp = self.send(self.request(Method::GET, segments), "GET").await?;
        unwrap_data(resp).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let builder = self.request(Method::POST, segments).json(body);
        let resp = self.send(builder, "POST").await?;
        unwrap_data(resp).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let builder = self.request(Method::PUT, segments).json(body);
        let resp = self.send(builder, "PUT").await?;
        unwrap_data(resp).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let resp = self.send(self.request(Method::DELETE, segments), "DELETE").await?;
        unwrap_data(resp).await
    }

    /// GET without the envelope. The body is returned for any status, so a
    /// degraded `/health` still reports its checks.
    pub async fn get_raw(&self, segments: &[&str]) -> Result<(StatusCode, serde_json::Value)> {
        let resp = self.send(self.request(Method::GET, segments), "GET").await?;
        let status = resp.status();
        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response ({})", status))?;
        Ok((status, body))
    }

    async fn send(&self, builder: RequestBuilder, method: &str) -> Result<Response> {
        builder
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", method, self.base_url))
    }
}

async fn unwrap_data<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(error_from_body(status, &body).into());
    }

    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .context("Failed to parse API response")?;

    match api_resp.data {
        Some(data) if api_resp.success => Ok(data),
        _ => Err(ApiError::MissingData.into()),
    }
}

/// Read the server's error envelope, falling back to the raw body.
fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    ApiError::Status {
        status,
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_encodes_segments() {
        let client = ApiClient::new("http://localhost:8080/", None).unwrap();
        let url = client.url(&["api", "v1", "users", "a b/c", "sessions"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/v1/users/a%20b%2Fc/sessions"
        );
    }

    #[test]
    fn test_error_from_envelope() {
        let body = r#"{"success":false,"error":{"code":"FORBIDDEN","message":"insufficient permissions"}}"#;
        match error_from_body(StatusCode::FORBIDDEN, body) {
            ApiError::Status { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("FORBIDDEN"));
                assert_eq!(message, "insufficient permissions");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_unwraps_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/me"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"identity": "alice"}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), Some("secret-token".into())).unwrap();
        let data: serde_json::Value = client.get(&["api", "v1", "me"]).await.unwrap();
        assert_eq!(data["identity"], "alice");
    }

    #[tokio::test]
    async fn test_put_sends_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/users/bob/role-level"))
            .and(body_json(json!({"role_level": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"sessions_updated": 1}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None).unwrap();
        let data: serde_json::Value = client
            .put(&["api", "v1", "users", "bob", "role-level"], &json!({"role_level": 2}))
            .await
            .unwrap();
        assert_eq!(data["sessions_updated"], 1);
    }

    #[tokio::test]
    async fn test_error_status_is_typed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "error": {"code": "UNAUTHORIZED", "message": "invalid authentication"}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None).unwrap();
        let err = client
            .delete::<serde_json::Value>(&["api", "v1", "users", "x", "sessions"])
            .await
            .unwrap_err();

        let api_err = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(api_err.to_string().contains("invalid authentication"));
    }

    #[tokio::test]
    async fn test_get_raw_keeps_degraded_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "status": "degraded"
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None).unwrap();
        let (status, body) = client.get_raw(&["health"]).await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }
}
