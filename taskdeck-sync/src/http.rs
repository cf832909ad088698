//! reqwest-backed [`Transport`].

use crate::config::SyncConfig;
use async_trait::async_trait;
use reqwest::Method;
use taskdeck_core::{ApiRequest, HttpMethod, Transport, TransportError, TransportResponse};
use tracing::debug;

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(method(request.method), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::new(format!("request to {url} timed out"))
            } else {
                TransportError::new(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        debug!(method = %request.method, url = %url, status, "HTTP exchange");
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use std::path::Path;

    #[test]
    fn test_url_joins_base_and_path() {
        let mut config = test_config(Path::new("/tmp/taskdeck"));
        config.api_base_url = "http://localhost:4000/api/".to_string();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.url("/tasks/t1"), "http://localhost:4000/api/tasks/t1");
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(method(HttpMethod::Delete), Method::DELETE);
    }
}
