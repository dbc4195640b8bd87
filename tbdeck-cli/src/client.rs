//! HTTP control plane
//!
//! Talks to the server extension's REST API under `<base>/api/tensorboard`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::Serialize;

use tbdeck_core::config::ServerConfig;
use tbdeck_core::control_plane::{ControlPlane, ControlPlaneError};
use tbdeck_core::model::Model;

const API_PATH: [&str; 2] = ["api", "tensorboard"];

#[derive(Serialize)]
struct CreateRequest<'a> {
    logdir: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reload_interval: Option<u64>,
}

pub struct HttpControlPlane {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    reload_interval: Option<u64>,
}

impl HttpControlPlane {
    pub fn new(server: &ServerConfig, reload_interval: Option<u64>) -> Result<Self, ControlPlaneError> {
        let base = parse_base_url(&server.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(server.request_timeout_ms))
            .build()
            .map_err(|e| ControlPlaneError::Transport {
                message: format!("create http client failed: {}", e),
            })?;
        Ok(Self {
            client,
            base,
            token: server.token.clone().filter(|t| !t.is_empty()),
            reload_interval,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn api_url(&self, name: Option<&str>) -> Url {
        let mut segments = API_PATH.to_vec();
        segments.extend(name);
        self.url(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(reqwest::header::AUTHORIZATION, format!("token {}", token)),
            None => builder,
        }
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ControlPlaneError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    let url = Url::parse(&normalized).map_err(|e| ControlPlaneError::Transport {
        message: format!("invalid base url {:?}: {}", raw, e),
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ControlPlaneError::Transport {
            message: format!("base url {:?} is not an http(s) URL", raw),
        });
    }
    Ok(url)
}

fn transport(e: reqwest::Error) -> ControlPlaneError {
    ControlPlaneError::Transport {
        message: e.to_string(),
    }
}

/// The server reports errors as `{"message": ...}`; fall back to the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

async fn status_error(response: reqwest::Response) -> ControlPlaneError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ControlPlaneError::Status {
        status,
        message: error_message(&body),
    }
}

fn parse_list(body: &str) -> Result<Vec<Model>, ControlPlaneError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ControlPlaneError::InvalidResponse {
            message: format!("list body is not JSON: {}", e),
        })?;
    if !value.is_array() {
        return Err(ControlPlaneError::InvalidResponse {
            message: "list body is not an array".into(),
        });
    }
    serde_json::from_value(value).map_err(|e| ControlPlaneError::InvalidResponse {
        message: format!("bad instance in list: {}", e),
    })
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn list_running(&self) -> Result<Vec<Model>, ControlPlaneError> {
        let url = self.api_url(None);
        tracing::trace!(%url, "listing instances");
        let response = self.request(Method::GET, url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body = response.text().await.map_err(transport)?;
        parse_list(&body)
    }

    async fn start_new(&self, logdir: &str) -> Result<Model, ControlPlaneError> {
        let url = self.api_url(None);
        tracing::debug!(%url, logdir, "starting instance");
        let response = self
            .request(Method::POST, url)
            .json(&CreateRequest {
                logdir,
                reload_interval: self.reload_interval,
            })
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body = response.text().await.map_err(transport)?;
        serde_json::from_str(&body).map_err(|e| ControlPlaneError::InvalidResponse {
            message: format!("bad instance in create response: {}", e),
        })
    }

    async fn shutdown(&self, name: &str) -> Result<(), ControlPlaneError> {
        let url = self.api_url(Some(name));
        tracing::debug!(%url, "deleting instance");
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(ControlPlaneError::NotFound {
                    name: name.to_string(),
                    message: error_message(&body),
                })
            }
            _ => Err(status_error(response).await),
        }
    }

    fn instance_url(&self, name: &str) -> Option<String> {
        Some(self.url(&["tensorboard", name, ""]).to_string())
    }
}
