//! HTTP client for the panel application and client APIs.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::PanelConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{Allocation, Node, ServerResource};

use super::{BuildSpec, PowerSignal, ProvisioningClient, RemoteStatus, ServerSpec};

const PANEL_ACCEPT: &str = "Application/vnd.pterodactyl.v1+json";
const ALLOCATIONS_PER_PAGE: u32 = 100;

/// Envelope around every panel resource.
#[derive(Deserialize)]
struct Envelope<T> {
    attributes: Option<T>,
}

#[derive(Deserialize)]
struct RawServer {
    id: u64,
    identifier: String,
    #[serde(default)]
    suspended: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    container: Option<RawContainer>,
}

#[derive(Deserialize)]
struct RawContainer {
    /// Older panels report 0/1, newer ones a boolean.
    #[serde(default)]
    installed: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawAllocation {
    id: u64,
    ip: String,
    port: u16,
    #[serde(default)]
    assigned: bool,
}

#[derive(Deserialize)]
struct AllocationPage {
    data: Vec<Envelope<RawAllocation>>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Deserialize)]
struct PageMeta {
    pagination: Pagination,
}

#[derive(Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

impl RawServer {
    fn remote_status(&self) -> RemoteStatus {
        let installing = matches!(
            self.status.as_deref(),
            Some("installing" | "install_failed" | "reinstall_failed")
        );

        let installed = match self.container.as_ref().and_then(|c| c.installed.as_ref()) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::Number(n)) => n.as_u64() == Some(1),
            _ => !installing,
        };

        RemoteStatus {
            installed: installed && !installing,
            suspended: self.suspended.unwrap_or(false)
                || self.status.as_deref() == Some("suspended"),
        }
    }
}

/// HTTP client for a Pterodactyl-compatible panel.
#[derive(Debug, Clone)]
pub struct PanelClient {
    client: Client,
    base_url: String,
    client_api_key: Option<String>,
}

impl PanelClient {
    /// Create a new panel client from configuration.
    pub fn new(config: &PanelConfig) -> ControlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(PANEL_ACCEPT));

        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ControlError::Config(format!("invalid panel api key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            client_api_key: config.client_api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> ControlResult<Response> {
        let response = request.send().await.map_err(ControlError::Http)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(ControlError::panel(format!("{action} failed: {status} {body}")))
    }
}

#[async_trait]
impl ProvisioningClient for PanelClient {
    async fn create_server(&self, spec: &ServerSpec) -> ControlResult<Option<ServerResource>> {
        let request = self
            .client
            .post(self.url("/api/application/servers"))
            .json(spec);
        let response = self.send(request, "create server").await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.bytes().await.map_err(ControlError::Http)?;
        let envelope: Option<Envelope<RawServer>> = serde_json::from_slice(&body).ok();

        Ok(envelope
            .and_then(|e| e.attributes)
            .filter(|s| !s.identifier.is_empty())
            .map(|s| ServerResource {
                id: s.id,
                identifier: s.identifier,
            }))
    }

    async fn server_status(&self, panel_id: u64) -> ControlResult<RemoteStatus> {
        let request = self
            .client
            .get(self.url(&format!("/api/application/servers/{panel_id}")));
        let response = self.send(request, "get server").await?;

        let envelope: Envelope<RawServer> = response.json().await.map_err(ControlError::Http)?;
        let server = envelope
            .attributes
            .ok_or_else(|| ControlError::panel(format!("server {panel_id} has no attributes")))?;

        Ok(server.remote_status())
    }

    async fn list_allocations(&self, node: &Node) -> ControlResult<Vec<Allocation>> {
        let mut free = Vec::new();
        let mut page = 1;

        loop {
            let request = self
                .client
                .get(self.url(&format!(
                    "/api/application/nodes/{}/allocations",
                    node.panel_node_id
                )))
                .query(&[("page", page), ("per_page", ALLOCATIONS_PER_PAGE)]);
            let response = self.send(request, "list allocations").await?;
            let body: AllocationPage = response.json().await.map_err(ControlError::Http)?;

            free.extend(
                body.data
                    .into_iter()
                    .filter_map(|e| e.attributes)
                    .filter(|a| !a.assigned)
                    .map(|a| Allocation {
                        id: a.id,
                        ip: a.ip,
                        port: a.port,
                    }),
            );

            match body.meta {
                Some(meta) if meta.pagination.current_page < meta.pagination.total_pages => {
                    page = meta.pagination.current_page + 1;
                }
                _ => break,
            }
        }

        debug!(node = %node.id, free = free.len(), "listed free allocations");
        Ok(free)
    }

    async fn update_build(&self, panel_id: u64, build: &BuildSpec) -> ControlResult<()> {
        let request = self
            .client
            .patch(self.url(&format!("/api/application/servers/{panel_id}/build")))
            .json(build);
        self.send(request, "update build").await?;
        Ok(())
    }

    async fn power(&self, identifier: &str, signal: PowerSignal) -> ControlResult<()> {
        let key = self
            .client_api_key
            .as_deref()
            .ok_or_else(|| ControlError::Config("panel client api key not set".to_owned()))?;

        let request = self
            .client
            .post(self.url(&format!("/api/client/servers/{identifier}/power")))
            .bearer_auth(key)
            .json(&serde_json::json!({ "signal": signal }));
        self.send(request, "power").await?;
        Ok(())
    }
}
