//! HTTP boundary to the remote scanning service.
//!
//! Every response is parsed into the typed entities of [`crate::types`] before
//! it leaves this module. Anything that does not fit (unknown severity,
//! negative counts, wrong shapes) is an [`ApiError::Malformed`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::types::{Finding, ScanProgress, ScanRequest, SessionId, Severity, Summary};

const MAX_ERROR_BODY: usize = 512;

/// Optional server-side narrowing of `GET /findings`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindingsFilter {
    pub service: Option<String>,
    pub severity: Option<Severity>,
}

impl FindingsFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut q = Vec::new();
        if let Some(service) = &self.service {
            q.push(("service", service.clone()));
        }
        if let Some(severity) = self.severity {
            q.push(("severity", severity.as_str().to_string()));
        }
        q
    }
}

/// Operations the session controller needs from the scanning service.
#[async_trait]
pub trait ScanApi: Send + Sync {
    /// `POST /api/scans/start`
    async fn start_scan(&self, request: &ScanRequest) -> Result<SessionId>;

    /// `GET /api/scans/{id}/summary`
    async fn fetch_summary(&self, session: &SessionId) -> Result<Summary>;

    /// `GET /api/scans/{id}/findings`
    async fn fetch_findings(
        &self,
        session: &SessionId,
        filter: &FindingsFilter,
    ) -> Result<Vec<Finding>>;

    /// `GET /api/scans/{id}/status`
    async fn fetch_progress(&self, session: &SessionId) -> Result<ScanProgress>;

    /// Download link for the Markdown export. Never fetched by the client.
    fn export_url(&self, session: &SessionId) -> Result<Url>;
}

/// [`ScanApi`] over HTTP with `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpScanApi {
    client: Client,
    base_url: Url,
}

impl HttpScanApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("scanscope/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn scan_url(&self, session: &SessionId, leaf: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Malformed {
                endpoint: self.base_url.to_string(),
                reason: "base URL cannot hold a path".into(),
            })?
            .pop_if_empty()
            .extend(["api", "scans", session.as_str(), leaf]);
        Ok(url)
    }

    async fn send(&self, endpoint: &str, req: RequestBuilder) -> Result<Response> {
        let resp = req.send().await?;
        debug!(endpoint, status = resp.status().as_u16(), "scan service responded");
        Ok(resp)
    }
}

#[async_trait]
impl ScanApi for HttpScanApi {
    async fn start_scan(&self, request: &ScanRequest) -> Result<SessionId> {
        const ENDPOINT: &str = "POST /api/scans/start";
        let url = self.base_url.join("api/scans/start")?;
        let resp = self.send(ENDPOINT, self.client.post(url).json(request)).await?;
        // Validation errors can echo the submitted body, so the body is not kept.
        let started: StartResponse = read_json(ENDPOINT, resp, false).await?;
        Ok(SessionId::new(started.scan_id))
    }

    async fn fetch_summary(&self, session: &SessionId) -> Result<Summary> {
        const ENDPOINT: &str = "GET /api/scans/{id}/summary";
        let url = self.scan_url(session, "summary")?;
        let resp = self.send(ENDPOINT, self.client.get(url)).await?;
        let wire: SummaryWire = read_json(ENDPOINT, resp, true).await?;
        wire.into_summary(ENDPOINT)
    }

    async fn fetch_findings(
        &self,
        session: &SessionId,
        filter: &FindingsFilter,
    ) -> Result<Vec<Finding>> {
        const ENDPOINT: &str = "GET /api/scans/{id}/findings";
        let url = self.scan_url(session, "findings")?;
        let req = self.client.get(url).query(&filter.query_pairs());
        let resp = self.send(ENDPOINT, req).await?;
        let wire: FindingsWire = read_json(ENDPOINT, resp, true).await?;
        Ok(wire.items)
    }

    async fn fetch_progress(&self, session: &SessionId) -> Result<ScanProgress> {
        const ENDPOINT: &str = "GET /api/scans/{id}/status";
        let url = self.scan_url(session, "status")?;
        let resp = self.send(ENDPOINT, self.client.get(url)).await?;
        read_json(ENDPOINT, resp, true).await
    }

    fn export_url(&self, session: &SessionId) -> Result<Url> {
        self.scan_url(session, "export.md")
    }
}

async fn read_json<T: DeserializeOwned>(endpoint: &str, resp: Response, keep_body: bool) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = if keep_body {
            let mut text = resp.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            text
        } else {
            String::new()
        };
        return Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Malformed {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    scan_id: String,
}

#[derive(Deserialize)]
struct FindingsWire {
    #[serde(default)]
    items: Vec<Finding>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryWire {
    #[serde(default)]
    severity_totals: Option<Map<String, Value>>,
    #[serde(default)]
    service_totals: Option<Map<String, Value>>,
    total_findings: u64,
    status: String,
}

impl SummaryWire {
    pub(crate) fn into_summary(self, endpoint: &str) -> Result<Summary> {
        let malformed = |reason: String| ApiError::Malformed {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut severity_totals = Vec::new();
        for (label, count) in self.severity_totals.unwrap_or_default() {
            let severity = Severity::parse(&label)
                .ok_or_else(|| malformed(format!("unknown severity {label:?}")))?;
            let count = count
                .as_u64()
                .ok_or_else(|| malformed(format!("severity count for {label} is not a count")))?;
            severity_totals.push((severity, count));
        }

        let mut service_totals = Vec::new();
        for (service, count) in self.service_totals.unwrap_or_default() {
            let count = count
                .as_u64()
                .ok_or_else(|| malformed(format!("service count for {service} is not a count")))?;
            service_totals.push((service, count));
        }

        Ok(Summary {
            severity_totals,
            service_totals,
            total_findings: self.total_findings,
            status: self.status,
        })
    }
}
