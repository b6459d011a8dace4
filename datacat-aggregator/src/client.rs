//! `ServerClient`: the Aggregator's outbound HTTP connection to the
//! Session Store (spec.md §6). Every call here is issued only from a
//! background worker — request handlers on the Aggregator's own HTTP
//! surface never block on it (spec.md §5).

use std::time::Duration;

use datacat_common::{EventRecord, MetricRecord};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::config::AggregatorConfig;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ServerClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    compress: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    id: String,
}

impl ServerClient {
    pub fn new(config: &AggregatorConfig) -> Self {
        let http = Client::builder()
            .timeout(OUTBOUND_TIMEOUT)
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify || !config.tls_verify)
            .build()
            .expect("reqwest client configuration should be valid");
        Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            compress: config.enable_compression,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Attaches a JSON body, gzip-compressing it first when compression is
    /// enabled, matching spec.md §6's "request bodies MAY be
    /// gzip-encoded".
    fn json_body(&self, builder: reqwest::RequestBuilder, value: &Value) -> reqwest::RequestBuilder {
        let raw = serde_json::to_vec(value).expect("JSON values always serialize");
        if self.compress {
            use std::io::Write;
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&raw).expect("in-memory gzip write cannot fail");
            let compressed = encoder.finish().expect("in-memory gzip finish cannot fail");
            builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(reqwest::header::CONTENT_ENCODING, "gzip")
                .body(compressed)
        } else {
            builder.header(reqwest::header::CONTENT_TYPE, "application/json").body(raw)
        }
    }

    #[instrument(skip(self))]
    pub async fn create_session(
        &self,
        product: &str,
        version: &str,
        machine_id: Option<&str>,
        hostname: Option<&str>,
    ) -> reqwest::Result<String> {
        let body = json!({"product": product, "version": version, "machine_id": machine_id, "hostname": hostname});
        let request = self.json_body(self.request(reqwest::Method::POST, "/api/sessions"), &body);
        let response = request.send().await?.error_for_status()?;
        let parsed: CreateSessionResponse = response.json().await?;
        Ok(parsed.id)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_state(&self, session_id: &str, patch: &Value) -> reqwest::Result<()> {
        let request = self.json_body(
            self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/state")),
            patch,
        );
        request.send().await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self, event))]
    pub async fn add_event(&self, session_id: &str, event: &EventRecord) -> reqwest::Result<()> {
        let value = serde_json::to_value(event).expect("EventRecord always serializes");
        let request = self.json_body(
            self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/events")),
            &value,
        );
        request.send().await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self, metric))]
    pub async fn add_metric(&self, session_id: &str, metric: &MetricRecord) -> reqwest::Result<()> {
        let value = serde_json::to_value(metric).expect("MetricRecord always serializes");
        let request = self.json_body(
            self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/metrics")),
            &value,
        );
        request.send().await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn heartbeat(&self, session_id: &str) -> reqwest::Result<()> {
        self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/heartbeat"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn end_session(&self, session_id: &str) -> reqwest::Result<()> {
        self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/end"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn crash_session(&self, session_id: &str, reason: &str) -> reqwest::Result<()> {
        let body = json!({"reason": reason});
        let request = self.json_body(
            self.request(reqwest::Method::POST, &format!("/api/sessions/{session_id}/crash")),
            &body,
        );
        request.send().await?.error_for_status()?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: &str) -> reqwest::Result<Value> {
        let response = self
            .request(reqwest::Method::GET, &format!("/api/sessions/{session_id}"))
            .send()
            .await?
            .error_for_status()?;
        response.json().await
    }

    #[instrument(skip(self))]
    pub async fn list_sessions(&self) -> reqwest::Result<Value> {
        let response = self
            .request(reqwest::Method::GET, "/api/data/sessions")
            .send()
            .await?
            .error_for_status()?;
        response.json().await
    }

}
