// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;

use freja_config::PeerConfig;

use crate::jobs::Job;

/// Identity advertised by a peer via `GET /api/agent/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub current_job_id: Option<String>,
}

/// HTTP client for one peer agent's job API.
pub struct PeerClient {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(cfg: &PeerConfig) -> Self {
        Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            auth_token: cfg.auth_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn submit(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut body = json!({ "prompt": prompt });
        if let Some(sp) = system_prompt {
            body["system_prompt"] = json!(sp);
        }
        let resp = self
            .with_auth(self.client.post(format!("{}/api/jobs", self.base_url)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("submitting job to {}", self.base_url))?;
        if !resp.status().is_success() {
            bail!("peer returned {}", resp.status());
        }
        let v: serde_json::Value = resp.json().await.context("reading job id")?;
        v["job_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("peer reply carried no job_id"))
    }

    pub async fn status(&self, job_id: &str) -> anyhow::Result<Job> {
        let resp = self
            .with_auth(
                self.client
                    .get(format!("{}/api/jobs/{job_id}", self.base_url)),
            )
            .send()
            .await
            .with_context(|| format!("querying job {job_id}"))?;
        if !resp.status().is_success() {
            bail!("peer returned {}", resp.status());
        }
        resp.json().await.context("decoding job status")
    }

    pub async fn cancel(&self, job_id: &str) -> anyhow::Result<bool> {
        let resp = self
            .with_auth(
                self.client
                    .delete(format!("{}/api/jobs/{job_id}", self.base_url)),
            )
            .send()
            .await
            .with_context(|| format!("cancelling job {job_id}"))?;
        if !resp.status().is_success() {
            bail!("peer returned {}", resp.status());
        }
        let v: serde_json::Value = resp.json().await?;
        Ok(v["cancelled"].as_bool().unwrap_or(false))
    }

    pub async fn info(&self) -> anyhow::Result<AgentInfo> {
        let resp = self
            .with_auth(self.client.get(format!("{}/api/agent/info", self.base_url)))
            .send()
            .await
            .with_context(|| format!("querying {}", self.base_url))?;
        if !resp.status().is_success() {
            bail!("peer returned {}", resp.status());
        }
        resp.json().await.context("decoding agent info")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
