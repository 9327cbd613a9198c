use std::time::Duration;

use async_trait::async_trait;
use common::Chain;
use serde_json::json;
use tracing::info;

use crate::domain::entities::ComplianceVerdict;
use crate::domain::error::ComplianceError;
use crate::domain::gateways::ComplianceGateway;
use crate::domain::types::WalletAddress;

/// Fachada HTTP del proveedor de screening de billeteras.
///
/// El núcleo no interpreta señales del proveedor: envía (cadena,
/// dirección) y reacciona al veredicto Clear/Review/Blocked.
pub struct HttpComplianceGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpComplianceGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ComplianceGateway for HttpComplianceGateway {
    async fn screen_address(
        &self,
        chain: Chain,
        address: &WalletAddress,
    ) -> Result<ComplianceVerdict, ComplianceError> {
        let response = self
            .http
            .post(format!("{}/v1/screen", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "chain": chain.as_str(), "address": address.as_str() }))
            .send()
            .await
            .map_err(|e| ComplianceError::ScreeningFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ComplianceError::ScreeningFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ComplianceError::ScreeningFailed(e.to_string()))?;

        match body["verdict"].as_str() {
            Some("clear") => Ok(ComplianceVerdict::CLEAR),
            Some("review") => Ok(ComplianceVerdict::REVIEW),
            Some("blocked") => Ok(ComplianceVerdict::BLOCKED),
            other => Err(ComplianceError::ScreeningFailed(format!(
                "Unknown verdict: {:?}",
                other
            ))),
        }
    }
}

/// Implementación para desarrollo y testing: todo emisor pasa limpio.
pub struct AllowAllComplianceGateway;

impl AllowAllComplianceGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AllowAllComplianceGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComplianceGateway for AllowAllComplianceGateway {
    async fn screen_address(
        &self,
        chain: Chain,
        address: &WalletAddress,
    ) -> Result<ComplianceVerdict, ComplianceError> {
        info!(
            " [AllowAllComplianceGateway] Screening {} on {}: CLEAR",
            address, chain
        );
        Ok(ComplianceVerdict::CLEAR)
    }
}
