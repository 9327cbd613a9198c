use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::Chain;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{QueueName, WalletBalanceSnapshot};
use crate::domain::gateways::BlockchainClient;
use crate::domain::repository::{NewQueueJob, QueueJobRepository, SnapshotRepository};
use crate::domain::types::WalletAddress;

/// Tipo de trabajo de alerta de saldo.
pub const JOB_TYPE_BALANCE_ALERT: &str = "balance.alert";

/// Tipo de trabajo del muestreo de saldos (cola `monitoring`).
pub const JOB_TYPE_BALANCE_CHECK: &str = "balance.check";

/// Umbrales de saldo nativo por billetera, en unidades base.
#[derive(Debug, Clone)]
pub struct BalanceThresholds {
    pub min_native: Decimal,
    pub max_native: Decimal,
}

/// Billetera monitoreada: cliente de cadena + contratos de tokens.
pub struct MonitoredWallet {
    pub client: Arc<dyn BlockchainClient>,
    pub address: WalletAddress,
    pub token_contracts: Vec<(String, String)>,
    pub thresholds: BalanceThresholds,
}

/// Job de monitoreo de saldos de billeteras calientes.
///
/// Toma un snapshot por billetera con banderas de umbral y encola una
/// alerta por snapshot fuera de rango; `alert_sent` deduplica.
pub struct WalletBalanceMonitorJob {
    wallets: Vec<MonitoredWallet>,
    snapshot_repo: Arc<dyn SnapshotRepository>,
    queue_repo: Arc<dyn QueueJobRepository>,
}

impl WalletBalanceMonitorJob {
    pub fn new(
        wallets: Vec<MonitoredWallet>,
        snapshot_repo: Arc<dyn SnapshotRepository>,
        queue_repo: Arc<dyn QueueJobRepository>,
    ) -> Self {
        Self {
            wallets,
            snapshot_repo,
            queue_repo,
        }
    }

    pub async fn run(&self) {
        for wallet in &self.wallets {
            if let Err(e) = self.snapshot_wallet(wallet).await {
                error!(
                    "Balance snapshot failed for {} on {}: {}",
                    wallet.address,
                    wallet.client.chain(),
                    e
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::jobs::worker_pool::JobHandler for WalletBalanceMonitorJob {
    fn job_type(&self) -> &'static str {
        JOB_TYPE_BALANCE_CHECK
    }

    async fn handle(
        &self,
        _job: &crate::domain::entities::QueueJob,
    ) -> Result<(), crate::jobs::worker_pool::JobFailure> {
        // Per-wallet failures are logged inside; the tick always completes
        self.run().await;
        Ok(())
    }
}

impl WalletBalanceMonitorJob {
    async fn snapshot_wallet(&self, wallet: &MonitoredWallet) -> Result<(), String> {
        let chain = wallet.client.chain();

        let native_balance = wallet
            .client
            .get_native_balance(&wallet.address)
            .await
            .map_err(|e| e.to_string())?;

        let mut token_balances = HashMap::new();
        for (symbol, contract) in &wallet.token_contracts {
            match wallet
                .client
                .get_token_balance(&wallet.address, contract)
                .await
            {
                Ok(balance) => {
                    token_balances.insert(symbol.clone(), balance.to_string());
                }
                Err(e) => warn!("Token balance {} on {} failed: {}", symbol, chain, e),
            }
        }

        let is_below = native_balance < wallet.thresholds.min_native;
        let is_above = native_balance > wallet.thresholds.max_native;

        let snapshot = self
            .snapshot_repo
            .insert(WalletBalanceSnapshot {
                id: Uuid::new_v4(),
                chain,
                wallet_address: wallet.address.clone(),
                native_balance,
                token_balances: json!(token_balances),
                is_below_min_threshold: is_below,
                is_above_max_threshold: is_above,
                alert_sent: false,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| e.to_string())?;

        if is_below || is_above {
            info!(
                "Wallet {} on {} out of range (native: {})",
                wallet.address, chain, native_balance
            );
            self.enqueue_alert(chain, &snapshot).await?;
            self.snapshot_repo
                .mark_alert_sent(snapshot.id)
                .await
                .map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    async fn enqueue_alert(
        &self,
        chain: Chain,
        snapshot: &WalletBalanceSnapshot,
    ) -> Result<(), String> {
        self.queue_repo
            .enqueue(NewQueueJob {
                queue: QueueName::MONITORING,
                job_type: JOB_TYPE_BALANCE_ALERT.to_string(),
                payload: json!({
                    "snapshot_id": snapshot.id,
                    "chain": chain,
                    "wallet_address": snapshot.wallet_address,
                    "native_balance": snapshot.native_balance.to_string(),
                    "below_min": snapshot.is_below_min_threshold,
                    "above_max": snapshot.is_above_max_threshold,
                }),
                max_attempts: 3,
                not_before: Utc::now(),
            })
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
