use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Chain, TokenSymbol};
use futures_util::Stream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entities::{ComplianceVerdict, PaymentStatus, Payout};
use crate::domain::error::{
    ComplianceError, FanoutError, IngestError, PaymentError, PayoutError, WebhookError,
};
use crate::domain::types::{PaymentId, TxHash, WalletAddress};

/// Profundidad de confirmación reportada por la cadena para un hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxFinality {
    pub confirmations: u64,
    pub finalized: bool,
}

/// Página de hashes entrantes hacia una billetera, con cursor de avance.
#[derive(Debug, Clone)]
pub struct TransferPage {
    pub tx_hashes: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Stream de hashes notificados por la suscripción WebSocket.
pub type TxHashStream = Pin<Box<dyn Stream<Item = Result<String, IngestError>> + Send>>;

// Port de acceso a cadena: el conjunto de capacidades que el ingestor y
// el monitor de saldos necesitan. Tres implementaciones (Solana, BSC,
// TRON) comparten el matcher conformando este contrato.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    fn chain(&self) -> Chain;

    /// Transacción cruda en el formato nativo de la cadena; el parser
    /// por cadena la normaliza después.
    async fn get_transaction(&self, tx_hash: &str) -> Result<Value, IngestError>;

    async fn get_finality(&self, tx_hash: &str) -> Result<TxFinality, IngestError>;

    /// Saldo nativo (SOL/BNB/TRX) en unidades base.
    async fn get_native_balance(&self, address: &WalletAddress) -> Result<Decimal, IngestError>;

    /// Saldo de un token (mint/contrato) en unidades base.
    async fn get_token_balance(
        &self,
        address: &WalletAddress,
        token_contract: &str,
    ) -> Result<Decimal, IngestError>;

    /// Hashes recientes hacia la billetera desde el cursor comprometido.
    async fn recent_transfers(
        &self,
        address: &WalletAddress,
        cursor: Option<&str>,
    ) -> Result<TransferPage, IngestError>;

    /// Suscripción push a notificaciones de la billetera. Las cadenas
    /// sin feed (TRON) retornan `SubscriptionUnsupported` y el ingestor
    /// opera solo con el productor de polling.
    async fn subscribe(&self, address: &WalletAddress) -> Result<TxHashStream, IngestError>;
}

// Port de la capacidad de cumplimiento: el núcleo no juzga direcciones,
// reacciona al veredicto.
#[async_trait]
pub trait ComplianceGateway: Send + Sync {
    async fn screen_address(
        &self,
        chain: Chain,
        address: &WalletAddress,
    ) -> Result<ComplianceVerdict, ComplianceError>;
}

// Port de tasas de cambio; la tasa retornada queda bloqueada en la
// factura.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// VND por unidad de token.
    async fn lock_rate(&self, token: &TokenSymbol) -> Result<Decimal, PaymentError>;
}

// Port de la billetera de liquidación. El núcleo nunca custodia llaves:
// arma la solicitud y delega la firma/emisión.
#[async_trait]
pub trait SettlementWallet: Send + Sync {
    async fn submit_transfer(&self, payout: &Payout) -> Result<TxHash, PayoutError>;
}

/// Mensaje publicado por cada transición de estado de un pago.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub timestamp: DateTime<Utc>,
}

// Port del bus de estado por pago. Entrega best-effort: los suscriptores
// desconectados pierden eventos y deben consultar el estado al
// reconectar.
#[async_trait]
pub trait StatusFanout: Send + Sync {
    async fn publish(&self, update: &StatusUpdate) -> Result<(), FanoutError>;

    async fn subscribe(
        &self,
        payment_id: PaymentId,
    ) -> Result<tokio::sync::mpsc::Receiver<StatusUpdate>, FanoutError>;
}

// Port de transporte de webhooks salientes (HTTP con timeout).
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Entrega firmada. `Ok` solo en 2xx; otro estado es
    /// `NonSuccessStatus` para que el despachador reprograme.
    async fn deliver(
        &self,
        url: &str,
        event_id: &str,
        event_type: &str,
        signature: &str,
        body: &[u8],
    ) -> Result<(), WebhookError>;
}
