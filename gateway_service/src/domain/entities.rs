use chrono::{DateTime, Duration, Utc};
use common::{Chain, PaymentReference, TokenAmount, TokenSymbol, VndAmount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::PaymentError;
use crate::domain::types::{
    JobId, LedgerGroupId, MerchantId, PaymentId, PayoutId, TxHash, WalletAddress,
};

/// Estados del ciclo de vida de un pago.
///
/// Solo el motor de pagos muta el estado, y únicamente a través de las
/// transiciones que `can_transition_to` permite. COMPLETED, EXPIRED y
/// FAILED son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::upper_case_acronyms)]
pub enum PaymentStatus {
    CREATED,
    PENDING,
    CONFIRMING,
    COMPLETED,
    EXPIRED,
    FAILED,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::COMPLETED | PaymentStatus::EXPIRED | PaymentStatus::FAILED
        )
    }

    /// Valida una transición contra el grafo del ciclo de vida.
    ///
    /// Cualquier estado no terminal puede pasar a FAILED (cancelación
    /// explícita del comercio antes de observar una transacción).
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, to) {
            (CREATED, PENDING) => true,
            (PENDING, CONFIRMING) => true,
            (PENDING, EXPIRED) => true,
            (CONFIRMING, COMPLETED) => true,
            (from, FAILED) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Veredicto de la revisión de cumplimiento sobre la dirección emisora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "compliance_verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceVerdict {
    CLEAR,
    REVIEW,
    BLOCKED,
}

/// Modelo de Entidad: Payment.
///
/// Una factura en VND con su equivalente en stablecoin a tasa bloqueada.
/// La `reference` es globalmente única y viaja en el memo on-chain; es
/// la llave con la que el matcher correlaciona transferencias.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub merchant_id: MerchantId,
    pub amount_vnd: VndAmount,
    pub crypto_amount: TokenAmount,
    pub token: TokenSymbol,
    pub chain: Chain,
    pub wallet_address: WalletAddress,
    pub reference: PaymentReference,
    /// VND por unidad de token, bloqueada al crear la factura.
    pub locked_rate: Decimal,
    pub status: PaymentStatus,
    pub order_id: Option<String>,
    pub compliance_verdict: Option<ComplianceVerdict>,
    pub tx_hash: Option<TxHash>,
    pub block_height: Option<i64>,
    /// Grupo contable del reconocimiento de la factura (idempotencia).
    pub ledger_group_id: Option<LedgerGroupId>,
    pub overpayment_note: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Crea una factura nueva en estado CREATED.
    ///
    /// La referencia y el TTL quedan asignados desde la construcción;
    /// `expires_at` recién gobierna el barrido de expiración cuando el
    /// motor promueve la factura a PENDING.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        merchant_id: MerchantId,
        amount_vnd: VndAmount,
        crypto_amount: TokenAmount,
        token: TokenSymbol,
        chain: Chain,
        wallet_address: WalletAddress,
        locked_rate: Decimal,
        ttl: Duration,
        order_id: Option<String>,
    ) -> Result<Self, PaymentError> {
        if locked_rate <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(
                "Locked rate must be positive".to_string(),
            ));
        }
        if ttl <= Duration::zero() {
            return Err(PaymentError::ValidationError(
                "Payment TTL must be positive".to_string(),
            ));
        }
        if wallet_address.as_str().trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Target wallet address cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            merchant_id,
            amount_vnd,
            crypto_amount,
            token,
            chain,
            wallet_address,
            reference: PaymentReference::generate(),
            locked_rate,
            status: PaymentStatus::CREATED,
            order_id,
            compliance_verdict: None,
            tx_hash: None,
            block_height: None,
            ledger_group_id: None,
            overpayment_note: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            completed_at: None,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::PENDING && self.expires_at <= now
    }

    /// Payload del código QR que escanea el pagador: URI por cadena con
    /// dirección, monto y referencia en el memo.
    pub fn qr_payload(&self) -> String {
        let amount = self.crypto_amount.to_decimal();
        match self.chain {
            Chain::Solana => format!(
                "solana:{}?amount={}&spl-token={}&memo={}",
                self.wallet_address, amount, self.token, self.reference
            ),
            Chain::Tron => format!(
                "tron:{}?amount={}&token={}&memo={}",
                self.wallet_address, amount, self.token, self.reference
            ),
            Chain::Bsc => format!(
                "bsc:{}?amount={}&token={}&ref={}",
                self.wallet_address, amount, self.token, self.reference
            ),
        }
    }
}

/// Estado de una transferencia on-chain observada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "blockchain_tx_status", rename_all = "lowercase")]
pub enum BlockchainTxStatus {
    PENDING,
    CONFIRMED,
    FINALIZED,
    FAILED,
}

/// Modelo de Entidad: BlockchainTransaction.
///
/// Una fila por transferencia entrante observada hacia una billetera
/// monitoreada. `tx_hash` es único por cadena; el pipeline de ingestión
/// absorbe duplicados por conflicto de inserción.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainTransaction {
    pub id: uuid::Uuid,
    pub chain: Chain,
    pub network: String,
    pub tx_hash: TxHash,
    pub from_address: WalletAddress,
    pub to_address: WalletAddress,
    /// Mint (Solana) o dirección de contrato (BSC/TRON) del token.
    pub token_mint: String,
    /// Símbolo solo cuando el mint está en la lista blanca.
    pub token_symbol: Option<TokenSymbol>,
    pub amount: TokenAmount,
    pub memo: Option<String>,
    pub reference: Option<PaymentReference>,
    pub confirmations: i64,
    pub is_finalized: bool,
    pub block_height: Option<i64>,
    pub payment_id: Option<PaymentId>,
    pub is_matched: bool,
    pub matched_at: Option<DateTime<Utc>>,
    pub unmatched_reason: Option<String>,
    pub status: BlockchainTxStatus,
    /// Transacción cruda para auditoría.
    pub raw: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Modelo de Entidad: Merchant.
///
/// Solo los campos que el núcleo necesita: autenticación por API key
/// (hash), configuración de webhooks y banderas de elegibilidad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    pub name: String,
    pub api_key_hash: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
    pub kyc_approved: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Merchant {
    pub fn can_transact(&self) -> bool {
        self.kyc_approved && self.is_active
    }
}

/// Evento de transición persistido junto al pago (stream append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: uuid::Uuid,
    pub payment_id: PaymentId,
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Colas del pool de trabajadores, con su prioridad relativa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_name", rename_all = "snake_case")]
pub enum QueueName {
    WEBHOOKS,
    WEBHOOKS_RETRY,
    PERIODIC,
    MONITORING,
    REPORTS,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::WEBHOOKS,
        QueueName::PERIODIC,
        QueueName::WEBHOOKS_RETRY,
        QueueName::MONITORING,
        QueueName::REPORTS,
    ];

    pub fn priority(&self) -> u8 {
        match self {
            QueueName::WEBHOOKS => 5,
            QueueName::PERIODIC => 4,
            QueueName::WEBHOOKS_RETRY => 3,
            QueueName::MONITORING => 2,
            QueueName::REPORTS => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::WEBHOOKS => "webhooks",
            QueueName::WEBHOOKS_RETRY => "webhooks_retry",
            QueueName::PERIODIC => "periodic",
            QueueName::MONITORING => "monitoring",
            QueueName::REPORTS => "reports",
        }
    }
}

/// Trabajo encolado pendiente de despacho.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub attempt: i32,
    pub max_attempts: i32,
    pub not_before: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_letter: bool,
    pub created_at: DateTime<Utc>,
}

impl QueueJob {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Tipos de evento entregados por webhook al comercio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventType {
    PaymentPending,
    PaymentConfirming,
    PaymentCompleted,
    PaymentExpired,
    PaymentFailed,
}

impl WebhookEventType {
    pub fn from_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::PENDING => Some(WebhookEventType::PaymentPending),
            PaymentStatus::CONFIRMING => Some(WebhookEventType::PaymentConfirming),
            PaymentStatus::COMPLETED => Some(WebhookEventType::PaymentCompleted),
            PaymentStatus::EXPIRED => Some(WebhookEventType::PaymentExpired),
            PaymentStatus::FAILED => Some(WebhookEventType::PaymentFailed),
            PaymentStatus::CREATED => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentPending => "payment.pending",
            WebhookEventType::PaymentConfirming => "payment.confirming",
            WebhookEventType::PaymentCompleted => "payment.completed",
            WebhookEventType::PaymentExpired => "payment.expired",
            WebhookEventType::PaymentFailed => "payment.failed",
        }
    }
}

/// Muestra periódica del saldo de una billetera caliente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceSnapshot {
    pub id: uuid::Uuid,
    pub chain: Chain,
    pub wallet_address: WalletAddress,
    /// Saldo nativo (SOL/BNB/TRX) en unidades base.
    pub native_balance: Decimal,
    /// Saldos de tokens por símbolo, en unidades base.
    pub token_balances: Value,
    pub is_below_min_threshold: bool,
    pub is_above_max_threshold: bool,
    pub alert_sent: bool,
    pub created_at: DateTime<Utc>,
}

/// Estado de una solicitud de retiro del comercio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    REQUESTED,
    APPROVED,
    COMPLETED,
    REJECTED,
}

/// Modelo de Entidad: Payout.
///
/// El flujo de aprobación vive fuera del núcleo; aquí solo importa el
/// acople contable al completarse (débito de `available` del comercio).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub merchant_id: MerchantId,
    pub amount_vnd: VndAmount,
    pub status: PayoutStatus,
    pub ledger_group_id: Option<LedgerGroupId>,
    pub settlement_tx_hash: Option<TxHash>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Registro diario de conciliación entre la suma on-chain observada y el
/// saldo contable de `crypto_pool` por token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub id: uuid::Uuid,
    pub token: TokenSymbol,
    pub ledger_balance: Decimal,
    pub observed_balance: Decimal,
    pub delta: Decimal,
    pub alerted: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payment() -> Payment {
        Payment::new(
            MerchantId::new(),
            VndAmount::new(2_300_000).unwrap(),
            TokenAmount::from_base_units(100_000_000, 6),
            TokenSymbol::new("USDT").unwrap(),
            Chain::Solana,
            WalletAddress::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"),
            Decimal::from(23_000),
            Duration::minutes(30),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_new_payment_starts_created_with_ttl() {
        let payment = sample_payment();
        assert_eq!(payment.status, PaymentStatus::CREATED);
        assert_eq!(payment.expires_at - payment.created_at, Duration::minutes(30));
        assert!(payment.reference.as_str().starts_with("PAY-"));
    }

    #[test]
    fn test_status_graph() {
        use PaymentStatus::*;
        assert!(CREATED.can_transition_to(PENDING));
        assert!(PENDING.can_transition_to(CONFIRMING));
        assert!(PENDING.can_transition_to(EXPIRED));
        assert!(CONFIRMING.can_transition_to(COMPLETED));
        assert!(CONFIRMING.can_transition_to(FAILED));
        assert!(PENDING.can_transition_to(FAILED));

        // No state is revisited after a terminal state
        for terminal in [COMPLETED, EXPIRED, FAILED] {
            for to in [CREATED, PENDING, CONFIRMING, COMPLETED, EXPIRED, FAILED] {
                assert!(!terminal.can_transition_to(to));
            }
        }
        // No skipping straight to COMPLETED
        assert!(!PENDING.can_transition_to(COMPLETED));
        assert!(!CREATED.can_transition_to(CONFIRMING));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let result = Payment::new(
            MerchantId::new(),
            VndAmount::new(1_000).unwrap(),
            TokenAmount::from_base_units(1, 6),
            TokenSymbol::new("USDT").unwrap(),
            Chain::Solana,
            WalletAddress::new("wallet"),
            Decimal::ZERO,
            Duration::minutes(30),
            None,
        );
        assert!(matches!(result, Err(PaymentError::ValidationError(_))));
    }

    #[test]
    fn test_expiry_check_only_applies_to_pending() {
        let mut payment = sample_payment();
        assert!(!payment.is_expired_at(Utc::now() + Duration::minutes(31)));

        payment.status = PaymentStatus::PENDING;
        assert!(!payment.is_expired_at(Utc::now()));
        assert!(payment.is_expired_at(Utc::now() + Duration::minutes(31)));

        payment.status = PaymentStatus::COMPLETED;
        assert!(!payment.is_expired_at(Utc::now() + Duration::minutes(31)));
    }

    #[test]
    fn test_qr_payload_carries_reference() {
        let payment = sample_payment();
        let payload = payment.qr_payload();
        assert!(payload.starts_with("solana:"));
        assert!(payload.contains(payment.reference.as_str()));
        assert!(payload.contains("amount=100"));
    }

    #[test]
    fn test_queue_priorities() {
        assert!(QueueName::WEBHOOKS.priority() > QueueName::PERIODIC.priority());
        assert!(QueueName::PERIODIC.priority() > QueueName::WEBHOOKS_RETRY.priority());
        assert!(QueueName::WEBHOOKS_RETRY.priority() > QueueName::MONITORING.priority());
        assert!(QueueName::MONITORING.priority() > QueueName::REPORTS.priority());
    }

    #[test]
    fn test_webhook_event_types() {
        assert_eq!(
            WebhookEventType::from_status(PaymentStatus::COMPLETED)
                .unwrap()
                .as_str(),
            "payment.completed"
        );
        assert!(WebhookEventType::from_status(PaymentStatus::CREATED).is_none());
    }
}
