use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{Chain, PaymentReference, TokenSymbol};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::entities::{
    BlockchainTransaction, ComplianceVerdict, Merchant, Payment, PaymentEvent, PaymentStatus,
    Payout, QueueJob, QueueName, ReconciliationLog, WalletBalanceSnapshot, WebhookEventType,
};
use crate::domain::error::{
    AuditError, IngestError, LedgerError, MerchantError, MonitorError, PaymentError, PayoutError,
    QueueError,
};
use crate::domain::ledger::{
    LedgerAccount, LedgerEntry, MerchantBalance, PostingGroup, ReconciliationDelta,
};
use crate::domain::types::{JobId, LedgerGroupId, MerchantId, PaymentId, PayoutId, TxHash};

/// Transición simple solicitada sobre un pago (sin efectos contables).
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub to: PaymentStatus,
    pub reason: Option<String>,
}

// Port para la persistencia de pagos y su stream de transiciones.
//
// Las operaciones compuestas (bind, completar con asiento, fallar por
// cumplimiento) son atómicas: estado + stream + marca de matching + (si
// aplica) asiento contable viajan en una sola transacción de storage.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: Payment) -> Result<Payment, PaymentError>;

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError>;

    async fn find_by_reference(
        &self,
        chain: Chain,
        reference: &PaymentReference,
    ) -> Result<Option<Payment>, PaymentError>;

    /// CAS sobre `status`: falla con `ConflictingState` si el estado
    /// actual no es `expected`. Si `webhook` viene, el trabajo de
    /// entrega se construye desde la fila ya actualizada y se encola en
    /// la misma transacción de storage (entrega al-menos-una-vez).
    async fn transition(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        request: TransitionRequest,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError>;

    /// Liga una transacción observada: PENDING→CONFIRMING + `tx_hash` +
    /// veredicto + marca de matching sobre la fila de blockchain,
    /// atómicamente.
    async fn bind_transaction(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        tx_hash: &TxHash,
        block_height: Option<i64>,
        verdict: ComplianceVerdict,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError>;

    /// Cierra el pago: CONFIRMING→COMPLETED + posteo de los grupos
    /// contables + vínculo del grupo en el pago, en una transacción. Si
    /// el posteo falla, el cambio de estado se revierte completo.
    async fn complete_with_ledger(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        groups: Vec<PostingGroup>,
        overpayment_note: Option<String>,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError>;

    /// Falla el pago por veredicto BLOCKED dejando la transacción
    /// marcada como matched pero sin asiento contable.
    async fn fail_compliance_blocked(
        &self,
        id: PaymentId,
        blockchain_tx_id: Uuid,
        reason: &str,
        webhook: Option<WebhookEventType>,
    ) -> Result<Payment, PaymentError>;

    /// Reclama un lote de pagos PENDING vencidos con locks de fila, los
    /// transiciona a EXPIRED y encola sus webhooks `payment.expired` en
    /// la misma transacción. Retorna los pagos ya expirados.
    async fn claim_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, PaymentError>;

    async fn list_events(&self, id: PaymentId) -> Result<Vec<PaymentEvent>, PaymentError>;
}

// Port para las transferencias on-chain observadas.
#[async_trait]
pub trait BlockchainTxRepository: Send + Sync {
    /// Inserta absorviendo duplicados: `None` cuando el `tx_hash` ya
    /// existía (el conflicto de unicidad es el mecanismo de dedup).
    async fn insert_if_new(
        &self,
        tx: BlockchainTransaction,
    ) -> Result<Option<BlockchainTransaction>, IngestError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<BlockchainTransaction>, IngestError>;

    async fn find_by_hash(
        &self,
        chain: Chain,
        tx_hash: &TxHash,
    ) -> Result<Option<BlockchainTransaction>, IngestError>;

    async fn mark_unmatched(&self, id: Uuid, reason: &str) -> Result<(), IngestError>;

    async fn update_confirmations(&self, id: Uuid, confirmations: i64) -> Result<(), IngestError>;

    /// Marca finalidad: `is_finalized = true, status = finalized` en una
    /// sola escritura.
    async fn mark_finalized(&self, id: Uuid) -> Result<BlockchainTransaction, IngestError>;

    async fn list_unfinalized(
        &self,
        chain: Chain,
        limit: i64,
    ) -> Result<Vec<BlockchainTransaction>, IngestError>;

    /// Σ de unidades base finalizadas por token (conciliación diaria).
    async fn sum_finalized_base_units(&self, token: &TokenSymbol)
        -> Result<Decimal, IngestError>;
}

// Port del libro mayor: única autoridad sobre el dinero.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Postea un grupo balanceado y actualiza los saldos materializados
    /// en la misma transacción. `Duplicate` si el grupo ya fue posteado.
    async fn post(&self, group: &PostingGroup) -> Result<(), LedgerError>;

    async fn merchant_balance(&self, merchant_id: MerchantId)
        -> Result<MerchantBalance, LedgerError>;

    async fn account_balance(
        &self,
        account: &LedgerAccount,
        currency: &str,
    ) -> Result<Decimal, LedgerError>;

    /// Recalcula la proyección por cuenta a partir del diario en el
    /// rango y reporta discrepancias contra el saldo materializado.
    async fn reconcile(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationDelta>, LedgerError>;

    /// Asientos de un grupo posteado (lectura de auditoría).
    async fn entries_for_group(
        &self,
        group_id: LedgerGroupId,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Trabajo nuevo por encolar.
#[derive(Debug, Clone)]
pub struct NewQueueJob {
    pub queue: QueueName,
    pub job_type: String,
    pub payload: Value,
    pub max_attempts: i32,
    pub not_before: DateTime<Utc>,
}

// Port de la cola de trabajos respaldada por storage.
#[async_trait]
pub trait QueueJobRepository: Send + Sync {
    async fn enqueue(&self, job: NewQueueJob) -> Result<QueueJob, QueueError>;

    /// Reclama hasta `limit` trabajos listos de la cola con un timeout
    /// de visibilidad: los trabajos reclamados quedan invisibles hasta
    /// `now + visibility` y reaparecen si el worker muere.
    async fn claim(
        &self,
        queue: QueueName,
        limit: i64,
        visibility: Duration,
    ) -> Result<Vec<QueueJob>, QueueError>;

    /// Elimina un trabajo entregado con éxito.
    async fn complete(&self, id: JobId) -> Result<(), QueueError>;

    /// Reprograma con backoff, incrementando el intento y moviéndolo de
    /// cola si corresponde (webhooks → webhooks_retry).
    async fn retry_later(
        &self,
        id: JobId,
        queue: QueueName,
        not_before: DateTime<Utc>,
        error: &str,
    ) -> Result<(), QueueError>;

    async fn mark_dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError>;
}

// Port de comercios (solo lo que el núcleo necesita).
#[async_trait]
pub trait MerchantRepository: Send + Sync {
    async fn create(&self, merchant: Merchant) -> Result<Merchant, MerchantError>;

    async fn find_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, MerchantError>;

    async fn find_by_api_key_hash(
        &self,
        api_key_hash: &str,
    ) -> Result<Option<Merchant>, MerchantError>;
}

// Port de retiros: solo el acople contable del cierre.
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    async fn create(&self, payout: Payout) -> Result<Payout, PayoutError>;

    async fn find_by_id(&self, id: PayoutId) -> Result<Option<Payout>, PayoutError>;

    /// APPROVED→COMPLETED + posteo del grupo de cierre, atómicamente.
    async fn complete_with_ledger(
        &self,
        id: PayoutId,
        group: PostingGroup,
        settlement_tx_hash: Option<TxHash>,
    ) -> Result<Payout, PayoutError>;
}

// Port de snapshots de saldo de billeteras monitoreadas.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert(
        &self,
        snapshot: WalletBalanceSnapshot,
    ) -> Result<WalletBalanceSnapshot, MonitorError>;

    async fn mark_alert_sent(&self, id: Uuid) -> Result<(), MonitorError>;
}

// Port del registro de conciliación diaria.
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    async fn insert(&self, log: ReconciliationLog) -> Result<ReconciliationLog, LedgerError>;
}

// Port del registro de auditoría del API.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn record(
        &self,
        merchant_id: Option<MerchantId>,
        action: &str,
        detail: Value,
    ) -> Result<(), AuditError>;
}

// Port de cursores de ingestión, persistidos por (cadena, productor).
#[async_trait]
pub trait CursorRepository: Send + Sync {
    async fn get(&self, chain: Chain, producer: &str) -> Result<Option<String>, IngestError>;

    async fn commit(&self, chain: Chain, producer: &str, cursor: &str)
        -> Result<(), IngestError>;
}
