use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::entities::{
    BlockchainTransaction, ComplianceVerdict, Payment, PaymentStatus, QueueName, WebhookEventType,
};
use crate::domain::error::PaymentError;
use crate::domain::gateways::{ComplianceGateway, StatusFanout, StatusUpdate};
use crate::domain::ledger::PostingGroup;
use crate::domain::repository::{
    NewQueueJob, PaymentRepository, QueueJobRepository, TransitionRequest,
};
use crate::domain::types::{LedgerGroupId, PaymentId};

/// Tipo de trabajo que reintenta una observación retenida por REVIEW.
pub const JOB_TYPE_COMPLIANCE_RECHECK: &str = "compliance.recheck";

/// Razón registrada cuando cumplimiento bloquea al emisor.
pub const REASON_COMPLIANCE_BLOCKED: &str = "COMPLIANCE_BLOCKED";

/// Política del motor, derivada de configuración.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Comisión del gateway en basis points.
    pub fee_bps: u32,
    /// Tolerancia de sobrepago en basis points (0 = match exacto).
    pub overpayment_tolerance_bps: u32,
    /// Si el crédito pasa primero por `pending` antes de `available`.
    pub credit_pending_first: bool,
    /// Espera antes de reintentar una observación retenida por REVIEW.
    pub compliance_recheck_delay: Duration,
    /// Reintentos máximos del recheck de cumplimiento.
    pub compliance_recheck_attempts: i32,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            fee_bps: 100,
            overpayment_tolerance_bps: 0,
            credit_pending_first: false,
            compliance_recheck_delay: Duration::minutes(10),
            compliance_recheck_attempts: 12,
        }
    }
}

/// Resultado de procesar una observación on-chain validada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// Retenida: veredicto REVIEW, se reintentará con backoff.
    Held,
    /// Ligada: PENDING→CONFIRMING, esperando finalidad.
    Bound,
    /// Completada: finalidad alcanzada y asiento posteado.
    Completed,
    /// Fallada por veredicto BLOCKED.
    Blocked,
}

/// Motor de estados del pago.
///
/// Única autoridad sobre `payment.status`. Cada transición es un CAS
/// contra el repositorio; un segundo observador que intente la misma
/// transición ve `ConflictingState` y el motor lo resuelve como no-op.
/// Las transiciones con efecto contable viajan en la misma transacción
/// de storage que el posteo: nunca queda un pago COMPLETED sin su grupo.
pub struct PaymentEngine {
    payment_repo: Arc<dyn PaymentRepository>,
    queue_repo: Arc<dyn QueueJobRepository>,
    compliance: Arc<dyn ComplianceGateway>,
    fanout: Arc<dyn StatusFanout>,
    policy: EnginePolicy,
}

impl PaymentEngine {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepository>,
        queue_repo: Arc<dyn QueueJobRepository>,
        compliance: Arc<dyn ComplianceGateway>,
        fanout: Arc<dyn StatusFanout>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            payment_repo,
            queue_repo,
            compliance,
            fanout,
            policy,
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Promueve una factura recién persistida: CREATED→PENDING.
    #[tracing::instrument(name = "PaymentEngine::activate", skip(self))]
    pub async fn activate(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        let payment = self
            .payment_repo
            .transition(
                id,
                PaymentStatus::CREATED,
                TransitionRequest {
                    to: PaymentStatus::PENDING,
                    reason: None,
                },
                Some(WebhookEventType::PaymentPending),
            )
            .await?;
        self.publish(&payment).await;
        Ok(payment)
    }

    /// Procesa una observación on-chain ya validada por el matcher.
    ///
    /// Aplica la compuerta de cumplimiento y avanza el pago tan lejos
    /// como la transacción lo permita: liga (CONFIRMING) y, si la
    /// transferencia ya alcanzó finalidad, completa posteando el asiento.
    #[tracing::instrument(
        name = "PaymentEngine::process_observation",
        skip(self, payment, tx),
        fields(payment_id = %payment.id, tx_hash = %tx.tx_hash)
    )]
    pub async fn process_observation(
        &self,
        payment: Payment,
        tx: &BlockchainTransaction,
        overpayment_note: Option<String>,
    ) -> Result<ObservationOutcome, PaymentError> {
        let verdict = match payment.compliance_verdict {
            Some(ComplianceVerdict::CLEAR) => ComplianceVerdict::CLEAR,
            _ => match self
                .compliance
                .screen_address(tx.chain, &tx.from_address)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    // Screening no disponible: retener y reintentar
                    warn!("Compliance screening unavailable: {}", e);
                    self.enqueue_recheck(tx).await?;
                    return Ok(ObservationOutcome::Held);
                }
            },
        };

        match verdict {
            ComplianceVerdict::BLOCKED => {
                let failed = self
                    .payment_repo
                    .fail_compliance_blocked(
                        payment.id,
                        tx.id,
                        REASON_COMPLIANCE_BLOCKED,
                        Some(WebhookEventType::PaymentFailed),
                    )
                    .await?;
                self.publish(&failed).await;
                Ok(ObservationOutcome::Blocked)
            }
            ComplianceVerdict::REVIEW => {
                info!("Sender under review, holding payment {}", payment.id);
                self.enqueue_recheck(tx).await?;
                Ok(ObservationOutcome::Held)
            }
            ComplianceVerdict::CLEAR => self.advance(payment, tx, overpayment_note).await,
        }
    }

    /// Cancelación explícita del comercio antes de observarse una
    /// transacción: cualquier estado no terminal pasa a FAILED.
    #[tracing::instrument(name = "PaymentEngine::cancel", skip(self))]
    pub async fn cancel(&self, id: PaymentId, reason: String) -> Result<Payment, PaymentError> {
        let payment = self
            .payment_repo
            .find_by_id(id)
            .await?
            .ok_or(PaymentError::NotFound(id))?;

        if payment.status.is_terminal() {
            return Err(PaymentError::InvalidTransition {
                from: payment.status,
                to: PaymentStatus::FAILED,
            });
        }
        if payment.tx_hash.is_some() {
            return Err(PaymentError::ValidationError(
                "Payment already has an observed transaction".to_string(),
            ));
        }

        let failed = self
            .payment_repo
            .transition(
                id,
                payment.status,
                TransitionRequest {
                    to: PaymentStatus::FAILED,
                    reason: Some(reason),
                },
                Some(WebhookEventType::PaymentFailed),
            )
            .await?;
        self.publish(&failed).await;
        Ok(failed)
    }

    /// Falla un pago abierto por una razón del matcher (p.ej. sobrepago
    /// fuera de tolerancia).
    pub async fn fail_open_payment(
        &self,
        payment: &Payment,
        reason: String,
    ) -> Result<Payment, PaymentError> {
        let failed = self
            .payment_repo
            .transition(
                payment.id,
                payment.status,
                TransitionRequest {
                    to: PaymentStatus::FAILED,
                    reason: Some(reason),
                },
                Some(WebhookEventType::PaymentFailed),
            )
            .await?;
        self.publish(&failed).await;
        Ok(failed)
    }

    async fn advance(
        &self,
        payment: Payment,
        tx: &BlockchainTransaction,
        overpayment_note: Option<String>,
    ) -> Result<ObservationOutcome, PaymentError> {
        let payment = match payment.status {
            PaymentStatus::PENDING => {
                match self
                    .payment_repo
                    .bind_transaction(
                        payment.id,
                        tx.id,
                        &tx.tx_hash,
                        tx.block_height,
                        ComplianceVerdict::CLEAR,
                        Some(WebhookEventType::PaymentConfirming),
                    )
                    .await
                {
                    Ok(bound) => {
                        self.publish(&bound).await;
                        bound
                    }
                    // Segundo observador: si otro hilo ya ligó esta misma
                    // transacción, seguimos con la fila fresca; si el pago
                    // quedó ligado a otro hash, es un rechazo.
                    Err(PaymentError::ConflictingState { .. }) => {
                        let fresh = self
                            .payment_repo
                            .find_by_id(payment.id)
                            .await?
                            .ok_or(PaymentError::NotFound(payment.id))?;
                        match &fresh.tx_hash {
                            Some(bound_hash) if *bound_hash == tx.tx_hash => fresh,
                            _ => return Err(PaymentError::AlreadyBound(payment.id)),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            PaymentStatus::CONFIRMING => match &payment.tx_hash {
                Some(bound_hash) if *bound_hash == tx.tx_hash => payment,
                _ => return Err(PaymentError::AlreadyBound(payment.id)),
            },
            other => {
                return Err(PaymentError::ConflictingState {
                    expected: PaymentStatus::PENDING,
                    actual: other,
                })
            }
        };

        if !tx.is_finalized {
            return Ok(ObservationOutcome::Bound);
        }

        let groups = self.completion_groups(&payment)?;
        match self
            .payment_repo
            .complete_with_ledger(
                payment.id,
                tx.id,
                groups,
                overpayment_note,
                Some(WebhookEventType::PaymentCompleted),
            )
            .await
        {
            Ok(completed) => {
                self.publish(&completed).await;
                Ok(ObservationOutcome::Completed)
            }
            // Un segundo observador llegó primero a COMPLETED: no-op.
            Err(PaymentError::ConflictingState {
                actual: PaymentStatus::COMPLETED,
                ..
            }) => Ok(ObservationOutcome::Completed),
            Err(e) => Err(e),
        }
    }

    /// Grupos contables del cierre: el reconocimiento de la factura y,
    /// bajo la política pending-first, la liberación inmediata.
    fn completion_groups(&self, payment: &Payment) -> Result<Vec<PostingGroup>, PaymentError> {
        let invoice = PostingGroup::invoice(
            LedgerGroupId::new(),
            payment.id,
            payment.merchant_id,
            payment.crypto_amount,
            &payment.token,
            payment.amount_vnd,
            self.policy.fee_bps,
            self.policy.credit_pending_first,
        )?;

        let mut groups = vec![invoice];
        if self.policy.credit_pending_first {
            let (net, _fee) = payment
                .amount_vnd
                .split_fee_bps(self.policy.fee_bps)
                .map_err(|e| PaymentError::ValidationError(e.to_string()))?;
            groups.push(PostingGroup::pending_release(
                LedgerGroupId::new(),
                payment.id,
                payment.merchant_id,
                net,
            )?);
        }
        Ok(groups)
    }

    async fn enqueue_recheck(&self, tx: &BlockchainTransaction) -> Result<(), PaymentError> {
        self.queue_repo
            .enqueue(NewQueueJob {
                queue: QueueName::PERIODIC,
                job_type: JOB_TYPE_COMPLIANCE_RECHECK.to_string(),
                payload: json!({ "blockchain_tx_id": tx.id }),
                max_attempts: self.policy.compliance_recheck_attempts,
                not_before: Utc::now() + self.policy.compliance_recheck_delay,
            })
            .await
            .map_err(|e| PaymentError::RepositoryError(e.to_string()))?;
        Ok(())
    }

    async fn publish(&self, payment: &Payment) {
        let update = StatusUpdate {
            payment_id: payment.id,
            status: payment.status,
            tx_hash: payment.tx_hash.clone(),
            timestamp: Utc::now(),
        };
        // Best-effort: un bus caído no frena el pipeline de pagos
        if let Err(e) = self.fanout.publish(&update).await {
            warn!("Failed to publish status update for {}: {}", payment.id, e);
        }
    }
}
