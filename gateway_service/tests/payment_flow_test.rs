use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{Chain, PaymentReference, TokenAmount, TokenSymbol, VndAmount};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use gateway_service::domain::entities::{
    BlockchainTransaction, BlockchainTxStatus, ComplianceVerdict, Payment, PaymentEvent,
    PaymentStatus, QueueJob, QueueName, WebhookEventType,
};
use gateway_service::domain::error::{
    ComplianceError, FanoutError, IngestError, LedgerError, PaymentError, QueueError,
};
use gateway_service::domain::gateways::{ComplianceGateway, StatusFanout, StatusUpdate};
use gateway_service::domain::ledger::{
    EntryDirection, LedgerAccount, LedgerGroupId, PostingGroup, PostingLeg,
};
use gateway_service::domain::repository::{
    BlockchainTxRepository, NewQueueJob, PaymentRepository, QueueJobRepository, TransitionRequest,
};
use gateway_service::domain::types::{JobId, MerchantId, PaymentId, TxHash, WalletAddress};
use gateway_service::use_cases::expire_payments::ExpirePaymentsUseCase;
use gateway_service::use_cases::match_transaction::{MatchOutcome, MatchTransactionUseCase};
use gateway_service::use_cases::payment_engine::{
    EnginePolicy, ObservationOutcome, PaymentEngine,
};

mock! {
    pub PaymentRepositoryImpl {}

    #[async_trait]
    impl PaymentRepository for PaymentRepositoryImpl {
        async fn create(&self, payment: Payment) -> Result<Payment, PaymentError>;
        async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>, PaymentError>;
        async fn find_by_reference(&self, chain: Chain, reference: &PaymentReference) -> Result<Option<Payment>, PaymentError>;
        async fn transition(&self, id: PaymentId, expected: PaymentStatus, request: TransitionRequest, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
        async fn bind_transaction(&self, id: PaymentId, blockchain_tx_id: Uuid, tx_hash: &TxHash, block_height: Option<i64>, verdict: ComplianceVerdict, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
        async fn complete_with_ledger(&self, id: PaymentId, blockchain_tx_id: Uuid, groups: Vec<PostingGroup>, overpayment_note: Option<String>, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
        async fn fail_compliance_blocked(&self, id: PaymentId, blockchain_tx_id: Uuid, reason: &str, webhook: Option<WebhookEventType>) -> Result<Payment, PaymentError>;
        async fn claim_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>, PaymentError>;
        async fn list_events(&self, id: PaymentId) -> Result<Vec<PaymentEvent>, PaymentError>;
    }
}

mock! {
    pub BlockchainTxRepositoryImpl {}

    #[async_trait]
    impl BlockchainTxRepository for BlockchainTxRepositoryImpl {
        async fn insert_if_new(&self, tx: BlockchainTransaction) -> Result<Option<BlockchainTransaction>, IngestError>;
        async fn find_by_id(&self, id: Uuid) -> Result<Option<BlockchainTransaction>, IngestError>;
        async fn find_by_hash(&self, chain: Chain, tx_hash: &TxHash) -> Result<Option<BlockchainTransaction>, IngestError>;
        async fn mark_unmatched(&self, id: Uuid, reason: &str) -> Result<(), IngestError>;
        async fn update_confirmations(&self, id: Uuid, confirmations: i64) -> Result<(), IngestError>;
        async fn mark_finalized(&self, id: Uuid) -> Result<BlockchainTransaction, IngestError>;
        async fn list_unfinalized(&self, chain: Chain, limit: i64) -> Result<Vec<BlockchainTransaction>, IngestError>;
        async fn sum_finalized_base_units(&self, token: &TokenSymbol) -> Result<Decimal, IngestError>;
    }
}

mock! {
    pub QueueJobRepositoryImpl {}

    #[async_trait]
    impl QueueJobRepository for QueueJobRepositoryImpl {
        async fn enqueue(&self, job: NewQueueJob) -> Result<QueueJob, QueueError>;
        async fn claim(&self, queue: QueueName, limit: i64, visibility: Duration) -> Result<Vec<QueueJob>, QueueError>;
        async fn complete(&self, id: JobId) -> Result<(), QueueError>;
        async fn retry_later(&self, id: JobId, queue: QueueName, not_before: DateTime<Utc>, error: &str) -> Result<(), QueueError>;
        async fn mark_dead_letter(&self, id: JobId, error: &str) -> Result<(), QueueError>;
    }
}

mock! {
    pub ComplianceGatewayImpl {}

    #[async_trait]
    impl ComplianceGateway for ComplianceGatewayImpl {
        async fn screen_address(&self, chain: Chain, address: &WalletAddress) -> Result<ComplianceVerdict, ComplianceError>;
    }
}

mock! {
    pub StatusFanoutImpl {}

    #[async_trait]
    impl StatusFanout for StatusFanoutImpl {
        async fn publish(&self, update: &StatusUpdate) -> Result<(), FanoutError>;
        async fn subscribe(&self, payment_id: PaymentId) -> Result<tokio::sync::mpsc::Receiver<StatusUpdate>, FanoutError>;
    }
}

/// Factura de 2,300,000 VND por 100 USDT en Solana, ya PENDING.
fn pending_invoice() -> Payment {
    let mut payment = Payment::new(
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
    .unwrap();
    payment.status = PaymentStatus::PENDING;
    payment
}

fn finalized_transfer(payment: &Payment, base_units: u128) -> BlockchainTransaction {
    BlockchainTransaction {
        id: Uuid::new_v4(),
        chain: payment.chain,
        network: "mainnet".to_string(),
        tx_hash: TxHash::new("5VfYt1KkqpYvRkhZfHvbTqLdTVcRTPv1LatnTXBVK6VKzQrM"),
        from_address: WalletAddress::new("GDfnEsia2WLAW5t8yx2X5j2mkfA74i5kwGdDuZHt7XmG"),
        to_address: payment.wallet_address.clone(),
        token_mint: "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".to_string(),
        token_symbol: Some(payment.token.clone()),
        amount: TokenAmount::from_base_units(base_units, 6),
        memo: Some(payment.reference.as_str().to_string()),
        reference: Some(payment.reference.clone()),
        confirmations: 40,
        is_finalized: true,
        block_height: Some(250_000_000),
        payment_id: None,
        is_matched: false,
        matched_at: None,
        unmatched_reason: None,
        status: BlockchainTxStatus::FINALIZED,
        raw: Value::Null,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn engine_over(
    payment_repo: MockPaymentRepositoryImpl,
    compliance: MockComplianceGatewayImpl,
) -> Arc<PaymentEngine> {
    let mut fanout = MockStatusFanoutImpl::new();
    fanout.expect_publish().returning(|_| Ok(()));
    Arc::new(PaymentEngine::new(
        Arc::new(payment_repo),
        Arc::new(MockQueueJobRepositoryImpl::new()),
        Arc::new(compliance),
        Arc::new(fanout),
        EnginePolicy::default(),
    ))
}

fn clear_compliance() -> MockComplianceGatewayImpl {
    let mut compliance = MockComplianceGatewayImpl::new();
    compliance
        .expect_screen_address()
        .returning(|_, _| Ok(ComplianceVerdict::CLEAR));
    compliance
}

// Seed 1: camino feliz Solana USDT, de PENDING a COMPLETED con el
// asiento canónico (1% de comisión) y el webhook de completado.
#[tokio::test]
async fn test_happy_path_solana_usdt_posts_canonical_ledger_group() {
    // Arrange
    let payment = pending_invoice();
    let merchant_id = payment.merchant_id;
    let tx = finalized_transfer(&payment, 100_000_000);

    let mut lookup_repo = MockPaymentRepositoryImpl::new();
    let found = payment.clone();
    lookup_repo
        .expect_find_by_reference()
        .with(eq(Chain::Solana), eq(payment.reference.clone()))
        .times(1)
        .returning(move |_, _| Ok(Some(found.clone())));

    let mut engine_repo = MockPaymentRepositoryImpl::new();
    let bound = {
        let mut p = payment.clone();
        p.status = PaymentStatus::CONFIRMING;
        p.tx_hash = Some(tx.tx_hash.clone());
        p
    };
    let completed = {
        let mut p = bound.clone();
        p.status = PaymentStatus::COMPLETED;
        p.completed_at = Some(Utc::now());
        p
    };
    engine_repo
        .expect_bind_transaction()
        .withf(move |_, _, _, _, verdict, webhook| {
            *verdict == ComplianceVerdict::CLEAR
                && *webhook == Some(WebhookEventType::PaymentConfirming)
        })
        .times(1)
        .returning(move |_, _, _, _, _, _| Ok(bound.clone()));
    engine_repo
        .expect_complete_with_ledger()
        .withf(move |_, _, groups, note, webhook| {
            let legs = groups[0].legs();
            groups.len() == 1
                && note.is_none()
                && *webhook == Some(WebhookEventType::PaymentCompleted)
                && legs.contains(&PostingLeg::debit(
                    LedgerAccount::CryptoPool,
                    Decimal::from(100_000_000),
                    "USDT",
                ))
                && legs.contains(&PostingLeg::credit(
                    LedgerAccount::MerchantAvailable(merchant_id),
                    Decimal::from(2_277_000),
                    "VND",
                ))
                && legs.contains(&PostingLeg::credit(
                    LedgerAccount::FeeRevenue,
                    Decimal::from(23_000),
                    "VND",
                ))
        })
        .times(1)
        .returning(move |_, _, _, _, _| Ok(completed.clone()));

    let matcher = MatchTransactionUseCase::new(
        Arc::new(lookup_repo),
        Arc::new(MockBlockchainTxRepositoryImpl::new()),
        engine_over(engine_repo, clear_compliance()),
    );

    // Act
    let outcome = matcher.execute(tx).await.unwrap();

    // Assert
    assert_eq!(outcome, MatchOutcome::Engine(ObservationOutcome::Completed));
}

// Seed 2: expiración sin transacción observada; no existen asientos.
#[tokio::test]
async fn test_expiry_sweep_emits_expired_without_ledger() {
    // Arrange
    let mut expired = pending_invoice();
    expired.status = PaymentStatus::EXPIRED;

    let mut mock_repo = MockPaymentRepositoryImpl::new();
    let claimed = expired.clone();
    mock_repo
        .expect_claim_expired()
        .withf(|_, limit| *limit == 100)
        .times(1)
        .returning(move |_, _| Ok(vec![claimed.clone()]));
    mock_repo.expect_complete_with_ledger().times(0);

    let mut fanout = MockStatusFanoutImpl::new();
    fanout
        .expect_publish()
        .withf(|update| update.status == PaymentStatus::EXPIRED && update.tx_hash.is_none())
        .times(1)
        .returning(|_| Ok(()));

    let use_case = ExpirePaymentsUseCase::new(Arc::new(mock_repo), Arc::new(fanout), 100);

    // Act
    let count = use_case.execute(Utc::now()).await.unwrap();

    // Assert
    assert_eq!(count, 1);
}

// Seed 3: 50 USDT contra una factura de 100. La política por defecto es
// match exacto de una sola transacción: ambos pagos parciales quedan
// registrados como amount_low y el pago sigue PENDING.
#[tokio::test]
async fn test_partial_payments_never_complete_under_exact_match_policy() {
    // Arrange
    let payment = pending_invoice();
    let first_half = finalized_transfer(&payment, 50_000_000);
    let mut second_half = finalized_transfer(&payment, 50_000_000);
    second_half.id = Uuid::new_v4();
    second_half.tx_hash = TxHash::new("2jW8qzXoCqpMnR4vTk61DM2hVxDeplk9oFjzQYEVJpjq6nrM");

    let mut lookup_repo = MockPaymentRepositoryImpl::new();
    let found = payment.clone();
    lookup_repo
        .expect_find_by_reference()
        .times(2)
        .returning(move |_, _| Ok(Some(found.clone())));

    let mut btx_repo = MockBlockchainTxRepositoryImpl::new();
    btx_repo
        .expect_mark_unmatched()
        .with(always(), eq("amount_low"))
        .times(2)
        .returning(|_, _| Ok(()));

    let mut engine_repo = MockPaymentRepositoryImpl::new();
    engine_repo.expect_bind_transaction().times(0);
    engine_repo.expect_complete_with_ledger().times(0);

    let matcher = MatchTransactionUseCase::new(
        Arc::new(lookup_repo),
        Arc::new(btx_repo),
        engine_over(engine_repo, clear_compliance()),
    );

    // Act
    let first = matcher.execute(first_half).await.unwrap();
    let second = matcher.execute(second_half).await.unwrap();

    // Assert
    assert_eq!(first, MatchOutcome::AmountLow);
    assert_eq!(second, MatchOutcome::AmountLow);
}

// Seed 5: emisor sancionado. La transacción queda ligada al pago para
// auditoría pero jamás se postea un asiento.
#[tokio::test]
async fn test_sanctioned_sender_fails_payment_without_credit() {
    // Arrange
    let payment = pending_invoice();
    let tx = finalized_transfer(&payment, 100_000_000);

    let mut lookup_repo = MockPaymentRepositoryImpl::new();
    let found = payment.clone();
    lookup_repo
        .expect_find_by_reference()
        .returning(move |_, _| Ok(Some(found.clone())));

    let mut compliance = MockComplianceGatewayImpl::new();
    compliance
        .expect_screen_address()
        .with(eq(Chain::Solana), eq(tx.from_address.clone()))
        .times(1)
        .returning(|_, _| Ok(ComplianceVerdict::BLOCKED));

    let mut engine_repo = MockPaymentRepositoryImpl::new();
    let failed = {
        let mut p = payment.clone();
        p.status = PaymentStatus::FAILED;
        p.failure_reason = Some("COMPLIANCE_BLOCKED".to_string());
        p
    };
    engine_repo
        .expect_fail_compliance_blocked()
        .withf(|_, _, reason, webhook| {
            reason == "COMPLIANCE_BLOCKED" && *webhook == Some(WebhookEventType::PaymentFailed)
        })
        .times(1)
        .returning(move |_, _, _, _| Ok(failed.clone()));
    engine_repo.expect_complete_with_ledger().times(0);
    engine_repo.expect_bind_transaction().times(0);

    let matcher = MatchTransactionUseCase::new(
        Arc::new(lookup_repo),
        Arc::new(MockBlockchainTxRepositoryImpl::new()),
        engine_over(engine_repo, compliance),
    );

    // Act
    let outcome = matcher.execute(tx).await.unwrap();

    // Assert
    assert_eq!(outcome, MatchOutcome::Engine(ObservationOutcome::Blocked));
}

// Seed 6: un grupo desbalanceado jamás se construye; el diario y el
// estado del pago quedan intactos.
#[test]
fn test_unbalanced_group_is_rejected_before_any_posting() {
    let result = PostingGroup::new(
        LedgerGroupId::new(),
        vec![
            PostingLeg {
                account: LedgerAccount::CryptoPool,
                direction: EntryDirection::DEBIT,
                amount: Decimal::from(100),
                currency: "USDT".to_string(),
            },
            PostingLeg {
                account: LedgerAccount::EscrowLiability,
                direction: EntryDirection::CREDIT,
                amount: Decimal::from(99),
                currency: "USDT".to_string(),
            },
        ],
        None,
        None,
    );

    match result {
        Err(LedgerError::Unbalanced {
            currency,
            debits,
            credits,
        }) => {
            assert_eq!(currency, "USDT");
            assert_eq!(debits, Decimal::from(100));
            assert_eq!(credits, Decimal::from(99));
        }
        other => panic!("Expected Unbalanced, got {:?}", other.map(|_| ())),
    }
}
