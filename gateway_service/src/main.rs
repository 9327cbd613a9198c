use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use bb8_redis::RedisConnectionManager;
use chrono::Duration;
use common::{Chain, TokenSymbol};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use gateway_service::{
    api::http_routes::{routes, AppState},
    config::{ChainConfig, Config},
    domain::{
        entities::QueueName,
        gateways::{BlockchainClient, ComplianceGateway, StatusFanout},
        repository::{Ledger, NewQueueJob, QueueJobRepository},
        types::WalletAddress,
    },
    infrastructure::{
        cache::{rate_limiter::SlidingWindowLimiter, status_fanout::RedisStatusFanout},
        gateways::{
            bsc::BscClient,
            compliance::{AllowAllComplianceGateway, HttpComplianceGateway},
            rate_source::FixedRateSource,
            settlement::FakeSettlementWallet,
            solana::SolanaClient,
            tron::TronClient,
            webhook_transport::ReqwestWebhookTransport,
        },
        ingestion::{
            parser::{BscParser, SolanaParser, TronParser},
            pipeline::{IngestorConfig, TxIngestor},
            ChainParser, TokenInfo, TokenRegistry,
        },
        persistence::{
            audit_repository::PostgresAuditLogRepository,
            blockchain_tx_repository::PostgresBlockchainTxRepository,
            cursor_repository::PostgresCursorRepository,
            ledger_repository::PostgresLedger,
            merchant_repository::PostgresMerchantRepository,
            payment_repository::PostgresPaymentRepository,
            payout_repository::PostgresPayoutRepository,
            queue_repository::PostgresQueueJobRepository,
            snapshot_repository::{
                PostgresReconciliationRepository, PostgresSnapshotRepository,
            },
        },
    },
    jobs::{
        alerts::{BalanceAlertHandler, ReconciliationAlertHandler},
        balance_monitor::{
            BalanceThresholds, MonitoredWallet, WalletBalanceMonitorJob, JOB_TYPE_BALANCE_CHECK,
        },
        compliance_recheck::ComplianceRecheckHandler,
        expiry::{ExpirySweeperJob, JOB_TYPE_EXPIRY_SWEEP},
        payout::PayoutCompletionHandler,
        reconciliation::{ReconciliationJob, JOB_TYPE_RECONCILIATION_RUN},
        webhook::WebhookDeliveryHandler,
        worker_pool::WorkerPool,
    },
    use_cases::{
        complete_payout::CompletePayoutUseCase,
        create_payment::{CreatePaymentUseCase, InvoicePolicy},
        expire_payments::ExpirePaymentsUseCase,
        get_payment::GetPaymentUseCase,
        match_transaction::MatchTransactionUseCase,
        payment_engine::{EnginePolicy, PaymentEngine},
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        gateway_service::api::http_routes::create_payment,
        gateway_service::api::http_routes::get_payment
    ),
    components(schemas(
        gateway_service::api::http_routes::CreatePaymentRequest,
        gateway_service::api::http_routes::CreatePaymentResponse,
        gateway_service::api::http_routes::MerchantBalanceResponse,
        gateway_service::api::http_routes::PublicStatusResponse,
        gateway_service::api::response::ApiResponse<serde_json::Value>
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar variables de entorno
    dotenv().ok();

    // 2. Configurar Logging/Tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Gateway Service...");

    // 3. Cargar configuración
    let config = Config::from_env()?;

    // 4. Conexión a base de datos + migraciones
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Connected to Database");

    // 5. Redis: limitador compartido + bus de estado
    let redis_manager = RedisConnectionManager::new(config.redis_url.as_str())
        .context("Invalid REDIS_URL")?;
    let redis_pool = bb8::Pool::builder()
        .max_size(10)
        .build(redis_manager)
        .await
        .context("Failed to connect to Redis")?;
    let limiter = Arc::new(SlidingWindowLimiter::new(redis_pool));
    let fanout: Arc<dyn StatusFanout> = Arc::new(
        RedisStatusFanout::connect(&config.redis_url)
            .await
            .map_err(|e| anyhow::anyhow!("Status bus: {}", e))?,
    );
    info!("Connected to Redis");

    // 6. Instanciar repositorios (Infraestructura)
    let payment_repo = Arc::new(PostgresPaymentRepository::new(
        pool.clone(),
        config.webhook_max_attempts,
    ));
    let blockchain_tx_repo = Arc::new(PostgresBlockchainTxRepository::new(pool.clone()));
    let ledger: Arc<dyn Ledger> = Arc::new(PostgresLedger::new(pool.clone()));
    let queue_repo = Arc::new(PostgresQueueJobRepository::new(pool.clone()));
    let merchant_repo = Arc::new(PostgresMerchantRepository::new(pool.clone()));
    let snapshot_repo = Arc::new(PostgresSnapshotRepository::new(pool.clone()));
    let reconciliation_repo = Arc::new(PostgresReconciliationRepository::new(pool.clone()));
    let cursor_repo = Arc::new(PostgresCursorRepository::new(pool.clone()));
    let payout_repo = Arc::new(PostgresPayoutRepository::new(pool.clone()));
    let audit_repo = Arc::new(PostgresAuditLogRepository::new(pool.clone()));

    // 7. Gateways externos
    let compliance: Arc<dyn ComplianceGateway> =
        match (&config.compliance_api_url, &config.compliance_api_key) {
            (Some(url), Some(key)) => {
                Arc::new(HttpComplianceGateway::new(url.clone(), key.clone()))
            }
            _ => {
                warn!("Compliance screening not configured, allowing all senders");
                Arc::new(AllowAllComplianceGateway::new())
            }
        };
    let rate_source = Arc::new(FixedRateSource::new(config.fixed_rates.clone()));

    // 8. Motor de pagos y casos de uso
    let engine = Arc::new(PaymentEngine::new(
        payment_repo.clone(),
        queue_repo.clone(),
        compliance,
        fanout.clone(),
        EnginePolicy {
            fee_bps: config.fee_bps,
            overpayment_tolerance_bps: config.overpayment_tolerance_bps,
            credit_pending_first: config.credit_pending_first,
            compliance_recheck_delay: Duration::minutes(10),
            compliance_recheck_attempts: 12,
        },
    ));
    let matcher = Arc::new(MatchTransactionUseCase::new(
        payment_repo.clone(),
        blockchain_tx_repo.clone(),
        engine.clone(),
    ));

    let invoice_chain_config = config
        .chain(config.invoice_chain)
        .context("INVOICE_CHAIN is not among the configured chains")?;
    let invoice_token_config = invoice_chain_config
        .tokens
        .iter()
        .find(|t| t.symbol == config.invoice_token)
        .with_context(|| {
            format!(
                "INVOICE_TOKEN {} not whitelisted on {}",
                config.invoice_token, config.invoice_chain
            )
        })?;

    let create_payment_use_case = CreatePaymentUseCase::new(
        payment_repo.clone(),
        rate_source,
        engine.clone(),
        InvoicePolicy {
            chain: config.invoice_chain,
            token: TokenSymbol::new(&config.invoice_token)
                .map_err(|e| anyhow::anyhow!("INVOICE_TOKEN: {}", e))?,
            token_decimals: invoice_token_config.decimals,
            wallet_address: WalletAddress::new(invoice_chain_config.wallet_address.clone()),
            ttl: Duration::minutes(config.payment_expiry_minutes),
        },
    );
    let get_payment_use_case = GetPaymentUseCase::new(payment_repo.clone());
    let expire_use_case = Arc::new(ExpirePaymentsUseCase::new(
        payment_repo.clone(),
        fanout.clone(),
        100,
    ));

    // 9. Lista blanca de tokens
    let mut registry = TokenRegistry::new();
    for chain_config in &config.chains {
        for token in &chain_config.tokens {
            registry.register(
                chain_config.chain,
                token.contract.clone(),
                TokenInfo {
                    symbol: TokenSymbol::new(&token.symbol)
                        .map_err(|e| anyhow::anyhow!("Token whitelist: {}", e))?,
                    decimals: token.decimals,
                },
            );
        }
    }
    let registry = Arc::new(registry);

    // 10. Canal de apagado compartido por todos los procesos de fondo
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut join_handles: Vec<JoinHandle<()>> = Vec::new();

    // 11. Ingestores por cadena (WS + poller + consumidor + finalidad)
    let mut clients: HashMap<Chain, Arc<dyn BlockchainClient>> = HashMap::new();
    for chain_config in &config.chains {
        let client = build_client(&config, chain_config);
        clients.insert(chain_config.chain, client.clone());

        let parser: Arc<dyn ChainParser> = match chain_config.chain {
            Chain::Solana => Arc::new(SolanaParser::new(config.solana_wallet_is_token_account)),
            Chain::Bsc => Arc::new(BscParser::new()),
            Chain::Tron => Arc::new(TronParser::new()),
        };

        let ingestor = Arc::new(TxIngestor::new(
            client,
            parser,
            registry.clone(),
            blockchain_tx_repo.clone(),
            cursor_repo.clone(),
            matcher.clone(),
            IngestorConfig {
                network: chain_config.network.clone(),
                wallet: WalletAddress::new(chain_config.wallet_address.clone()),
                poll_interval: StdDuration::from_secs(chain_config.poll_interval_secs),
                finality_poll_interval: StdDuration::from_secs(10),
                memo_policy: config.memo_policy,
                dedup_ttl: StdDuration::from_secs(300),
                dedup_capacity: 10_000,
            },
        ));
        join_handles.extend(ingestor.spawn(shutdown_rx.clone()));
        info!("Ingestor started for {}", chain_config.chain);
    }

    // 12. Pool de trabajadores con sus handlers
    let monitored_wallets: Vec<MonitoredWallet> = config
        .chains
        .iter()
        .map(|chain_config| MonitoredWallet {
            client: clients[&chain_config.chain].clone(),
            address: WalletAddress::new(chain_config.wallet_address.clone()),
            token_contracts: chain_config
                .tokens
                .iter()
                .map(|t| (t.symbol.clone(), t.contract.clone()))
                .collect(),
            thresholds: BalanceThresholds {
                min_native: chain_config.min_native_balance,
                max_native: chain_config.max_native_balance,
            },
        })
        .collect();
    let reconciliation_tokens: Vec<TokenSymbol> = {
        let mut symbols: Vec<String> = config
            .chains
            .iter()
            .flat_map(|c| c.tokens.iter().map(|t| t.symbol.clone()))
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
            .into_iter()
            .filter_map(|s| TokenSymbol::new(&s).ok())
            .collect()
    };

    let mut worker_pool = WorkerPool::new(
        queue_repo.clone(),
        10,
        Duration::minutes(5),
        StdDuration::from_secs(1),
    );
    worker_pool.register(Arc::new(WebhookDeliveryHandler::new(
        merchant_repo.clone(),
        Arc::new(ReqwestWebhookTransport::new()),
    )));
    worker_pool.register(Arc::new(ComplianceRecheckHandler::new(
        blockchain_tx_repo.clone(),
        matcher.clone(),
    )));
    worker_pool.register(Arc::new(ExpirySweeperJob::new(expire_use_case)));
    worker_pool.register(Arc::new(WalletBalanceMonitorJob::new(
        monitored_wallets,
        snapshot_repo,
        queue_repo.clone(),
    )));
    worker_pool.register(Arc::new(ReconciliationJob::new(
        reconciliation_tokens,
        blockchain_tx_repo.clone(),
        ledger.clone(),
        reconciliation_repo,
        queue_repo.clone(),
    )));
    worker_pool.register(Arc::new(BalanceAlertHandler));
    worker_pool.register(Arc::new(ReconciliationAlertHandler));
    worker_pool.register(Arc::new(PayoutCompletionHandler::new(Arc::new(
        CompletePayoutUseCase::new(payout_repo, Arc::new(FakeSettlementWallet::new())),
    ))));
    join_handles.push(Arc::new(worker_pool).spawn(shutdown_rx.clone()));

    // 13. Schedulers: encolan los ticks periódicos en sus colas
    join_handles.push(spawn_scheduler(
        shutdown_rx.clone(),
        StdDuration::from_secs(60),
        queue_repo.clone(),
        QueueName::PERIODIC,
        JOB_TYPE_EXPIRY_SWEEP,
    ));
    join_handles.push(spawn_scheduler(
        shutdown_rx.clone(),
        StdDuration::from_secs(600),
        queue_repo.clone(),
        QueueName::MONITORING,
        JOB_TYPE_BALANCE_CHECK,
    ));
    join_handles.push(spawn_scheduler(
        shutdown_rx.clone(),
        StdDuration::from_secs(86_400),
        queue_repo.clone(),
        QueueName::REPORTS,
        JOB_TYPE_RECONCILIATION_RUN,
    ));

    // 14. Estado de la app y rutas
    let app_state = Arc::new(AppState {
        create_payment_use_case,
        get_payment_use_case,
        engine,
        merchant_repo,
        ledger,
        audit: audit_repo,
        fanout,
        limiter,
        ip_rate_limit_per_minute: config.ip_rate_limit_per_minute,
        key_rate_limit_per_minute: config.rate_limit_per_minute,
        db_pool: pool.clone(),
    });

    let app = routes(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = format!("{}:{}", config.host, config.port);
    info!("Listening on {}", addr);

    // 15. Servir con apagado de tres fases: dejar de aceptar, drenar,
    // cerrar conexiones
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    // Fase 2: señal a productores/consumidores/workers y drenado con plazo
    let _ = shutdown_tx.send(true);
    let drain = async {
        for handle in join_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(StdDuration::from_secs(30), drain)
        .await
        .is_err()
    {
        warn!("Drain deadline reached, closing remaining connections");
    }

    // Fase 3: cierre de recursos compartidos
    pool.close().await;
    info!("Gateway shutdown complete");
    Ok(())
}

fn build_client(config: &Config, chain_config: &ChainConfig) -> Arc<dyn BlockchainClient> {
    match chain_config.chain {
        Chain::Solana => Arc::new(SolanaClient::new(
            chain_config.rpc_url.clone(),
            chain_config.ws_url.clone().unwrap_or_default(),
            chain_config.finality_threshold,
        )),
        Chain::Bsc => Arc::new(BscClient::new(
            chain_config.rpc_url.clone(),
            chain_config.ws_url.clone().unwrap_or_default(),
            chain_config.finality_threshold,
        )),
        Chain::Tron => Arc::new(TronClient::new(
            chain_config.rpc_url.clone(),
            config.tron_api_key.clone(),
            chain_config.finality_threshold,
        )),
    }
}

/// Scheduler periódico: encola un tick en la cola indicada y deja que
/// el pool lo despache con su prioridad. Respeta la señal de apagado.
fn spawn_scheduler(
    mut shutdown: watch::Receiver<bool>,
    period: StdDuration,
    queue_repo: Arc<dyn QueueJobRepository>,
    queue: QueueName,
    job_type: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    let tick = NewQueueJob {
                        queue,
                        job_type: job_type.to_string(),
                        payload: serde_json::json!({}),
                        max_attempts: 1,
                        not_before: chrono::Utc::now(),
                    };
                    if let Err(e) = queue_repo.enqueue(tick).await {
                        tracing::error!("Failed to enqueue {} tick: {}", job_type, e);
                    }
                }
            }
        }
    })
}
