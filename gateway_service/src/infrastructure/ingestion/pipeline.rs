use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Chain, MemoPolicy};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{BlockchainTransaction, BlockchainTxStatus};
use crate::domain::error::IngestError;
use crate::domain::gateways::BlockchainClient;
use crate::domain::repository::{BlockchainTxRepository, CursorRepository};
use crate::domain::types::{TxHash, WalletAddress};
use crate::infrastructure::ingestion::dedup::DedupCache;
use crate::infrastructure::ingestion::{ChainParser, ParsedTransfer, TokenRegistry};
use crate::use_cases::match_transaction::MatchTransactionUseCase;

/// Backoff inicial de reconexión del productor WebSocket.
const WS_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
/// Tope del backoff de reconexión.
const WS_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Identificadores de productor para los cursores persistidos.
const PRODUCER_POLLER: &str = "poller";

/// Configuración por cadena del ingestor.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub network: String,
    pub wallet: WalletAddress,
    pub poll_interval: Duration,
    pub finality_poll_interval: Duration,
    pub memo_policy: MemoPolicy,
    pub dedup_ttl: Duration,
    pub dedup_capacity: usize,
}

/// Ingestor de transacciones por cadena.
///
/// Dos productores independientes (WebSocket + poller) alimentan un
/// consumidor único deduplicado por un set en memoria con TTL; la
/// resolución, el parseo y la persistencia ocurren en el consumidor. Un
/// refrescador de finalidad promueve las filas confirmadas y reinvoca al
/// matcher al alcanzar el umbral de la cadena.
pub struct TxIngestor {
    chain: Chain,
    client: Arc<dyn BlockchainClient>,
    parser: Arc<dyn ChainParser>,
    registry: Arc<TokenRegistry>,
    blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
    cursor_repo: Arc<dyn CursorRepository>,
    matcher: Arc<MatchTransactionUseCase>,
    config: IngestorConfig,
    dedup: DedupCache,
}

impl TxIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn BlockchainClient>,
        parser: Arc<dyn ChainParser>,
        registry: Arc<TokenRegistry>,
        blockchain_tx_repo: Arc<dyn BlockchainTxRepository>,
        cursor_repo: Arc<dyn CursorRepository>,
        matcher: Arc<MatchTransactionUseCase>,
        config: IngestorConfig,
    ) -> Self {
        let chain = client.chain();
        let dedup = DedupCache::new(config.dedup_ttl, config.dedup_capacity);
        Self {
            chain,
            client,
            parser,
            registry,
            blockchain_tx_repo,
            cursor_repo,
            matcher,
            config,
            dedup,
        }
    }

    /// Lanza productores, consumidor y refrescador como tareas de fondo.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let (hash_tx, hash_rx) = mpsc::channel::<String>(1024);
        let mut handles = Vec::new();

        let ws = Arc::clone(&self);
        let ws_shutdown = shutdown.clone();
        let ws_sender = hash_tx.clone();
        handles.push(tokio::spawn(async move {
            ws.run_ws_producer(ws_shutdown, ws_sender).await;
        }));

        let poller = Arc::clone(&self);
        let poll_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            poller.run_poll_producer(poll_shutdown, hash_tx).await;
        }));

        let consumer = Arc::clone(&self);
        let consumer_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            consumer.run_consumer(consumer_shutdown, hash_rx).await;
        }));

        let refresher = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            refresher.run_finality_refresher(shutdown).await;
        }));

        handles
    }

    async fn run_ws_producer(
        &self,
        mut shutdown: watch::Receiver<bool>,
        sender: mpsc::Sender<String>,
    ) {
        let mut backoff = WS_BACKOFF_INITIAL;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match self.client.subscribe(&self.config.wallet).await {
                Ok(mut stream) => {
                    info!("{} WS producer subscribed", self.chain);
                    backoff = WS_BACKOFF_INITIAL;

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    return;
                                }
                            }
                            item = stream.next() => match item {
                                Some(Ok(hash)) => {
                                    if sender.send(hash).await.is_err() {
                                        return;
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!("{} WS producer error: {}", self.chain, e);
                                    break;
                                }
                                None => {
                                    warn!("{} WS stream closed", self.chain);
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(IngestError::SubscriptionUnsupported(chain)) => {
                    info!("{} has no subscription feed, polling only", chain);
                    return;
                }
                Err(e) => {
                    warn!("{} WS subscribe failed: {}", self.chain, e);
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(WS_BACKOFF_MAX);
        }
    }

    async fn run_poll_producer(
        &self,
        mut shutdown: watch::Receiver<bool>,
        sender: mpsc::Sender<String>,
    ) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                return;
            }

            let cursor = match self.cursor_repo.get(self.chain, PRODUCER_POLLER).await {
                Ok(cursor) => cursor,
                Err(e) => {
                    error!("{} poller cursor read failed: {}", self.chain, e);
                    continue;
                }
            };

            let page = match self
                .client
                .recent_transfers(&self.config.wallet, cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("{} poll failed: {}", self.chain, e);
                    continue;
                }
            };

            let mut delivered = true;
            for hash in page.tx_hashes {
                if sender.send(hash).await.is_err() {
                    delivered = false;
                    break;
                }
            }
            if !delivered {
                return;
            }

            // Commit only after the whole batch entered the channel
            if let Some(next) = page.next_cursor {
                if Some(&next) != cursor.as_ref() {
                    if let Err(e) = self
                        .cursor_repo
                        .commit(self.chain, PRODUCER_POLLER, &next)
                        .await
                    {
                        error!("{} poller cursor commit failed: {}", self.chain, e);
                    }
                }
            }
        }
    }

    async fn run_consumer(
        &self,
        mut shutdown: watch::Receiver<bool>,
        mut receiver: mpsc::Receiver<String>,
    ) {
        loop {
            let hash = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                hash = receiver.recv() => match hash {
                    Some(hash) => hash,
                    None => return,
                }
            };

            if !self.dedup.insert(&hash) {
                debug!("{} duplicate suppressed: {}", self.chain, hash);
                continue;
            }

            if let Err(e) = self.ingest_one(&hash).await {
                warn!("{} failed to ingest {}: {}", self.chain, hash, e);
            }
        }
    }

    async fn ingest_one(&self, hash: &str) -> Result<(), IngestError> {
        let raw = self.client.get_transaction(hash).await?;
        let Some(parsed) = self.parser.parse(hash, &raw, &self.config.wallet)? else {
            debug!("{} tx {} is not an inbound transfer", self.chain, hash);
            return Ok(());
        };

        let finality = self.client.get_finality(hash).await?;
        let tx = self.build_transaction(parsed, raw, finality.confirmations as i64);

        let Some(inserted) = self.blockchain_tx_repo.insert_if_new(tx).await? else {
            // Both producers observed it; the constraint absorbed the copy
            debug!("{} tx {} already recorded", self.chain, hash);
            return Ok(());
        };

        if inserted.reference.is_some() {
            if let Err(e) = self.matcher.execute(inserted).await {
                warn!("{} match attempt failed for {}: {}", self.chain, hash, e);
            }
        }
        Ok(())
    }

    /// Normaliza hacia la fila persistida: lista blanca y política de
    /// memo deciden si habrá intento de matching.
    fn build_transaction(
        &self,
        parsed: ParsedTransfer,
        raw: serde_json::Value,
        confirmations: i64,
    ) -> BlockchainTransaction {
        let whitelisted = self.registry.lookup(self.chain, &parsed.token_mint);

        let (token_symbol, decimals) = match whitelisted {
            Some(info) => (Some(info.symbol.clone()), info.decimals),
            None => (None, parsed.decimals),
        };

        // Dust/spam filter: unlisted mints are recorded but never matched
        let reference = if token_symbol.is_some() {
            parsed
                .memo
                .as_deref()
                .and_then(|memo| self.config.memo_policy.extract(memo))
        } else {
            None
        };

        let now = Utc::now();
        BlockchainTransaction {
            id: Uuid::new_v4(),
            chain: self.chain,
            network: self.config.network.clone(),
            tx_hash: TxHash::new(parsed.tx_hash),
            from_address: WalletAddress::new(parsed.from_address),
            to_address: WalletAddress::new(parsed.to_address),
            token_mint: parsed.token_mint,
            token_symbol,
            amount: common::TokenAmount::from_base_units(parsed.amount_base_units, decimals),
            memo: parsed.memo,
            reference,
            confirmations,
            is_finalized: false,
            block_height: parsed.block_height,
            payment_id: None,
            is_matched: false,
            matched_at: None,
            unmatched_reason: None,
            status: BlockchainTxStatus::CONFIRMED,
            raw,
            created_at: now,
            updated_at: now,
        }
    }

    async fn run_finality_refresher(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.finality_poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                return;
            }

            let pending = match self.blockchain_tx_repo.list_unfinalized(self.chain, 100).await {
                Ok(pending) => pending,
                Err(e) => {
                    error!("{} unfinalized scan failed: {}", self.chain, e);
                    continue;
                }
            };

            for tx in pending {
                let finality = match self.client.get_finality(tx.tx_hash.as_str()).await {
                    Ok(finality) => finality,
                    Err(e) => {
                        warn!("{} finality check failed for {}: {}", self.chain, tx.tx_hash, e);
                        continue;
                    }
                };

                if !finality.finalized {
                    if finality.confirmations as i64 != tx.confirmations {
                        if let Err(e) = self
                            .blockchain_tx_repo
                            .update_confirmations(tx.id, finality.confirmations as i64)
                            .await
                        {
                            error!("{} confirmations update failed: {}", self.chain, e);
                        }
                    }
                    continue;
                }

                let finalized = match self.blockchain_tx_repo.mark_finalized(tx.id).await {
                    Ok(finalized) => finalized,
                    Err(e) => {
                        error!("{} finalize failed for {}: {}", self.chain, tx.tx_hash, e);
                        continue;
                    }
                };
                info!("{} tx {} finalized", self.chain, finalized.tx_hash);

                if finalized.reference.is_some() {
                    if let Err(e) = self.matcher.execute(finalized).await {
                        warn!("{} finalized match failed: {}", self.chain, e);
                    }
                }
            }
        }
    }
}
