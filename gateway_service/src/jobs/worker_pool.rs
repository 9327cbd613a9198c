use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::domain::entities::{QueueJob, QueueName};
use crate::domain::repository::QueueJobRepository;

/// Falla de un handler; el mensaje queda en `last_error` del trabajo.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JobFailure(pub String);

// Contrato de los handlers del pool.
//
// `Ok` elimina el trabajo; un error lo reprograma con el backoff del
// handler hasta agotar `max_attempts`, momento en el que pasa a
// dead-letter para inspección del operador.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn handle(&self, job: &QueueJob) -> Result<(), JobFailure>;

    /// Espera antes del reintento `attempt + 1`. Exponencial con tope de
    /// una hora salvo que el handler defina su propio calendario.
    fn backoff(&self, attempt: i32) -> Duration {
        let exp = attempt.clamp(0, 6) as u32;
        std::cmp::min(
            Duration::minutes(1) * 2_i32.pow(exp),
            Duration::hours(1),
        )
    }

    /// Cola destino de los reintentos (webhooks migran a su cola de
    /// reintento de menor prioridad).
    fn retry_queue(&self, original: QueueName) -> QueueName {
        original
    }
}

/// Pool de trabajadores respaldado por la cola en storage.
///
/// Recorre las colas en orden de prioridad y reparte los trabajos
/// reclamados entre hasta `concurrency` ejecuciones paralelas; el peso
/// de cada cola decide cuántos trabajos puede reclamar por pasada. Los
/// trabajos reclamados y no terminados reaparecen cuando vence su
/// timeout de visibilidad.
pub struct WorkerPool {
    queue_repo: Arc<dyn QueueJobRepository>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    concurrency: usize,
    visibility: Duration,
    poll_interval: StdDuration,
}

impl WorkerPool {
    pub fn new(
        queue_repo: Arc<dyn QueueJobRepository>,
        concurrency: usize,
        visibility: Duration,
        poll_interval: StdDuration,
    ) -> Self {
        Self {
            queue_repo,
            handlers: HashMap::new(),
            concurrency,
            visibility,
            poll_interval,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                "Worker pool started ({} workers, {} handlers)",
                self.concurrency,
                self.handlers.len()
            );

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {}
                }
                if *shutdown.borrow() {
                    break;
                }

                self.dispatch_round(&semaphore).await;
            }

            // Drain: wait for in-flight handlers before returning
            let _ = semaphore.acquire_many(self.concurrency as u32).await;
            info!("Worker pool drained");
        })
    }

    /// Una pasada de despacho: reclama por cola en orden de prioridad,
    /// con el peso de la cola como tamaño de lote.
    async fn dispatch_round(&self, semaphore: &Arc<Semaphore>) {
        let mut queues = QueueName::ALL;
        queues.sort_by_key(|q| std::cmp::Reverse(q.priority()));

        for queue in queues {
            let available = semaphore.available_permits();
            if available == 0 {
                return;
            }
            let batch = std::cmp::min(queue.priority() as usize, available) as i64;

            let jobs = match self.queue_repo.claim(queue, batch, self.visibility).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!("Failed to claim from {}: {}", queue.as_str(), e);
                    continue;
                }
            };

            for job in jobs {
                let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
                    return;
                };
                let pool = self.clone_refs();
                tokio::spawn(async move {
                    pool.run_job(job).await;
                    drop(permit);
                });
            }
        }
    }

    fn clone_refs(&self) -> WorkerPoolRefs {
        WorkerPoolRefs {
            queue_repo: Arc::clone(&self.queue_repo),
            handlers: self.handlers.clone(),
        }
    }
}

/// Referencias compartidas con las tareas de ejecución.
struct WorkerPoolRefs {
    queue_repo: Arc<dyn QueueJobRepository>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl WorkerPoolRefs {
    async fn run_job(&self, job: QueueJob) {
        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            warn!("No handler for job type {}, dead-lettering", job.job_type);
            let _ = self
                .queue_repo
                .mark_dead_letter(job.id, "no handler registered")
                .await;
            return;
        };

        match handler.handle(&job).await {
            Ok(()) => {
                if let Err(e) = self.queue_repo.complete(job.id).await {
                    error!("Failed to complete job {}: {}", job.id, e);
                }
            }
            Err(failure) => {
                if job.attempts_exhausted() {
                    warn!(
                        "Job {} ({}) exhausted {} attempts: {}",
                        job.id, job.job_type, job.max_attempts, failure
                    );
                    if let Err(e) = self
                        .queue_repo
                        .mark_dead_letter(job.id, &failure.to_string())
                        .await
                    {
                        error!("Failed to dead-letter job {}: {}", job.id, e);
                    }
                    return;
                }

                let not_before = Utc::now() + handler.backoff(job.attempt);
                let retry_queue = handler.retry_queue(job.queue);
                if let Err(e) = self
                    .queue_repo
                    .retry_later(job.id, retry_queue, not_before, &failure.to_string())
                    .await
                {
                    error!("Failed to reschedule job {}: {}", job.id, e);
                }
            }
        }
    }
}
