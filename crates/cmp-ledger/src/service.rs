//! Single-writer ledger service.
//!
//! All appends funnel through one blocking task that owns the write path.
//! Callers submit commands over a bounded queue and await a `oneshot` reply.
//! Reads bypass the queue and run on the blocking pool directly.

use std::sync::Arc;

use cmp_types::{LedgerEntry, NewEntry, Payload};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::{AuditReport, Auditor};
use crate::error::LedgerError;
use crate::traits::{LedgerReader, LedgerWriter};

enum Command {
    Append {
        entry: NewEntry,
        reply: oneshot::Sender<Result<LedgerEntry, LedgerError>>,
    },
    Shutdown,
}

/// Owns the writer task. Dropping the service without calling
/// [`LedgerService::shutdown`] lets the task run until every handle is gone.
pub struct LedgerService<L> {
    handle: LedgerHandle<L>,
    worker: JoinHandle<()>,
}

impl<L> LedgerService<L>
where
    L: LedgerWriter + LedgerReader + 'static,
{
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(ledger: Arc<L>, queue_capacity: usize) -> Self {
        let (commands, receiver) = mpsc::channel(queue_capacity.max(1));
        let writer = Arc::clone(&ledger);
        let worker = tokio::task::spawn_blocking(move || run_writer(writer.as_ref(), receiver));
        info!(queue_capacity, "ledger service started");

        Self {
            handle: LedgerHandle { commands, ledger },
            worker,
        }
    }

    pub fn handle(&self) -> LedgerHandle<L> {
        self.handle.clone()
    }

    /// Stop accepting appends, commit everything already queued, and join
    /// the writer task.
    pub async fn shutdown(self) -> Result<(), LedgerError> {
        // The worker may already be gone if every sender was dropped.
        let _ = self.handle.commands.send(Command::Shutdown).await;
        drop(self.handle);
        self.worker
            .await
            .map_err(|e| LedgerError::Storage(format!("ledger writer task failed: {e}")))?;
        info!("ledger service stopped");
        Ok(())
    }
}

fn run_writer<L: LedgerWriter + ?Sized>(ledger: &L, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Append { entry, reply } => {
                let result = ledger.append_entry(entry);
                if let Err(result) = reply.send(result) {
                    debug!(committed = result.is_ok(), "append caller went away before reply");
                }
            }
            // Later sends fail; anything already buffered is still drained.
            Command::Shutdown => commands.close(),
        }
    }
}

/// Cloneable async front-end to a [`LedgerService`].
pub struct LedgerHandle<L> {
    commands: mpsc::Sender<Command>,
    ledger: Arc<L>,
}

impl<L> Clone for LedgerHandle<L> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<L> LedgerHandle<L>
where
    L: LedgerWriter + LedgerReader + 'static,
{
    /// Validate and append an entry.
    ///
    /// Once queued, the append runs to completion even if this future is
    /// dropped.
    pub async fn append(
        &self,
        actor: &str,
        action: &str,
        data: Option<Payload>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_entry(NewEntry::new(actor, action, data)?).await
    }

    pub async fn append_entry(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Append { entry, reply })
            .await
            .map_err(|_| LedgerError::ServiceStopped)?;
        response.await.map_err(|_| LedgerError::ServiceStopped)?
    }

    pub async fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.blocking(|ledger| ledger.read_all_in_order()).await
    }

    pub async fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.blocking(move |ledger| ledger.read_recent(n)).await
    }

    pub async fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
        self.blocking(move |ledger| ledger.get(id)).await
    }

    pub async fn count(&self) -> Result<u64, LedgerError> {
        self.blocking(|ledger| ledger.count()).await
    }

    /// Audit the whole chain in batches of `batch_size`.
    pub async fn verify(&self, batch_size: usize) -> Result<AuditReport, LedgerError> {
        self.blocking(move |ledger| Auditor::audit(ledger, batch_size))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&L) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || f(ledger.as_ref()))
            .await
            .map_err(|e| LedgerError::Storage(format!("ledger read task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use cmp_crypto::ChainStatus;
    use cmp_types::ValidationError;

    use super::*;
    use crate::memory::InMemoryLedger;
    use crate::sqlite::SqliteLedger;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_serialized() {
        let service = LedgerService::spawn(Arc::new(InMemoryLedger::new()), 8);
        let handle = service.handle();

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .append("AI:Accountant", "post", Some(Payload::new().with("n", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap().id));
        }
        assert_eq!(ids.len(), 50);

        let report = handle.verify(7).await.unwrap();
        assert_eq!(report.status, ChainStatus::Intact { verified: 50 });

        let entries = handle.read_all_in_order().await.unwrap();
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_queue() {
        let service = LedgerService::spawn(Arc::new(InMemoryLedger::new()), 1);
        let handle = service.handle();

        let err = handle.append("AI:Director", " ", None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::Empty { field: "action" })
        );
        assert_eq!(handle.count().await.unwrap(), 0);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_append() {
        let ledger = Arc::new(InMemoryLedger::new());
        let service = LedgerService::spawn(Arc::clone(&ledger), 4);
        let handle = service.handle();

        // The command is queued on first poll; the reply is never awaited.
        let _ = tokio::time::timeout(
            Duration::ZERO,
            handle.append("AI:Controller", "close-period", None),
        )
        .await;

        service.shutdown().await.unwrap();
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_then_rejects() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let service = LedgerService::spawn(Arc::clone(&ledger), 16);
        let handle = service.handle();

        let first = handle.append("Human:alice", "approve", None).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(handle.read_recent(5).await.unwrap(), vec![first.clone()]);
        assert_eq!(handle.get(1).await.unwrap(), Some(first));

        service.shutdown().await.unwrap();
        assert_eq!(
            handle.append("Human:alice", "approve", None).await,
            Err(LedgerError::ServiceStopped)
        );
        // Reads still work against the store itself.
        assert_eq!(handle.count().await.unwrap(), 1);
    }
}
