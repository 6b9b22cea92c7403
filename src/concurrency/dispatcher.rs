//! Task dispatcher (spec.md §4.2, §5).
//!
//! Three execution domains: the caller's thread (where futures are created), a bounded
//! pool of reader tasks, and a single FIFO writer thread. Reads are dispatched through the
//! connection pool's own `deadpool-sync` worker threads (bounded by the pool's size, which
//! doubles as "the reader thread pool" of spec.md §5); writes run one at a time on a
//! dedicated thread holding its own connection, so no two writer tasks ever overlap
//! regardless of how the pool is sized.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Weak};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::vtab::array;
use tokio::sync::{oneshot, Semaphore};

use crate::concurrency::pool::Pool;
use crate::error::Error;
use crate::notifier::NotifierDrain;

type WriteJob = Box<dyn FnOnce(&Connection) + Send>;

/// Submits read tasks to a bounded blocking pool and serializes write tasks through a
/// single writer thread.
pub struct Dispatcher {
    pool: Pool,
    write_sender: Option<std::sync::mpsc::Sender<WriteJob>>,
    writer_handle: Option<std::thread::JoinHandle<()>>,
    reader_semaphore: Arc<Semaphore>,
}

fn open_writer_connection(database_path: &std::path::Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(database_path)?;
    array::load_module(&conn)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

impl Dispatcher {
    /// Spawns the writer thread (with its own connection opened against
    /// `database_path`) and wires the reader semaphore from `reader_concurrency`.
    pub fn new(
        pool: Pool,
        database_path: PathBuf,
        notifier_drain: NotifierDrain,
        reader_concurrency: NonZeroUsize,
    ) -> Result<Self, Error> {
        let (write_sender, write_receiver) = std::sync::mpsc::channel::<WriteJob>();

        let writer_handle = std::thread::Builder::new()
            .name("quillstore-writer".to_string())
            .spawn(move || {
                let conn = match open_writer_connection(&database_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!(error = %err, "writer thread failed to open its connection");
                        return;
                    },
                };
                tracing::info!("writer thread started");
                loop {
                    match write_receiver.recv_timeout(Duration::from_millis(200)) {
                        Ok(job) => {
                            job(&conn);
                            notifier_drain.drain_available();
                        },
                        Err(RecvTimeoutError::Timeout) => {
                            notifier_drain.drain_available();
                        },
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::info!("writer thread shutting down");
            })
            .map_err(|err| Error::DatabaseRequestError(format!("failed to spawn writer thread: {err}")))?;

        Ok(Self {
            pool,
            write_sender: Some(write_sender),
            writer_handle: Some(writer_handle),
            reader_semaphore: Arc::new(Semaphore::new(reader_concurrency.get())),
        })
    }

    /// Submits a write closure. `weak` is derived from the submitting handler's liveness
    /// token (spec.md §5 "Lifetime": handlers hold a weak back-reference to themselves); if
    /// the handler has been dropped by the time the writer thread picks this job up, the
    /// future fails with [`Error::HandlerDestroyed`] without the closure ever touching the
    /// database.
    pub async fn submit_write<F, R>(&self, weak: Weak<()>, f: F) -> Result<R, Error>
    where
        F: FnOnce(&Connection) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: WriteJob = Box::new(move |conn| {
            let result = if weak.upgrade().is_some() { f(conn) } else { Err(Error::HandlerDestroyed) };
            let _ = tx.send(result);
        });

        self.write_sender
            .as_ref()
            .ok_or(Error::HandlerDestroyed)?
            .send(job)
            .map_err(|_| Error::HandlerDestroyed)?;

        rx.await?
    }

    /// Submits a read closure onto the bounded reader pool.
    pub async fn submit_read<F, R>(&self, weak: Weak<()>, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Connection) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let _permit = self
            .reader_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::HandlerDestroyed)?;

        let object = self.pool.get().await.map_err(|err| Error::DatabaseRequestError(err.to_string()))?;
        object
            .interact(move |conn| if weak.upgrade().is_some() { f(conn) } else { Err(Error::HandlerDestroyed) })
            .await
            .map_err(|err| Error::DatabaseRequestError(err.to_string()))?
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Dropping the sender first closes the channel so the writer thread's `recv_timeout`
        // observes `Disconnected` and exits; joining before dropping the sender would
        // deadlock the writer thread against itself.
        self.write_sender.take();
        if let Some(handle) = self.writer_handle.take() {
            if handle.join().is_err() {
                tracing::error!("writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::pool::build_pool;
    use crate::notifier::Notifier;

    fn test_dispatcher() -> Dispatcher {
        let pool = build_pool(PathBuf::from(":memory:")).unwrap();
        let (_notifier, drain) = Notifier::new();
        Dispatcher::new(pool, PathBuf::from(":memory:"), drain, NonZeroUsize::new(2).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dispatcher = test_dispatcher();
        let alive = Arc::new(());

        dispatcher
            .submit_write(Arc::downgrade(&alive), |conn| {
                conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
                conn.execute("INSERT INTO t VALUES (42)", [])?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn destroyed_handler_fails_future_without_running_closure() {
        let dispatcher = Arc::new(test_dispatcher());
        let (unblock_tx, unblock_rx) = std::sync::mpsc::channel::<()>();

        let blocker = Arc::new(());
        let blocking_handle = {
            let dispatcher = dispatcher.clone();
            let weak = Arc::downgrade(&blocker);
            tokio::spawn(async move {
                dispatcher
                    .submit_write(weak, move |_conn| {
                        let _ = unblock_rx.recv();
                        Ok(())
                    })
                    .await
            })
        };
        // Give the writer thread time to dequeue the blocking job before we enqueue
        // the one whose handler we're about to drop.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let victim = Arc::new(());
        let weak = Arc::downgrade(&victim);
        drop(victim);

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_clone = ran.clone();
        let cancelled_handle = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .submit_write(weak, move |_conn| {
                        ran_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };

        unblock_tx.send(()).unwrap();
        blocking_handle.await.unwrap().unwrap();
        let result: Result<(), Error> = cancelled_handle.await.unwrap();

        assert!(matches!(result, Err(Error::HandlerDestroyed)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
