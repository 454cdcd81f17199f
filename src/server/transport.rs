//! Server transport core.
//!
//! Connection tasks hand every decoded request to [`TransportCore::accept`],
//! which queues it as a [`PendingCall`] with a private one-shot reply slot and
//! suspends until the engine answers. The engine drains the queue with
//! [`TransportCore::next_pending_call`] and answers each call exactly once
//! through [`PendingCall::respond`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::envelope::{Request, Response};

use super::ServerError;

/// One accepted request awaiting its single response.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    request: Request,
    accepted_at: Instant,
    reply: oneshot::Sender<Response>,
}

impl PendingCall {
    /// Monotonic call id, unique within one core.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the request the caller sent.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// When the core accepted the call.
    #[must_use]
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// Instant at which a held pull must be answered, from the request's
    /// own `timeout_secs`.
    #[must_use]
    pub fn pull_deadline(&self) -> Instant {
        self.accepted_at + Duration::from_secs(self.request.timeout_secs)
    }

    /// Whether the caller has gone away.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Deposits the response. Consumes the call, so the slot is written at
    /// most once. Returns `false` if the caller is no longer waiting.
    pub fn respond(self, response: Response) -> bool {
        tracing::info!(
            call_id = self.id,
            client = %self.request.client,
            kind = %self.request.kind(),
            result_code = response.result_code,
            result_str = %response.result_str,
            "Answered call"
        );
        let delivered = self.reply.send(response).is_ok();
        if !delivered {
            tracing::debug!(call_id = self.id, "Caller went away before the response");
        }
        delivered
    }
}

/// Outcome of one wait in the engine's drain loop.
#[derive(Debug)]
pub enum NextCall {
    /// A call is ready for processing.
    Call(PendingCall),
    /// The wait elapsed with no arrival.
    Timeout,
    /// The abort signal fired.
    Aborted,
}

/// Rendezvous between connection tasks and the engine.
#[derive(Debug)]
pub struct TransportCore {
    queue_tx: mpsc::Sender<PendingCall>,
    queue_rx: Mutex<mpsc::Receiver<PendingCall>>,
    next_id: AtomicU64,
}

impl TransportCore {
    /// Creates a core whose inbound queue holds `queue_capacity` calls.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a core sized by `server.queue_capacity`.
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.server.queue_capacity)
    }

    /// Queues `request` and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::QueueClosed`] if the core was closed, and
    /// [`ServerError::ReplyDropped`] if the call was discarded unanswered.
    pub async fn accept(&self, request: Request) -> Result<Response, ServerError> {
        let (reply, slot) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            call_id = id,
            client = %request.client,
            kind = %request.kind(),
            "Queueing call"
        );

        let call = PendingCall {
            id,
            request,
            accepted_at: Instant::now(),
            reply,
        };
        self.queue_tx
            .send(call)
            .await
            .map_err(|_| ServerError::QueueClosed)?;

        slot.await.map_err(|_| ServerError::ReplyDropped { call_id: id })
    }

    /// Waits for the next call, `timeout`, or `abort`, whichever comes first.
    ///
    /// Abort wins when it is ready at the same time as either of the others.
    pub async fn next_pending_call(&self, timeout: Duration, abort: &CancellationToken) -> NextCall {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        let mut queue = tokio::select! {
            biased;

            () = abort.cancelled() => return NextCall::Aborted,
            guard = self.queue_rx.lock() => guard,
            () = &mut sleep => return NextCall::Timeout,
        };

        tokio::select! {
            biased;

            () = abort.cancelled() => NextCall::Aborted,
            call = queue.recv() => match call {
                Some(call) => NextCall::Call(call),
                None => NextCall::Aborted,
            },
            () = &mut sleep => NextCall::Timeout,
        }
    }

    /// Stops accepting calls and returns everything still queued so the
    /// caller can answer it.
    pub async fn close(&self) -> Vec<PendingCall> {
        let mut queue = self.queue_rx.lock().await;
        queue.close();

        let mut remaining = Vec::new();
        while let Ok(call) = queue.try_recv() {
            remaining.push(call);
        }
        if !remaining.is_empty() {
            tracing::debug!(count = remaining.len(), "Drained queued calls on close");
        }
        remaining
    }
}
