//! Queue between the webhook route and the ledger.
//!
//! The route pushes raw payloads with [`Dispatcher::submit`] and answers the
//! sender straight away. A fixed pool of workers pops events off the shared
//! queue, so each event is handled by exactly one worker, and runs them
//! through [`DonationProcessor`]: event type check, donor fields, currency
//! conversion, ledger append. Failures stop at the processor, get logged and
//! go to the dead-letter file when one is configured.
use crate::config::DispatcherConfig;
use crate::currency::{ExchangeRateError, ExchangeRates, round_amount};
use crate::ledger::{DonationRecord, Ledger, LedgerError};
use crate::routes::tiltify::{DonationError, TiltifyDonation, TiltifyEventType};
use crate::routes::webhook::TiltifyWebhookRequest;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, debug, error, info, span, trace};

pub mod dead_letter;

use dead_letter::DeadLetter;

/// A webhook body as received, before any validation.
#[derive(Clone, Debug, PartialEq)]
pub struct DonationEvent(Value);

impl From<Value> for DonationEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl DonationEvent {
    pub fn id(&self) -> Option<&str> {
        self.0.pointer("/meta/id").and_then(Value::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.pointer("/meta/event_type").and_then(Value::as_str)
    }

    pub fn payload(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Donation dispatcher is shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Malformed donation payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Donation(#[from] DonationError),
    #[error("Currency conversion failed: {0}")]
    Conversion(#[from] ExchangeRateError),
    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingEventType,
    UnrecognizedEventType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Recorded(DonationRecord),
    Ignored(IgnoreReason),
}

/// Producer side of the pending queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DonationEvent>,
}

/// Consumer side of the pending queue, shared by the workers.
#[derive(Clone)]
pub struct PendingQueue {
    rx: Arc<Mutex<mpsc::Receiver<DonationEvent>>>,
}

impl PendingQueue {
    /// Next event in arrival order, or `None` once every producer is gone
    /// and the queue is drained.
    pub async fn pop(&self) -> Option<DonationEvent> {
        self.rx.lock().await.recv().await
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Waits for every worker to drain the queue and stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                error!("Donation worker failed: {e}");
            }
        }
    }
}

impl Dispatcher {
    pub fn channel(capacity: usize) -> (Self, PendingQueue) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self { tx },
            PendingQueue {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }

    pub fn start(
        config: &DispatcherConfig,
        processor: Arc<DonationProcessor>,
    ) -> (Self, WorkerPool) {
        let (dispatcher, queue) = Self::channel(config.queue_capacity);
        let workers = (0..config.workers)
            .map(|worker| tokio::spawn(run_worker(worker, queue.clone(), processor.clone())))
            .collect();
        info!("Started {} donation workers", config.workers);
        (dispatcher, WorkerPool { workers })
    }

    /// Queues `event` for processing. Waits only for queue space, never for
    /// the event to be processed.
    pub async fn submit(&self, event: DonationEvent) -> Result<(), DispatchError> {
        self.tx.send(event).await.map_err(|_| DispatchError::Closed)?;
        trace!("Donation event queued");
        Ok(())
    }
}

async fn run_worker(worker: usize, queue: PendingQueue, processor: Arc<DonationProcessor>) {
    let span = span!(Level::INFO, "donation_worker", worker);
    async move {
        debug!("Worker started");
        while let Some(event) = queue.pop().await {
            let processor = processor.clone();
            // a panicking ledger or converter only loses this one event
            let task = async move { processor.handle(event).await }.in_current_span();
            if let Err(e) = tokio::spawn(task).await {
                error!("Donation processing task failed: {e}");
            }
        }
        debug!("Queue closed, worker stopping");
    }
    .instrument(span)
    .await
}

pub struct DonationProcessor {
    rates: Arc<dyn ExchangeRates>,
    ledger: Arc<dyn Ledger>,
    reference: String,
    dead_letter: Option<DeadLetter>,
}

impl DonationProcessor {
    pub fn new(
        rates: Arc<dyn ExchangeRates>,
        ledger: Arc<dyn Ledger>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            rates,
            ledger,
            reference: reference.into(),
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, dead_letter: DeadLetter) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    #[tracing::instrument(skip_all, fields(event_id = ?event.id()))]
    pub async fn process(&self, event: &DonationEvent) -> Result<Outcome, ProcessError> {
        let Some(event_type) = event.event_type() else {
            return Ok(Outcome::Ignored(IgnoreReason::MissingEventType));
        };
        if let TiltifyEventType::Other(other) = TiltifyEventType::from(event_type) {
            return Ok(Outcome::Ignored(IgnoreReason::UnrecognizedEventType(other)));
        }

        let request: TiltifyWebhookRequest = serde_json::from_value(event.payload().clone())?;
        let donation = TiltifyDonation::try_from(request)?;
        let converted = self
            .rates
            .convert(
                donation.amount.value,
                &donation.amount.currency,
                &self.reference,
            )
            .await?;
        let record = DonationRecord {
            amount: round_amount(converted),
            name: donation.name,
            comment: donation.message,
        };
        debug!(
            "Converted donation {:?}: {} {} to {} {}",
            donation.id,
            donation.amount.value,
            donation.amount.currency,
            record.amount,
            self.reference
        );

        self.ledger.record_donation(record.clone()).await?;
        Ok(Outcome::Recorded(record))
    }

    /// Processes one event; failures are logged and dead-lettered here.
    pub async fn handle(&self, event: DonationEvent) {
        match self.process(&event).await {
            Ok(Outcome::Recorded(record)) => {
                info!(
                    event_id = ?event.id(),
                    "Donation of {} {} recorded", record.amount, self.reference
                );
            }
            Ok(Outcome::Ignored(reason)) => {
                debug!(event_id = ?event.id(), "Ignoring webhook event: {reason:?}");
            }
            Err(e) => {
                error!(event_id = ?event.id(), "Dropping donation: {e}");
                if let Some(dead_letter) = &self.dead_letter {
                    if let Err(io) = dead_letter.record(&event, &e).await {
                        error!("Failed to write dead letter: {io}");
                    }
                }
            }
        }
    }
}
