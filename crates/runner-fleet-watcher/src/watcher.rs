// crates/runner-fleet-watcher/src/watcher.rs
// ============================================================================
// Module: Runner Fleet Watcher
// Description: Producer/consumer registry with bounded, lossy fan-out.
// Purpose: Deliver committed change events without ever blocking writers.
// Dependencies: runner-fleet-core, tokio, tracing
// ============================================================================

//! ## Overview
//! [`Watcher`] is a cloneable handle over a shared registry. Producers and
//! consumers are registered under unique ids. [`Producer::notify`] walks the
//! registry under its lock and hands the event to each accepting consumer
//! with `try_send`, so per-producer order is preserved and a slow consumer
//! only loses its own events.
//!
//! ## Invariants
//! - `notify` never blocks on a consumer and never fails because of one.
//! - Closed consumers are pruned on the next notify.
//! - Once the watcher is closed, every producer and consumer reports closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use runner_fleet_core::ChangeEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::warn;

use crate::filters::ChangeFilter;
use crate::filters::accepts;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default per-consumer mailbox capacity.
pub const DEFAULT_CONSUMER_CAPACITY: usize = 256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Watcher registration and delivery errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatcherError {
    /// A producer with this id is already registered.
    #[error("producer already registered: {0}")]
    DuplicateProducer(String),
    /// A consumer with this id is already registered.
    #[error("consumer already registered: {0}")]
    DuplicateConsumer(String),
    /// The producer was closed.
    #[error("producer closed: {0}")]
    ProducerClosed(String),
    /// The watcher was closed.
    #[error("watcher closed")]
    WatcherClosed,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registered consumer mailbox.
struct ConsumerSlot {
    /// Sending half of the consumer mailbox.
    sender: mpsc::Sender<ChangeEvent>,
    /// Filters that must all accept an event.
    filters: Vec<ChangeFilter>,
    /// Closed flag shared with the consumer handle.
    closed: Arc<AtomicBool>,
}

/// Shared producer and consumer tables.
#[derive(Default)]
struct Registry {
    /// True once the watcher was closed.
    closed: bool,
    /// Producer closed flags keyed by id.
    producers: HashMap<String, Arc<AtomicBool>>,
    /// Consumer mailboxes keyed by id.
    consumers: HashMap<String, ConsumerSlot>,
}

/// Shared registry state.
struct Shared {
    /// Registry tables.
    registry: Mutex<Registry>,
    /// Mailbox capacity for new consumers.
    consumer_capacity: usize,
}

impl Shared {
    /// Locks the registry, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// SECTION: Watcher
// ============================================================================

/// Cloneable handle to one change bus.
#[derive(Clone)]
pub struct Watcher {
    /// Registry shared by all clones, producers, and consumers.
    shared: Arc<Shared>,
}

impl Watcher {
    /// Creates a watcher with [`DEFAULT_CONSUMER_CAPACITY`] mailboxes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONSUMER_CAPACITY)
    }

    /// Creates a watcher whose consumers buffer up to `capacity` events.
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                consumer_capacity: capacity.max(1),
            }),
        }
    }

    /// Registers a producer.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::DuplicateProducer`] when `id` is taken and
    /// [`WatcherError::WatcherClosed`] after [`Watcher::close`].
    pub fn register_producer(&self, id: impl Into<String>) -> Result<Producer, WatcherError> {
        let id = id.into();
        let mut registry = self.shared.lock();
        if registry.closed {
            return Err(WatcherError::WatcherClosed);
        }
        if registry.producers.contains_key(&id) {
            return Err(WatcherError::DuplicateProducer(id));
        }
        let closed = Arc::new(AtomicBool::new(false));
        registry.producers.insert(id.clone(), Arc::clone(&closed));
        drop(registry);
        debug!(producer = %id, "registered change producer");
        Ok(Producer {
            id,
            shared: Arc::clone(&self.shared),
            closed,
        })
    }

    /// Registers a consumer that receives events accepted by all `filters`.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::DuplicateConsumer`] when `id` is taken and
    /// [`WatcherError::WatcherClosed`] after [`Watcher::close`].
    pub fn register_consumer(
        &self,
        id: impl Into<String>,
        filters: Vec<ChangeFilter>,
    ) -> Result<Consumer, WatcherError> {
        let id = id.into();
        let mut registry = self.shared.lock();
        if registry.closed {
            return Err(WatcherError::WatcherClosed);
        }
        if registry.consumers.contains_key(&id) {
            return Err(WatcherError::DuplicateConsumer(id));
        }
        let (sender, receiver) = mpsc::channel(self.shared.consumer_capacity);
        let closed = Arc::new(AtomicBool::new(false));
        registry.consumers.insert(
            id.clone(),
            ConsumerSlot {
                sender,
                filters,
                closed: Arc::clone(&closed),
            },
        );
        drop(registry);
        debug!(consumer = %id, "registered change consumer");
        Ok(Consumer {
            id,
            receiver,
            shared: Arc::clone(&self.shared),
            closed,
        })
    }

    /// Closes the watcher, every producer, and every consumer mailbox.
    /// Events already buffered in a mailbox stay readable.
    pub fn close(&self) {
        let mut registry = self.shared.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        for closed in registry.producers.values() {
            closed.store(true, Ordering::Release);
        }
        for slot in registry.consumers.values() {
            slot.closed.store(true, Ordering::Release);
        }
        registry.producers.clear();
        registry.consumers.clear();
        drop(registry);
        debug!("change watcher closed");
    }

    /// Returns true once [`Watcher::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns the number of open consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.shared.lock().consumers.len()
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("consumer_capacity", &self.shared.consumer_capacity)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Producer
// ============================================================================

/// Publishing handle for one writer.
pub struct Producer {
    /// Producer id.
    id: String,
    /// Registry the producer publishes into.
    shared: Arc<Shared>,
    /// Closed flag shared with the registry.
    closed: Arc<AtomicBool>,
}

impl Producer {
    /// Returns the producer id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publishes an event to every accepting consumer.
    ///
    /// Full mailboxes drop the event; closed consumers are removed.
    ///
    /// # Errors
    ///
    /// Returns [`WatcherError::ProducerClosed`] after [`Producer::close`] and
    /// [`WatcherError::WatcherClosed`] after [`Watcher::close`].
    pub fn notify(&self, event: ChangeEvent) -> Result<(), WatcherError> {
        if self.closed.load(Ordering::Acquire) {
            let registry_closed = self.shared.lock().closed;
            if registry_closed {
                return Err(WatcherError::WatcherClosed);
            }
            return Err(WatcherError::ProducerClosed(self.id.clone()));
        }
        let mut registry = self.shared.lock();
        if registry.closed {
            return Err(WatcherError::WatcherClosed);
        }
        let mut stale = Vec::new();
        for (consumer_id, slot) in &registry.consumers {
            if slot.closed.load(Ordering::Acquire) {
                stale.push(consumer_id.clone());
                continue;
            }
            if !accepts(&slot.filters, &event) {
                continue;
            }
            match slot.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        producer = %self.id,
                        consumer = %consumer_id,
                        entity_type = %event.entity_type,
                        operation = %event.operation,
                        "consumer mailbox full; change event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => stale.push(consumer_id.clone()),
            }
        }
        for consumer_id in stale {
            registry.consumers.remove(&consumer_id);
            debug!(consumer = %consumer_id, "pruned closed change consumer");
        }
        Ok(())
    }

    /// Unregisters the producer; later notifications fail.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut registry = self.shared.lock();
        registry.producers.remove(&self.id);
    }

    /// Returns true once the producer or its watcher was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Consumer
// ============================================================================

/// Receiving handle for one subscriber.
pub struct Consumer {
    /// Consumer id.
    id: String,
    /// Receiving half of the mailbox.
    receiver: mpsc::Receiver<ChangeEvent>,
    /// Registry the consumer is registered in.
    shared: Arc<Shared>,
    /// Closed flag shared with the registry.
    closed: Arc<AtomicBool>,
}

impl Consumer {
    /// Returns the consumer id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next event; `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Blocks the current thread for the next event; `None` once closed and
    /// drained. Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.blocking_recv()
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Unregisters the consumer. Buffered events stay readable.
    pub fn close(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut registry = self.shared.lock();
            registry.consumers.remove(&self.id);
            drop(registry);
            debug!(consumer = %self.id, "closed change consumer");
        }
        self.receiver.close();
    }

    /// Returns true once the consumer or its watcher was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
