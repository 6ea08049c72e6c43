//! Delivery of wallet events to the host application.
//!
//! Events from the data provider and the sync manager are published to a
//! [`NotificationBridge`], which forwards them to at most one registered
//! [`WalletObserver`]. Delivery happens on a single worker thread owned by a
//! [`SerialQueue`], so the observer sees events one at a time and in the order they
//! were published.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Sender};
use spvkit_protocol::TxId;
use tracing::{debug, warn};

use crate::{
    data_api::{BalanceInfo, BlockInfo, TransactionInfo},
    locks,
    sync::KitState,
};

/// A change in wallet state that observers are told about.
#[derive(Clone, Debug, PartialEq)]
pub enum WalletEvent {
    TransactionsUpdated {
        inserted: Vec<TransactionInfo>,
        updated: Vec<TransactionInfo>,
    },
    TransactionsDeleted(Vec<TxId>),
    BalanceUpdated(BalanceInfo),
    LastBlockInfoUpdated(BlockInfo),
    KitStateUpdated(KitState),
}

impl WalletEvent {
    fn name(&self) -> &'static str {
        match self {
            WalletEvent::TransactionsUpdated { .. } => "transactions updated",
            WalletEvent::TransactionsDeleted(_) => "transactions deleted",
            WalletEvent::BalanceUpdated(_) => "balance updated",
            WalletEvent::LastBlockInfoUpdated(_) => "last block updated",
            WalletEvent::KitStateUpdated(_) => "kit state updated",
        }
    }
}

/// Where components publish their [`WalletEvent`]s.
pub type EventSink = Arc<dyn Fn(WalletEvent) + Send + Sync>;

/// Receives wallet events. Every method defaults to doing nothing.
///
/// Methods are called on the notification thread. They must not call the blocking
/// operations of [`crate::BitcoinCore`], such as `send`. Starting and stopping sync
/// from here is allowed.
pub trait WalletObserver: Send + Sync {
    fn transactions_updated(&self, inserted: &[TransactionInfo], updated: &[TransactionInfo]) {
        let _ = (inserted, updated);
    }

    fn transactions_deleted(&self, txids: &[TxId]) {
        let _ = txids;
    }

    fn balance_updated(&self, balance: &BalanceInfo) {
        let _ = balance;
    }

    fn last_block_info_updated(&self, block: &BlockInfo) {
        let _ = block;
    }

    fn kit_state_updated(&self, state: &KitState) {
        let _ = state;
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Counts the jobs waiting in a [`SerialQueue`].
#[derive(Default)]
struct Slots {
    queued: Mutex<usize>,
    freed: Condvar,
}

impl Slots {
    fn release(&self) {
        *locks::lock(&self.queued) -= 1;
        self.freed.notify_one();
    }
}

/// A named worker thread that runs jobs one at a time, in submission order.
///
/// Submission blocks while the queue holds `capacity` pending jobs, except from a job
/// running on the worker itself: the worker never waits for its own queue to drain.
/// Dropping the queue runs the jobs already submitted and joins the worker.
pub struct SerialQueue {
    sender: Option<Sender<Job>>,
    slots: Arc<Slots>,
    capacity: usize,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl SerialQueue {
    pub fn new(name: &str, capacity: usize) -> io::Result<Self> {
        if capacity == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "queue capacity must be at least 1",
            ));
        }
        let (sender, receiver) = unbounded::<Job>();
        let slots = Arc::new(Slots::default());
        let worker_slots = slots.clone();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                for job in receiver {
                    worker_slots.release();
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("A notification handler panicked");
                    }
                }
            })?;
        Ok(SerialQueue {
            sender: Some(sender),
            slots,
            capacity,
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Submits a job. Returns `false` if the queue has shut down.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        {
            let mut queued = locks::lock(&self.slots.queued);
            if !self.on_worker() {
                while *queued >= self.capacity {
                    queued = self
                        .slots
                        .freed
                        .wait(queued)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            *queued += 1;
        }
        sender.send(Box::new(job)).is_ok()
    }

    /// Blocks until every job submitted before this call has run.
    ///
    /// Returns immediately when called from a job, which could otherwise never finish.
    pub fn flush(&self) {
        if self.on_worker() {
            return;
        }
        let (done, wait) = bounded(1);
        if self.dispatch(move || {
            let _ = done.send(());
        }) {
            let _ = wait.recv();
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            // The last reference may be released by a job; the worker cannot join itself.
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("worker", &self.worker_id)
            .finish()
    }
}

#[derive(Default)]
struct Pending {
    events: VecDeque<WalletEvent>,
    draining: bool,
}

/// Hands events to an [`EventSink`] in the order they were pushed, without holding the
/// pushing thread's locks while the sink blocks.
///
/// Components push events while holding the lock that orders their state changes,
/// release it, then call [`Self::drain`]. One thread drains at a time; a thread that
/// finds another one draining leaves its events to it.
pub struct EventOutbox {
    sink: EventSink,
    pending: Mutex<Pending>,
}

impl EventOutbox {
    pub fn new(sink: EventSink) -> Self {
        EventOutbox {
            sink,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub fn push(&self, event: WalletEvent) {
        locks::lock(&self.pending).events.push_back(event);
    }

    pub fn drain(&self) {
        {
            let mut pending = locks::lock(&self.pending);
            if pending.draining {
                return;
            }
            pending.draining = true;
        }
        loop {
            let event = {
                let mut pending = locks::lock(&self.pending);
                match pending.events.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.draining = false;
                        return;
                    }
                }
            };
            (self.sink)(event);
        }
    }
}

type ObserverSlot = RwLock<Option<(u64, Arc<dyn WalletObserver>)>>;

/// Keeps an observer registered until dropped.
#[must_use = "the observer is unregistered when the subscription is dropped"]
pub struct Subscription {
    slot: Weak<ObserverSlot>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            let mut current = locks::write(&slot);
            if matches!(&*current, Some((id, _)) if *id == self.id) {
                *current = None;
                debug!("Wallet observer {} unsubscribed", self.id);
            }
        }
    }
}

/// Forwards published events to the registered [`WalletObserver`] on a [`SerialQueue`].
///
/// Events published while no observer is registered are dropped immediately, and the
/// observer is looked up again at delivery time, so events queued before an observer
/// unsubscribed are dropped as well.
pub struct NotificationBridge {
    queue: Arc<SerialQueue>,
    observer: Arc<ObserverSlot>,
    next_id: AtomicU64,
}

impl NotificationBridge {
    pub fn new(queue: Arc<SerialQueue>) -> Self {
        NotificationBridge {
            queue,
            observer: Arc::new(RwLock::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<SerialQueue> {
        &self.queue
    }

    /// Registers `observer`, replacing any previously registered one.
    pub fn subscribe(&self, observer: Arc<dyn WalletObserver>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *locks::write(&self.observer) = Some((id, observer));
        debug!("Wallet observer {} subscribed", id);
        Subscription {
            slot: Arc::downgrade(&self.observer),
            id,
        }
    }

    pub fn publish(&self, event: WalletEvent) {
        if locks::read(&self.observer).is_none() {
            debug!("No wallet observer; dropping {} event", event.name());
            return;
        }

        let slot = self.observer.clone();
        self.queue.dispatch(move || {
            let observer = locks::read(&slot).as_ref().map(|(_, o)| o.clone());
            if let Some(observer) = observer {
                deliver(observer.as_ref(), &event);
            }
        });
    }

    /// An [`EventSink`] publishing to this bridge.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let bridge = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(bridge) = bridge.upgrade() {
                bridge.publish(event);
            }
        })
    }
}

fn deliver(observer: &dyn WalletObserver, event: &WalletEvent) {
    match event {
        WalletEvent::TransactionsUpdated { inserted, updated } => {
            observer.transactions_updated(inserted, updated)
        }
        WalletEvent::TransactionsDeleted(txids) => observer.transactions_deleted(txids),
        WalletEvent::BalanceUpdated(balance) => observer.balance_updated(balance),
        WalletEvent::LastBlockInfoUpdated(block) => observer.last_block_info_updated(block),
        WalletEvent::KitStateUpdated(state) => observer.kit_state_updated(state),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use spvkit_protocol::{value::Satoshis, TxId};

    use super::{EventOutbox, EventSink, NotificationBridge, SerialQueue, WalletEvent};
    use crate::{data_api::BalanceInfo, sync::KitState, testing::RecordingObserver};

    fn bridge() -> Arc<NotificationBridge> {
        Arc::new(NotificationBridge::new(Arc::new(
            SerialQueue::new("test-notifications", 16).unwrap(),
        )))
    }

    fn balance(v: u64) -> WalletEvent {
        WalletEvent::BalanceUpdated(BalanceInfo {
            spendable: Satoshis::const_from_u64(v),
            ..Default::default()
        })
    }

    #[test]
    fn jobs_run_in_order() {
        let queue = SerialQueue::new("test-queue", 4).unwrap();
        let seen = Arc::new(Mutex::new(vec![]));
        for i in 0..100 {
            let seen = seen.clone();
            assert!(queue.dispatch(move || seen.lock().unwrap().push(i)));
        }
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(SerialQueue::new("test-queue", 0).is_err());
    }

    #[test]
    fn jobs_may_dispatch_past_capacity() {
        let queue = Arc::new(SerialQueue::new("test-queue", 1).unwrap());
        let seen = Arc::new(Mutex::new(vec![]));
        let (inner_queue, inner_seen) = (queue.clone(), seen.clone());
        queue.dispatch(move || {
            for i in 0..10 {
                let seen = inner_seen.clone();
                assert!(inner_queue.dispatch(move || seen.lock().unwrap().push(i)));
            }
        });
        queue.flush();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn outbox_keeps_push_order_across_reentrant_drains() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let outbox: Arc<Mutex<Option<Arc<EventOutbox>>>> = Arc::new(Mutex::new(None));
        let reentry = outbox.clone();
        let sink: EventSink = Arc::new(move |event| {
            // Pushing from inside the sink must not reorder or lose events.
            if event == balance(1) {
                if let Some(outbox) = reentry.lock().unwrap().clone() {
                    outbox.push(balance(3));
                    outbox.drain();
                }
            }
            let _ = tx.send(event);
        });
        let shared = Arc::new(EventOutbox::new(sink));
        *outbox.lock().unwrap() = Some(shared.clone());

        shared.push(balance(1));
        shared.push(balance(2));
        shared.drain();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![balance(1), balance(2), balance(3)]
        );
        *outbox.lock().unwrap() = None;
    }

    #[test]
    fn events_reach_the_observer_in_order() {
        let bridge = bridge();
        let (observer, events) = RecordingObserver::new();
        let _subscription = bridge.subscribe(Arc::new(observer));

        let sink = bridge.sink();
        sink(balance(1));
        sink(WalletEvent::TransactionsDeleted(vec![TxId::from_bytes([1; 32])]));
        sink(WalletEvent::KitStateUpdated(KitState::Synced));
        bridge.queue().flush();

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                balance(1),
                WalletEvent::TransactionsDeleted(vec![TxId::from_bytes([1; 32])]),
                WalletEvent::KitStateUpdated(KitState::Synced),
            ]
        );
    }

    #[test]
    fn dropped_subscription_discards_queued_events() {
        let bridge = bridge();
        let (observer, events) = RecordingObserver::new();
        let subscription = bridge.subscribe(Arc::new(observer));

        // Hold the worker so that the next event is still queued when unsubscribing.
        let (release, wait) = crossbeam_channel::bounded::<()>(0);
        bridge.queue().dispatch(move || {
            let _ = wait.recv_timeout(Duration::from_secs(5));
        });
        bridge.publish(balance(1));
        drop(subscription);
        release.send(()).unwrap();

        // Published with no observer: never queued.
        for i in 0..1_000 {
            bridge.publish(balance(i));
        }
        bridge.queue().flush();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn newer_subscription_survives_older_drop() {
        let bridge = bridge();
        let (first, _first_events) = RecordingObserver::new();
        let (second, second_events) = RecordingObserver::new();
        let old = bridge.subscribe(Arc::new(first));
        let _new = bridge.subscribe(Arc::new(second));
        drop(old);

        bridge.publish(balance(7));
        bridge.queue().flush();
        assert_eq!(second_events.try_recv().ok(), Some(balance(7)));
    }
}
