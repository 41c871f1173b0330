//! Subscription service that merges pull and push sources.
//!
//! Lifecycle: `subscribe` registers callbacks, `poll` and `connect` start
//! background workers, `disconnect` stops every worker. Readings that
//! arrive after teardown (a fetch already in flight, a frame already read)
//! are discarded, never delivered.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PushConnector, PushStream, ReadingSource};
use crate::models::SensorReading;

// ---

type Callback = Arc<dyn Fn(&SensorReading) + Send + Sync>;
type Subscribers = Arc<Mutex<HashMap<SubscriptionId, Callback>>>;

/// Handle returned by [`SensorFeed::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerKind {
    Poll,
    Push,
}

struct Worker {
    kind: WorkerKind,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self) {
        self.active.store(false, Ordering::SeqCst);
        self.handle.abort();
    }
}

/// Fan-out shared by one worker; goes inert once the worker is stopped.
#[derive(Clone)]
struct Dispatch {
    subscribers: Subscribers,
    active: Arc<AtomicBool>,
}

impl Dispatch {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns `false` once the worker has been stopped.
    fn deliver(&self, reading: &SensorReading) -> bool {
        // ---
        if !self.is_active() {
            debug!("Discarding reading {} after teardown", reading.identity());
            return false;
        }

        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            callback(reading);
        }
        true
    }
}

/// Fans readings from any number of sources out to registered callbacks.
///
/// Each source runs as its own tokio task. Every task carries an `active`
/// flag cleared by [`SensorFeed::disconnect`], so a reading produced after
/// teardown is dropped instead of delivered. Dropping the feed disconnects
/// it.
///
/// # Example
/// ```ignore
/// let feed = SensorFeed::new(Duration::from_secs(3));
/// feed.subscribe(move |reading| { monitor.apply(reading.clone()); });
/// feed.poll(client, Duration::from_secs(5));
/// ```
pub struct SensorFeed {
    subscribers: Subscribers,
    workers: Mutex<Vec<Worker>>,
    reconnect_delay: Duration,
}

impl SensorFeed {
    // ---
    /// Create an idle feed with no subscribers and no workers.
    ///
    /// # Arguments
    /// * `reconnect_delay` - Wait between push sessions after one closes or
    ///   fails to open
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
            reconnect_delay,
        }
    }

    /// Register `callback` for every reading delivered from now on.
    ///
    /// Callbacks run on the worker task that produced the reading, outside
    /// the subscriber lock, so they may subscribe or unsubscribe others.
    ///
    /// # Type Parameters
    /// * `F` - Callback invoked with each reading; must be `Send + Sync`
    ///   since any worker may call it
    ///
    /// # Returns
    /// A freshly minted [`SubscriptionId`] for [`SensorFeed::unsubscribe`].
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SensorReading) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        debug!("Subscriber {} registered", id);
        id
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!("Subscriber {} removed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn worker_count(&self) -> usize {
        self.lock_workers().len()
    }

    /// Start polling `source` every `period`.
    ///
    /// The first fetch happens immediately. A failed fetch is logged and
    /// skipped; subscribers keep whatever they last received. Ticks missed
    /// behind a slow fetch are delayed rather than bunched up.
    ///
    /// # Type Parameters
    /// * `S` - Any [`ReadingSource`]; [`super::BackendClient`] in production
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn poll<S: ReadingSource>(&self, source: S, period: Duration) {
        // ---
        let dispatch = self.dispatch();
        let active = dispatch.active.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match source.fetch().await {
                    Ok(reading) => {
                        if !dispatch.deliver(&reading) {
                            return;
                        }
                    }
                    Err(e) => warn!("Fetch failed, keeping last known values: {:#}", e),
                }
            }
        });

        info!("Polling started every {:?}", period);
        self.lock_workers().push(Worker {
            kind: WorkerKind::Poll,
            active,
            handle,
        });
    }

    /// Start the push stream. Ignored when one is already running.
    ///
    /// The worker opens a session with `connector`, delivers every update
    /// it yields, and after a close or error waits the reconnect delay and
    /// opens a new one, until [`SensorFeed::disconnect`].
    ///
    /// # Type Parameters
    /// * `C` - Any [`PushConnector`]; [`super::SocketIoConnector`] in
    ///   production
    ///
    /// # Panics
    /// Must be called from within a tokio runtime.
    pub fn connect<C: PushConnector>(&self, connector: C) {
        // ---
        let mut workers = self.lock_workers();
        if workers.iter().any(|w| w.kind == WorkerKind::Push) {
            warn!("Push stream already connected");
            return;
        }

        let dispatch = self.dispatch();
        let active = dispatch.active.clone();
        let reconnect_delay = self.reconnect_delay;

        let handle = tokio::spawn(async move {
            loop {
                match connector.connect().await {
                    Ok(mut stream) => {
                        info!("Push stream connected");
                        loop {
                            match stream.next_update().await {
                                Ok(Some(reading)) => {
                                    if !dispatch.deliver(&reading) {
                                        return;
                                    }
                                }
                                Ok(None) => {
                                    info!("Push stream closed by server");
                                    break;
                                }
                                Err(e) => {
                                    warn!("Push stream failed: {:#}", e);
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("Push stream connect failed: {:#}", e),
                }

                if !dispatch.is_active() {
                    return;
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        });

        workers.push(Worker {
            kind: WorkerKind::Push,
            active,
            handle,
        });
    }

    /// Stop every worker. Subscriptions are kept.
    ///
    /// Safe to call repeatedly; a later `poll` or `connect` starts fresh
    /// workers.
    pub fn disconnect(&self) {
        // ---
        let workers: Vec<Worker> = self.lock_workers().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        info!("Stopping {} feed worker(s)", workers.len());
        for worker in workers {
            worker.stop();
        }
    }

    fn dispatch(&self) -> Dispatch {
        Dispatch {
            subscribers: self.subscribers.clone(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SensorFeed {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Drop for SensorFeed {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::collections::VecDeque;
    use std::future::Future;

    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    use super::*;

    fn reading(minute: u32) -> SensorReading {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
        SensorReading::new(ts, 28.0, 3.0, 6.5, 10.0)
    }

    /// Pops scripted results; an empty script is a fetch error.
    struct Scripted {
        script: Mutex<VecDeque<Result<SensorReading>>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(script: Vec<Result<SensorReading>>, delay: Duration) -> Self {
            Self {
                script: Mutex::new(script.into()),
                delay,
            }
        }
    }

    impl ReadingSource for Scripted {
        fn fetch(&self) -> impl Future<Output = Result<SensorReading>> + Send {
            async move {
                tokio::time::sleep(self.delay).await;
                self.script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Err(anyhow!("script exhausted")))
            }
        }
    }

    /// Hands out one channel-backed stream, then refuses to reconnect.
    struct ChannelConnector {
        rx: Mutex<Option<mpsc::UnboundedReceiver<SensorReading>>>,
    }

    struct ChannelStream {
        rx: mpsc::UnboundedReceiver<SensorReading>,
    }

    impl PushConnector for ChannelConnector {
        type Stream = ChannelStream;

        fn connect(&self) -> impl Future<Output = Result<ChannelStream>> + Send {
            let rx = self.rx.lock().unwrap().take();
            async move { rx.map(|rx| ChannelStream { rx }).ok_or_else(|| anyhow!("gone")) }
        }
    }

    impl PushStream for ChannelStream {
        fn next_update(&mut self) -> impl Future<Output = Result<Option<SensorReading>>> + Send {
            async move { Ok(self.rx.recv().await) }
        }
    }

    fn collector(feed: &SensorFeed) -> (SubscriptionId, Arc<Mutex<Vec<SensorReading>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = feed.subscribe(move |r| sink.lock().unwrap().push(r.clone()));
        (id, seen)
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<SensorReading>>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_poll_skips_failed_fetches() {
        // ---
        let feed = SensorFeed::new(Duration::from_millis(10));
        let (_, seen) = collector(&feed);

        let source = Scripted::new(
            vec![Ok(reading(1)), Err(anyhow!("backend 500")), Ok(reading(2))],
            Duration::ZERO,
        );
        feed.poll(source, Duration::from_millis(5));
        wait_for(&seen, 2).await;
        feed.disconnect();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].timestamp, reading(1).timestamp);
        assert_eq!(seen[1].timestamp, reading(2).timestamp);
    }

    #[tokio::test]
    async fn test_in_flight_fetch_is_discarded_after_disconnect() {
        // ---
        let feed = SensorFeed::new(Duration::from_millis(10));
        let (_, seen) = collector(&feed);

        let source = Scripted::new(vec![Ok(reading(1))], Duration::from_millis(100));
        feed.poll(source, Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(20)).await;
        feed.disconnect();
        assert_eq!(feed.worker_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_updates_reach_every_subscriber_until_unsubscribed() {
        // ---
        let feed = SensorFeed::new(Duration::from_millis(10));
        let (first, first_seen) = collector(&feed);
        let (_, second_seen) = collector(&feed);

        let (tx, rx) = mpsc::unbounded_channel();
        feed.connect(ChannelConnector {
            rx: Mutex::new(Some(rx)),
        });

        tx.send(reading(1)).unwrap();
        wait_for(&first_seen, 1).await;
        wait_for(&second_seen, 1).await;

        assert!(feed.unsubscribe(first));
        assert!(!feed.unsubscribe(first));

        tx.send(reading(2)).unwrap();
        wait_for(&second_seen, 2).await;
        feed.disconnect();

        assert_eq!(first_seen.lock().unwrap().len(), 1);
        assert_eq!(second_seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_connect_is_ignored() {
        // ---
        let feed = SensorFeed::default();
        let (_tx1, rx1) = mpsc::unbounded_channel();
        let (_tx2, rx2) = mpsc::unbounded_channel();

        feed.connect(ChannelConnector {
            rx: Mutex::new(Some(rx1)),
        });
        feed.connect(ChannelConnector {
            rx: Mutex::new(Some(rx2)),
        });
        assert_eq!(feed.worker_count(), 1);

        feed.disconnect();
        feed.disconnect();
        assert_eq!(feed.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_and_push_share_subscribers() {
        // ---
        let feed = SensorFeed::new(Duration::from_millis(10));
        let (_, seen) = collector(&feed);
        assert_eq!(feed.subscriber_count(), 1);

        let (tx, rx) = mpsc::unbounded_channel();
        feed.connect(ChannelConnector {
            rx: Mutex::new(Some(rx)),
        });
        feed.poll(Scripted::new(vec![Ok(reading(1))], Duration::ZERO), Duration::from_millis(5));
        tx.send(reading(2)).unwrap();

        wait_for(&seen, 2).await;
        feed.disconnect();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
