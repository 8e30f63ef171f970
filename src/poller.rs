//! Background polling: one recurring timer per feed URL, shared by every
//! client monitoring that URL.
//!
//! Each URL is owned by a task that serializes join and leave requests and
//! starts the fetch-validate cycle on its own timer. The fastest requested
//! interval wins. The task ends when its last client leaves, after any cycle
//! in flight completes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

/// One fetch-validate cycle for a URL.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn run_cycle(&self, feed_url: &str) -> anyhow::Result<()>;
}

/// Scheduling state of a monitored URL after a join or leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub interval: Duration,
    pub clients: usize,
}

enum MonitorCommand {
    Join {
        interval: Duration,
        reply: oneshot::Sender<MonitorStatus>,
    },
    Leave {
        reply: oneshot::Sender<MonitorStatus>,
    },
}

struct MonitorHandle {
    commands: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<()>,
}

pub struct Poller<R: CycleRunner> {
    runner: Arc<R>,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
}

impl<R: CycleRunner> Poller<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            runner,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a client for `feed_url`, starting its timer if this is the first.
    ///
    /// The registry lock covers only the lookup or insert. The join itself is
    /// answered by the URL's task, which stays responsive during a cycle.
    pub async fn start_monitoring(&self, feed_url: &str, interval: Duration) -> anyhow::Result<MonitorStatus> {
        let interval = interval.max(Duration::from_millis(1));

        loop {
            let commands = {
                let mut monitors = self.monitors.lock().await;
                match monitors.get(feed_url) {
                    Some(handle) => handle.commands.clone(),
                    None => {
                        let (commands, receiver) = mpsc::channel(8);
                        let task = tokio::spawn(run_monitor(
                            feed_url.to_string(),
                            self.runner.clone(),
                            interval,
                            receiver,
                        ));
                        monitors.insert(feed_url.to_string(), MonitorHandle { commands, task });
                        info!(feed_url, interval_secs = interval.as_secs_f64(), "Started monitoring");
                        return Ok(MonitorStatus {
                            interval,
                            clients: 1,
                        });
                    }
                }
            };

            let (reply, response) = oneshot::channel();
            if commands.send(MonitorCommand::Join { interval, reply }).await.is_ok() {
                if let Ok(status) = response.await {
                    info!(feed_url, clients = status.clients, interval_secs = status.interval.as_secs_f64(), "Client joined monitor");
                    return Ok(status);
                }
            }

            // the task ended between lookup and join
            debug!(feed_url, "Monitor task gone, starting a new one");
            self.forget(feed_url, &commands).await;
        }
    }

    /// Removes a client. Returns `None` when the URL was not monitored.
    pub async fn stop_monitoring(&self, feed_url: &str) -> anyhow::Result<Option<MonitorStatus>> {
        let commands = {
            let monitors = self.monitors.lock().await;
            match monitors.get(feed_url) {
                Some(handle) => handle.commands.clone(),
                None => return Ok(None),
            }
        };

        let (reply, response) = oneshot::channel();
        let status = match commands.send(MonitorCommand::Leave { reply }).await {
            Ok(()) => response.await.ok(),
            Err(_) => None,
        }
        .unwrap_or(MonitorStatus {
            interval: Duration::ZERO,
            clients: 0,
        });

        if status.clients == 0 {
            self.forget(feed_url, &commands).await;
            info!(feed_url, "Stopped monitoring");
        }
        Ok(Some(status))
    }

    pub async fn monitored_urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.monitors.lock().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Stops every monitor. Cycles already running are allowed to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.monitors.lock().await.drain().collect();
        for (feed_url, handle) in handles {
            drop(handle.commands);
            if let Err(e) = handle.task.await {
                error!(feed_url, error = %e, "Monitor task failed");
            }
        }
    }

    /// Drops the registry entry for `feed_url` if it still belongs to the task
    /// behind `commands`.
    async fn forget(&self, feed_url: &str, commands: &mpsc::Sender<MonitorCommand>) {
        let mut monitors = self.monitors.lock().await;
        if monitors
            .get(feed_url)
            .is_some_and(|h| h.commands.same_channel(commands))
        {
            monitors.remove(feed_url);
        }
    }
}

type CycleTask = JoinHandle<anyhow::Result<()>>;

fn timer(start: Instant, period: Duration) -> Interval {
    let mut timer = interval_at(start, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Owner task of one URL. A cycle runs on its own task so joins and leaves
/// are answered while it is in flight; ticks wait until it finishes.
async fn run_monitor<R: CycleRunner>(
    feed_url: String,
    runner: Arc<R>,
    mut period: Duration,
    mut commands: mpsc::Receiver<MonitorCommand>,
) {
    let mut clients = 1usize;
    let mut ticker = timer(Instant::now(), period);
    let mut cycle: Option<CycleTask> = None;

    loop {
        tokio::select! {
            _ = ticker.tick(), if cycle.is_none() => {
                debug!(feed_url, "Running cycle");
                let runner = runner.clone();
                let url = feed_url.clone();
                cycle = Some(tokio::spawn(async move { runner.run_cycle(&url).await }));
            }
            finished = in_flight(&mut cycle) => {
                cycle = None;
                report(&feed_url, finished);
            }
            command = commands.recv() => match command {
                Some(MonitorCommand::Join { interval, reply }) => {
                    clients += 1;
                    if interval < period {
                        period = interval;
                        ticker = timer(Instant::now() + period, period);
                        debug!(feed_url, interval_secs = period.as_secs_f64(), "Monitor interval shortened");
                    }
                    let _ = reply.send(MonitorStatus { interval: period, clients });
                }
                Some(MonitorCommand::Leave { reply }) => {
                    clients = clients.saturating_sub(1);
                    let _ = reply.send(MonitorStatus { interval: period, clients });
                    if clients == 0 {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    if let Some(task) = cycle {
        report(&feed_url, task.await);
    }
    debug!(feed_url, "Monitor task finished");
}

/// Resolves when the running cycle ends. Pending while none runs.
async fn in_flight(cycle: &mut Option<CycleTask>) -> Result<anyhow::Result<()>, JoinError> {
    match cycle {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

fn report(feed_url: &str, finished: Result<anyhow::Result<()>, JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(feed_url, error = %e, "Cycle failed"),
        Err(e) => error!(feed_url, error = %e, "Cycle task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CountingRunner {
        cycles: StdMutex<HashMap<String, usize>>,
    }

    impl CountingRunner {
        fn count(&self, feed_url: &str) -> usize {
            self.cycles.lock().unwrap().get(feed_url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(&self, feed_url: &str) -> anyhow::Result<()> {
            *self.cycles.lock().unwrap().entry(feed_url.to_string()).or_default() += 1;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_timer_per_url() {
        let runner = Arc::new(CountingRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        let status = poller.start_monitoring("a", secs(10)).await.unwrap();
        assert_eq!(status, MonitorStatus { interval: secs(10), clients: 2 });

        tokio::time::sleep(secs(25)).await;
        // ticks at 0, 10 and 20
        assert_eq!(runner.count("a"), 3);
        assert_eq!(poller.monitored_urls().await, vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slower_client_keeps_interval() {
        let runner = Arc::new(CountingRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        let status = poller.start_monitoring("a", secs(60)).await.unwrap();

        assert_eq!(status, MonitorStatus { interval: secs(10), clients: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_faster_client_recreates_timer() {
        let runner = Arc::new(CountingRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(60)).await.unwrap();
        tokio::time::sleep(secs(1)).await;
        let status = poller.start_monitoring("a", secs(10)).await.unwrap();
        assert_eq!(status.interval, secs(10));

        tokio::time::sleep(secs(24)).await;
        // 0 on the old timer, 11 and 21 on the new one
        assert_eq!(runner.count("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_client_stops_timer() {
        let runner = Arc::new(CountingRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        poller.start_monitoring("a", secs(10)).await.unwrap();
        tokio::time::sleep(secs(1)).await;

        let status = poller.stop_monitoring("a").await.unwrap().unwrap();
        assert_eq!(status.clients, 1);
        let status = poller.stop_monitoring("a").await.unwrap().unwrap();
        assert_eq!(status.clients, 0);
        assert!(poller.monitored_urls().await.is_empty());

        let before = runner.count("a");
        tokio::time::sleep(secs(60)).await;
        assert_eq!(runner.count("a"), before);
        assert!(poller.stop_monitoring("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_urls_are_independent() {
        let runner = Arc::new(CountingRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        poller.start_monitoring("b", secs(20)).await.unwrap();
        tokio::time::sleep(secs(45)).await;
        poller.shutdown().await;

        assert_eq!(runner.count("a"), 5);
        assert_eq!(runner.count("b"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_does_not_block_other_urls() {
        let runner = Arc::new(SlowRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        tokio::time::sleep(secs(1)).await;
        assert_eq!(runner.count("a"), 1);

        // a's first cycle is still in flight
        let started = Instant::now();
        let status = poller.start_monitoring("a", secs(10)).await.unwrap();
        assert_eq!(status.clients, 2);
        poller.start_monitoring("b", secs(10)).await.unwrap();
        let status = poller.stop_monitoring("a").await.unwrap().unwrap();
        assert_eq!(status.clients, 1);
        assert!(started.elapsed() < secs(1));

        tokio::time::sleep(secs(25)).await;
        assert_eq!(runner.count("a"), 1);
        // b at 1, 11 and 21
        assert_eq!(runner.count("b"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_wait_for_cycle_in_flight() {
        let runner = Arc::new(SlowRunner::default());
        let poller = Poller::new(runner.clone());

        poller.start_monitoring("a", secs(10)).await.unwrap();
        tokio::time::sleep(secs(45)).await;

        // 0 runs until 40, the delayed tick fires at 40
        assert_eq!(runner.count("a"), 2);
    }

    /// Cycles for "a" take 40 seconds.
    #[derive(Default)]
    struct SlowRunner {
        cycles: StdMutex<HashMap<String, usize>>,
    }

    impl SlowRunner {
        fn count(&self, feed_url: &str) -> usize {
            self.cycles.lock().unwrap().get(feed_url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl CycleRunner for SlowRunner {
        async fn run_cycle(&self, feed_url: &str) -> anyhow::Result<()> {
            *self.cycles.lock().unwrap().entry(feed_url.to_string()).or_default() += 1;
            if feed_url == "a" {
                tokio::time::sleep(secs(40)).await;
            }
            Ok(())
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }
}
