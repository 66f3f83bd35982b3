//! Live Log Streamer
//!
//! Follows one run's step containers in order and publishes their output as
//! stream events on the viewer's session topic.
//!
//! Each viewer gets its own session task. The task moves through
//! `Resolving -> Streaming -> (Retrying ->)* Completed | Failed` and always
//! ends with exactly one terminal event, unless the viewer went away first.
//! Step `k + 1` is never tailed before step `k`'s container has finished, and
//! a step whose log stream is interrupted resumes after the last line that
//! was already forwarded from the same container.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use pipeviz_client::{ClusterError, ResolvedRun, RunSource};
use pipeviz_core::domain::{
    LogLine, LogStep, RunOutcome, RunRef, StreamErrorKind, StreamEvent,
};

use super::broker::{Broker, Subscription, Topic};

/// Retry and wait limits of a live log session
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// First retry delay; doubles after every failed attempt
    pub retry_initial: Duration,
    /// Upper bound of the retry delay
    pub retry_max: Duration,
    /// How long to wait for a step to appear, its container to start or the
    /// cluster to recover
    pub max_wait: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            retry_initial: Duration::from_millis(500),
            retry_max: Duration::from_secs(10),
            max_wait: Duration::from_secs(3600),
        }
    }
}

/// How a session task ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Completed(RunOutcome),
    Failed(StreamErrorKind),
    /// The viewer disconnected; nothing was published
    Cancelled,
}

// =============================================================================
// Sessions
// =============================================================================

/// Starts live log sessions and keeps count of the running ones
#[derive(Clone)]
pub struct LiveLogSessions {
    runs: Arc<dyn RunSource>,
    broker: Broker<StreamEvent>,
    config: StreamerConfig,
    active: Arc<AtomicUsize>,
}

impl LiveLogSessions {
    pub fn new(runs: Arc<dyn RunSource>, broker: Broker<StreamEvent>, config: StreamerConfig) -> Self {
        Self {
            runs,
            broker,
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of session tasks still running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Opens a session for one viewer
    ///
    /// The viewer is subscribed before the streamer starts, so no event of
    /// the session can be missed. Dropping the returned session stops the
    /// streamer and releases its cluster connections.
    pub fn open(&self, run: RunRef) -> LiveSession {
        let id = Uuid::new_v4();
        let topic = Topic::live_log(&run, id);
        let subscription = self.broker.subscribe(topic.clone());
        let cancel = CancellationToken::new();

        let streamer = LiveLogStreamer {
            session: id,
            run,
            topic,
            runs: self.runs.clone(),
            broker: self.broker.clone(),
            config: self.config.clone(),
            progress: StepProgress::default(),
            backoff: Backoff::new(self.config.retry_initial, self.config.retry_max),
        };

        let counter = ActiveSession::enter(self.active.clone());
        let token = cancel.clone();
        tokio::spawn(async move {
            let _counter = counter;
            streamer.run(token).await
        });

        LiveSession {
            id,
            subscription,
            cancel: cancel.drop_guard(),
        }
    }
}

/// Counts a session task as active for as long as it lives
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A viewer's handle on its live log session
pub struct LiveSession {
    id: Uuid,
    subscription: Subscription<StreamEvent>,
    cancel: DropGuard,
}

impl LiveSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.subscription.recv().await
    }

    /// Splits the session into its event subscription and the guard that
    /// stops the streamer when dropped
    pub fn into_parts(self) -> (Subscription<StreamEvent>, DropGuard) {
        (self.subscription, self.cancel)
    }
}

// =============================================================================
// Streamer
// =============================================================================

/// Why a session is waiting before it re-resolves the run
#[derive(Debug, Clone)]
enum RetryReason {
    /// The current step's container is not scheduled or has not started
    AwaitingContainer,
    /// The run is still executing but does not list the current step yet
    AwaitingStep,
    /// A cluster call failed with a transient error
    Unavailable(String),
}

enum SessionState {
    Resolving,
    Streaming(ResolvedRun),
    Retrying(RetryReason),
    Completed(RunOutcome),
    Failed(StreamErrorKind, String),
    Cancelled,
}

/// Position within the run: the step being followed and how many lines of
/// which container were already forwarded
#[derive(Debug, Default)]
struct StepProgress {
    step: usize,
    /// `(pod, container)` the `forwarded` count refers to
    source: Option<(String, String)>,
    forwarded: usize,
}

impl StepProgress {
    /// Lines to skip when following `step` from its start
    ///
    /// A step that moved to another pod or container starts over, since the
    /// new container's output has not been seen.
    fn resume_from(&mut self, step: &LogStep) -> usize {
        let source = (step.pod_name.clone(), step.container_name.clone());
        if self.source.as_ref() != Some(&source) {
            self.source = Some(source);
            self.forwarded = 0;
        }
        self.forwarded
    }

    fn advance(&mut self) {
        *self = Self {
            step: self.step + 1,
            ..Self::default()
        };
    }
}

/// Exponential backoff over one waiting period
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    delay: Duration,
    waiting_since: Option<Instant>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            delay: initial,
            waiting_since: None,
        }
    }

    /// Next delay to sleep; starts the waiting period on first use
    fn next_delay(&mut self) -> Duration {
        self.waiting_since.get_or_insert_with(Instant::now);
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        delay
    }

    fn waited(&self) -> Duration {
        self.waiting_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }

    /// Ends the waiting period after progress was made
    fn reset(&mut self) {
        self.delay = self.initial;
        self.waiting_since = None;
    }
}

struct LiveLogStreamer {
    session: Uuid,
    run: RunRef,
    topic: Topic,
    runs: Arc<dyn RunSource>,
    broker: Broker<StreamEvent>,
    config: StreamerConfig,
    progress: StepProgress,
    backoff: Backoff,
}

impl LiveLogStreamer {
    async fn run(mut self, cancel: CancellationToken) -> SessionEnd {
        tracing::info!("Live log session {} started for {}", self.session, self.run);

        let mut state = SessionState::Resolving;
        let end = loop {
            state = match state {
                SessionState::Resolving => self.resolve(&cancel).await,
                SessionState::Streaming(run) => self.stream_step(run, &cancel).await,
                SessionState::Retrying(reason) => self.retry(reason, &cancel).await,
                SessionState::Completed(outcome) => {
                    self.publish(StreamEvent::StreamEnded { status: outcome });
                    break SessionEnd::Completed(outcome);
                }
                SessionState::Failed(kind, message) => {
                    tracing::warn!(
                        "Live log session {} for {} failed: {}",
                        self.session,
                        self.run,
                        message
                    );
                    self.publish(StreamEvent::StreamError { kind, message });
                    break SessionEnd::Failed(kind);
                }
                SessionState::Cancelled => break SessionEnd::Cancelled,
            };
        };

        tracing::info!(
            "Live log session {} for {} ended: {:?}",
            self.session,
            self.run,
            end
        );
        end
    }

    fn publish(&self, event: StreamEvent) {
        self.broker.publish(&self.topic, event);
    }

    /// Resolves the run and decides what to do at the current step
    async fn resolve(&mut self, cancel: &CancellationToken) -> SessionState {
        let result = tokio::select! {
            _ = cancel.cancelled() => return SessionState::Cancelled,
            result = self.runs.resolve_run(&self.run) => result,
        };

        match result {
            Ok(run) => self.next_step(run),
            Err(e) if e.is_not_found() => {
                SessionState::Failed(StreamErrorKind::NotFound, format!("Run {} not found", self.run))
            }
            Err(e) if e.is_transient() => SessionState::Retrying(RetryReason::Unavailable(e.to_string())),
            Err(e) => SessionState::Failed(StreamErrorKind::Unavailable, e.to_string()),
        }
    }

    /// Picks the transition for the current step of a freshly resolved run
    fn next_step(&self, run: ResolvedRun) -> SessionState {
        let scheduled = run
            .steps
            .get(self.progress.step)
            .map(LogStep::is_scheduled);

        match scheduled {
            Some(true) => SessionState::Streaming(run),
            _ if run.status.is_terminal() => {
                SessionState::Completed(RunOutcome::from_status(run.status))
            }
            Some(false) => SessionState::Retrying(RetryReason::AwaitingContainer),
            None => SessionState::Retrying(RetryReason::AwaitingStep),
        }
    }

    /// Follows the current step's container until it ends
    async fn stream_step(&mut self, run: ResolvedRun, cancel: &CancellationToken) -> SessionState {
        let step = match run.steps.get(self.progress.step) {
            Some(step) => step.clone(),
            None => return self.next_step(run),
        };

        let tailed = tokio::select! {
            _ = cancel.cancelled() => return SessionState::Cancelled,
            tailed = self.runs.tail_container(&step.pod_name, &step.container_name) => tailed,
        };
        let mut lines = match tailed {
            Ok(lines) => lines,
            Err(e) => return self.tail_failed(&run, e),
        };

        tracing::debug!(
            "Session {} following step {} ({}/{})",
            self.session,
            step.step_index,
            step.pod_name,
            step.container_name
        );

        // lines already forwarded before an interruption are skipped
        let skip = self.progress.resume_from(&step);
        let mut seen = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return SessionState::Cancelled,
                next = lines.next() => next,
            };

            match next {
                Some(Ok(line)) => {
                    seen += 1;
                    if seen <= skip {
                        continue;
                    }
                    self.publish(StreamEvent::LogLine(LogLine {
                        step_index: step.step_index,
                        container: step.container_name.clone(),
                        line,
                        timestamp: Utc::now(),
                    }));
                    self.progress.forwarded = seen;
                    self.backoff.reset();
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        "Session {} lost step {} log after {} lines: {}",
                        self.session,
                        step.step_index,
                        seen,
                        e
                    );
                    return SessionState::Retrying(RetryReason::Unavailable(e.to_string()));
                }
                None => break,
            }
        }

        self.publish(StreamEvent::StepComplete {
            step_index: step.step_index,
        });
        self.progress.advance();
        self.backoff.reset();

        self.next_step(run)
    }

    fn tail_failed(&self, run: &ResolvedRun, error: ClusterError) -> SessionState {
        if error.is_not_found() || error.is_not_ready() {
            // a container that never ran in a finished run has no output
            if run.status.is_terminal() {
                return SessionState::Completed(RunOutcome::from_status(run.status));
            }
            return SessionState::Retrying(RetryReason::AwaitingContainer);
        }
        if error.is_transient() {
            return SessionState::Retrying(RetryReason::Unavailable(error.to_string()));
        }
        SessionState::Failed(StreamErrorKind::Unavailable, error.to_string())
    }

    /// Waits out one backoff delay, or gives up once the ceiling is reached
    async fn retry(&mut self, reason: RetryReason, cancel: &CancellationToken) -> SessionState {
        let ceiling = self.config.max_wait;

        if self.backoff.waited() >= ceiling {
            return match reason {
                // the steps that existed were all streamed
                RetryReason::AwaitingStep if self.progress.step > 0 => {
                    SessionState::Completed(RunOutcome::Unknown)
                }
                RetryReason::AwaitingStep | RetryReason::AwaitingContainer => SessionState::Failed(
                    StreamErrorKind::TimedOut,
                    format!(
                        "Step {} of {} did not start within {:?}",
                        self.progress.step, self.run, ceiling
                    ),
                ),
                RetryReason::Unavailable(message) => {
                    SessionState::Failed(StreamErrorKind::Unavailable, message)
                }
            };
        }

        let delay = self.backoff.next_delay();
        tracing::debug!(
            "Session {} retrying in {:?}: {:?}",
            self.session,
            delay,
            reason
        );

        tokio::select! {
            _ = cancel.cancelled() => SessionState::Cancelled,
            _ = tokio::time::sleep(delay) => SessionState::Resolving,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use pipeviz_client::LineStream;
    use pipeviz_core::domain::{PipelineIdentity, PipelineStatus};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    enum Container {
        Waiting,
        Lines(Vec<String>),
        Channel(Option<mpsc::UnboundedReceiver<String>>),
        Flaky(Vec<String>, usize),
        /// Yields its lines, then drops the connection, every time
        Broken(Vec<String>),
    }

    /// In-memory cluster with scripted runs and containers
    ///
    /// Containers are looked up as `pod/container` first, then by container
    /// name alone.
    #[derive(Default)]
    struct FakeCluster {
        run: Mutex<Option<ResolvedRun>>,
        containers: Mutex<HashMap<String, Container>>,
        open_tails: Arc<AtomicUsize>,
        tail_calls: AtomicUsize,
    }

    /// Tracks how many log streams are still held by a streamer
    struct TailGuard(Arc<AtomicUsize>);

    impl Drop for TailGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakeCluster {
        fn set_run(&self, status: PipelineStatus, steps: &[(&str, &str)]) {
            let steps = steps
                .iter()
                .enumerate()
                .map(|(i, (container, pod))| LogStep {
                    step_index: i,
                    container_name: container.to_string(),
                    pod_name: pod.to_string(),
                })
                .collect();
            *self.run.lock().unwrap() = Some(ResolvedRun {
                identity: PipelineIdentity::new("github", "acme", "widgets", "main", 42),
                status,
                steps,
            });
        }

        fn set_container(&self, name: &str, container: Container) {
            self.containers
                .lock()
                .unwrap()
                .insert(name.to_string(), container);
        }

        fn guarded(&self, lines: LineStream) -> LineStream {
            self.open_tails.fetch_add(1, Ordering::SeqCst);
            let guard = TailGuard(self.open_tails.clone());
            stream::unfold((lines, guard), |(mut lines, guard)| async move {
                let item = lines.next().await?;
                Some((item, (lines, guard)))
            })
            .boxed()
        }
    }

    #[async_trait]
    impl RunSource for FakeCluster {
        async fn resolve_run(&self, run: &RunRef) -> pipeviz_client::Result<ResolvedRun> {
            self.run
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ClusterError::NotFound(format!("run {}", run)))
        }

        async fn tail_container(
            &self,
            pod: &str,
            container: &str,
        ) -> pipeviz_client::Result<LineStream> {
            self.tail_calls.fetch_add(1, Ordering::SeqCst);
            let mut containers = self.containers.lock().unwrap();
            let qualified = format!("{}/{}", pod, container);
            let key = if containers.contains_key(&qualified) {
                qualified
            } else {
                container.to_string()
            };
            let lines: LineStream = match containers.get_mut(&key) {
                None | Some(Container::Waiting) => {
                    return Err(ClusterError::NotReady(format!("{} is waiting to start", container)));
                }
                Some(Container::Lines(lines)) => {
                    stream::iter(lines.clone().into_iter().map(Ok)).boxed()
                }
                Some(Container::Channel(rx)) => {
                    let rx = rx.take().expect("channel container tailed twice");
                    stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|line| (Ok(line), rx))
                    })
                    .boxed()
                }
                Some(Container::Flaky(lines, fail_after)) => {
                    let fail_after = std::mem::replace(fail_after, usize::MAX);
                    let head: Vec<pipeviz_client::Result<String>> =
                        lines.iter().take(fail_after).cloned().map(Ok).collect();
                    if fail_after < lines.len() {
                        let error = ClusterError::NotReady("connection reset".to_string());
                        stream::iter(head)
                            .chain(stream::once(async move { Err(error) }))
                            .boxed()
                    } else {
                        stream::iter(lines.clone().into_iter().map(Ok)).boxed()
                    }
                }
                Some(Container::Broken(lines)) => {
                    let error = ClusterError::NotReady("connection reset".to_string());
                    stream::iter(lines.clone().into_iter().map(Ok))
                        .chain(stream::once(async move { Err(error) }))
                        .boxed()
                }
            };
            drop(containers);
            Ok(self.guarded(lines))
        }
    }

    fn fast_config() -> StreamerConfig {
        StreamerConfig {
            retry_initial: Duration::from_millis(5),
            retry_max: Duration::from_millis(20),
            max_wait: Duration::from_secs(5),
        }
    }

    fn sessions(cluster: &Arc<FakeCluster>, config: StreamerConfig) -> LiveLogSessions {
        LiveLogSessions::new(cluster.clone(), Broker::new(256), config)
    }

    fn run_ref() -> RunRef {
        RunRef::new("acme", "widgets", "main", 42)
    }

    fn lines(items: &[&str]) -> Container {
        Container::Lines(items.iter().map(|s| s.to_string()).collect())
    }

    /// Receives events until the terminal one
    async fn collect(session: &mut LiveSession) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
                .await
                .expect("session stalled")
                .expect("session closed without a terminal event");
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    fn log_lines(events: &[StreamEvent]) -> Vec<(usize, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::LogLine(l) => Some((l.step_index, l.line.clone())),
                _ => None,
            })
            .collect()
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_streams_steps_in_order() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1"), ("test", "pod-1")]);
        cluster.set_container("build", lines(&["compiling", "compiled"]));
        cluster.set_container("test", lines(&["running tests", "ok"]));

        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());
        let events = collect(&mut session).await;

        assert_eq!(
            log_lines(&events),
            vec![
                (0, "compiling".to_string()),
                (0, "compiled".to_string()),
                (1, "running tests".to_string()),
                (1, "ok".to_string()),
            ]
        );
        assert_eq!(events[2], StreamEvent::StepComplete { step_index: 0 });
        assert_eq!(events[5], StreamEvent::StepComplete { step_index: 1 });
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Success
            })
        );
        assert_eq!(events.len(), 7);
    }

    #[tokio::test]
    async fn test_next_step_waits_for_previous_container() {
        let cluster = Arc::new(FakeCluster::default());
        let (tx, rx) = mpsc::unbounded_channel();
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1"), ("test", "")]);
        cluster.set_container("build", Container::Channel(Some(rx)));
        cluster.set_container("test", lines(&["t1"]));

        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());

        tx.send("b1".to_string()).unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), session.recv())
            .await
            .unwrap();
        assert!(matches!(first, Some(StreamEvent::LogLine(l)) if l.line == "b1"));

        // step 1 is ready on the cluster, but step 0 is still running
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1"), ("test", "pod-1")]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cluster.tail_calls.load(Ordering::SeqCst), 1);

        tx.send("b2".to_string()).unwrap();
        drop(tx);
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1"), ("test", "pod-1")]);

        let events = collect(&mut session).await;
        assert_eq!(
            log_lines(&events),
            vec![(0, "b2".to_string()), (1, "t1".to_string())]
        );
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Success
            })
        );
    }

    #[tokio::test]
    async fn test_unscheduled_step_is_retried() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1")]);
        cluster.set_container("build", Container::Waiting);

        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());

        wait_until(|| cluster.tail_calls.load(Ordering::SeqCst) >= 2).await;
        cluster.set_container("build", lines(&["finally"]));
        cluster.set_run(PipelineStatus::Failed, &[("build", "pod-1")]);

        let events = collect(&mut session).await;
        assert_eq!(log_lines(&events), vec![(0, "finally".to_string())]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Failure
            })
        );
    }

    #[tokio::test]
    async fn test_interrupted_step_resumes_without_duplicates() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1")]);
        cluster.set_container(
            "build",
            Container::Flaky(vec!["one".into(), "two".into(), "three".into()], 2),
        );

        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());
        let events = collect(&mut session).await;

        assert_eq!(
            log_lines(&events),
            vec![
                (0, "one".to_string()),
                (0, "two".to_string()),
                (0, "three".to_string()),
            ]
        );
        assert_eq!(cluster.tail_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rescheduled_step_is_followed_from_the_start() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1")]);
        cluster.set_container("pod-1/build", Container::Broken(vec!["a".into(), "b".into()]));
        cluster.set_container("pod-2/build", lines(&["x", "y", "z"]));

        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());

        for expected in ["a", "b"] {
            let event = tokio::time::timeout(Duration::from_secs(5), session.recv())
                .await
                .unwrap();
            assert!(matches!(event, Some(StreamEvent::LogLine(l)) if l.line == expected));
        }

        // the step was retried on another pod
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-2")]);

        let events = collect(&mut session).await;
        assert_eq!(
            log_lines(&events),
            vec![
                (0, "x".to_string()),
                (0, "y".to_string()),
                (0, "z".to_string()),
            ]
        );
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Success
            })
        );
    }

    #[tokio::test]
    async fn test_running_run_without_steps_keeps_waiting() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Running, &[]);

        let config = StreamerConfig {
            max_wait: Duration::from_secs(3600),
            ..fast_config()
        };
        let sessions = sessions(&cluster, config);
        let mut session = sessions.open(run_ref());

        // several retry rounds pass without the session giving up
        let early = tokio::time::timeout(Duration::from_millis(200), session.recv()).await;
        assert!(early.is_err(), "session ended early: {:?}", early);

        cluster.set_container("build", lines(&["started"]));
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1")]);

        let events = collect(&mut session).await;
        assert_eq!(log_lines(&events), vec![(0, "started".to_string())]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Success
            })
        );
    }

    #[tokio::test]
    async fn test_never_listed_step_times_out() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Running, &[]);

        let config = StreamerConfig {
            max_wait: Duration::from_millis(50),
            ..fast_config()
        };
        let sessions = sessions(&cluster, config);
        let mut session = sessions.open(run_ref());

        let events = collect(&mut session).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::StreamError {
                kind: StreamErrorKind::TimedOut,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_run_reports_not_found() {
        let cluster = Arc::new(FakeCluster::default());
        let sessions = sessions(&cluster, fast_config());
        let mut session = sessions.open(run_ref());

        let events = collect(&mut session).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::StreamError {
                kind: StreamErrorKind::NotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_container_that_never_starts_times_out() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1")]);

        let config = StreamerConfig {
            max_wait: Duration::from_millis(50),
            ..fast_config()
        };
        let sessions = sessions(&cluster, config);
        let mut session = sessions.open(run_ref());

        let events = collect(&mut session).await;
        assert!(matches!(
            events.last(),
            Some(StreamEvent::StreamError {
                kind: StreamErrorKind::TimedOut,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unfinished_run_ends_with_unknown_outcome() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1")]);
        cluster.set_container("build", lines(&["done"]));

        let config = StreamerConfig {
            max_wait: Duration::from_millis(50),
            ..fast_config()
        };
        let sessions = sessions(&cluster, config);
        let mut session = sessions.open(run_ref());

        let events = collect(&mut session).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamEnded {
                status: RunOutcome::Unknown
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let cluster = Arc::new(FakeCluster::default());
        let (tx, rx) = mpsc::unbounded_channel();
        cluster.set_run(PipelineStatus::Running, &[("build", "pod-1")]);
        cluster.set_container("build", Container::Channel(Some(rx)));

        let broker = Broker::new(256);
        let sessions = LiveLogSessions::new(cluster.clone(), broker.clone(), fast_config());
        let mut session = sessions.open(run_ref());

        tx.send("working".to_string()).unwrap();
        assert!(session.recv().await.is_some());
        assert_eq!(sessions.active(), 1);
        assert_eq!(cluster.open_tails.load(Ordering::SeqCst), 1);

        drop(session);

        wait_until(|| sessions.active() == 0).await;
        assert_eq!(cluster.open_tails.load(Ordering::SeqCst), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_viewers_get_independent_streams() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.set_run(PipelineStatus::Succeeded, &[("build", "pod-1")]);
        cluster.set_container("build", lines(&["a", "b"]));

        let sessions = sessions(&cluster, fast_config());
        let mut first = sessions.open(run_ref());
        let mut second = sessions.open(run_ref());
        assert_ne!(first.id(), second.id());

        let first_events = collect(&mut first).await;
        let second_events = collect(&mut second).await;
        assert_eq!(log_lines(&first_events), log_lines(&second_events));
        assert_eq!(log_lines(&first_events).len(), 2);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(2));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(2),
            ]
        );

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
