//! Stream Manager
//!
//! Owns the stream registry and the snapshot supervisor. One monitor task
//! drains inbound events, paces periodic snapshots, expires motion and runs
//! the health/status work on its own interval. Commands arrive concurrently
//! from the automation bridge and the HTTP API through [`StreamManager::send_cmd`].

use crate::event::{EventKind, StreamEvent};
use crate::periodic::PeriodicTask;
use crate::publisher::{CommandSink, HealthCheck, Publisher};
use crate::snapshot::{SnapshotCommand, SnapshotSupervisor};
use crate::stream::{CommandResult, Stream, StreamStatus, UPDATE_SNAPSHOT};
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the inbound event queue
const EVENT_QUEUE_LEN: usize = 256;

/// Monitor timing
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bounded wait for inbound events per iteration
    pub tick: Duration,
    /// Media server health check and bridge status interval
    pub health_interval: Duration,
    /// Minimum time between periodic snapshot passes; `None` disables them
    pub snapshot_interval: Option<Duration>,
    /// How long a requested snapshot may take
    pub snapshot_timeout: Duration,
    /// Poll interval of the preview loop; `None` disables it
    pub preview_interval: Option<Duration>,
    /// Motion is cleared this long after the last motion event
    pub motion_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            health_interval: Duration::from_secs(15),
            snapshot_interval: None,
            snapshot_timeout: Duration::from_secs(15),
            preview_interval: Some(Duration::from_secs(1)),
            motion_timeout: Duration::from_secs(20),
        }
    }
}

/// Per-stream summary for status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub status: StreamStatus,
    pub motion: bool,
}

pub struct StreamManager {
    config: ManagerConfig,
    streams: RwLock<BTreeMap<String, Arc<dyn Stream>>>,
    snapshots: SnapshotSupervisor,
    last_snap: Mutex<Option<Instant>>,
    /// Last motion event per stream
    motion_seen: Mutex<HashMap<String, Instant>>,
    stop_flag: AtomicBool,
    publisher: Arc<dyn Publisher>,
    events_tx: mpsc::Sender<StreamEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new(config: ManagerConfig, snapshot: SnapshotCommand, publisher: Arc<dyn Publisher>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let snapshots = SnapshotSupervisor::new(snapshot, config.snapshot_timeout);
        Self {
            config,
            streams: RwLock::new(BTreeMap::new()),
            snapshots,
            last_snap: Mutex::new(None),
            motion_seen: Mutex::new(HashMap::new()),
            stop_flag: AtomicBool::new(false),
            publisher,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a stream, replacing any with the same URI
    pub async fn add(&self, stream: Arc<dyn Stream>) -> String {
        let uri = stream.uri().to_string();
        self.streams.write().await.insert(uri.clone(), stream);
        uri
    }

    pub async fn get(&self, uri: &str) -> Option<Arc<dyn Stream>> {
        self.streams.read().await.get(uri).cloned()
    }

    pub async fn uris(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    async fn all_streams(&self) -> Vec<Arc<dyn Stream>> {
        self.streams.read().await.values().cloned().collect()
    }

    pub async fn total(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Number of enabled streams
    pub async fn active(&self) -> usize {
        self.all_streams().await.iter().filter(|s| s.enabled()).count()
    }

    /// Sender for media-server and device events
    pub fn events(&self) -> mpsc::Sender<StreamEvent> {
        self.events_tx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    /// Status and motion flag of every stream
    pub async fn status(&self) -> BTreeMap<String, StreamInfo> {
        self.streams
            .read()
            .await
            .iter()
            .map(|(uri, s)| {
                let info = StreamInfo {
                    status: s.status(),
                    motion: s.motion(),
                };
                (uri.clone(), info)
            })
            .collect()
    }

    /// Health check every stream and return those that are alive
    pub async fn active_streams(&self) -> Vec<String> {
        if self.is_stopped() {
            return Vec::new();
        }
        let mut active = Vec::new();
        for stream in self.all_streams().await {
            if stream.health_check().await > 0 {
                active.push(stream.uri().to_string());
            }
        }
        active
    }

    async fn snapshot_due(&self) -> bool {
        let last = *self.last_snap.lock().await;
        self.should_snap(last)
    }

    fn should_snap(&self, last: Option<Instant>) -> bool {
        match self.config.snapshot_interval {
            None => false,
            Some(interval) => last.map_or(true, |t| t.elapsed() >= interval),
        }
    }

    /// Start a snapshot for each camera in `cams` (all active streams when
    /// `None`). Unforced passes only run once per snapshot interval.
    /// Returns the number of cameras with a capture in flight.
    pub async fn snap_all(&self, cams: Option<&[String]>, force: bool) -> usize {
        {
            let mut last = self.last_snap.lock().await;
            if !force && !self.should_snap(*last) {
                return 0;
            }
            *last = Some(Instant::now());
        }

        let cams = match cams {
            Some(cams) => cams.to_vec(),
            None => self.active_streams().await,
        };

        let mut started = 0;
        for uri in &cams {
            let Some(stream) = self.get(uri).await else {
                continue;
            };
            stream.start().await;
            match self.snapshots.restart(uri).await {
                Ok(_) => started += 1,
                Err(e) => {
                    counter!("bridge_snapshots_total", "outcome" => "error").increment(1);
                    warn!("{}", e);
                }
            }
        }

        if started > 0 {
            debug!("[STREAM] Snapshot pass over {} camera(s)", started);
        }
        started
    }

    /// Capture one snapshot and wait for it. False when the stream is
    /// unhealthy or the capture fails or times out.
    pub async fn get_rtsp_snap(&self, uri: &str) -> bool {
        let Some(stream) = self.get(uri).await else {
            return false;
        };
        if stream.health_check().await < 1 {
            return false;
        }
        stream.start().await;

        match self.snapshots.capture(uri).await {
            Ok(()) => {
                counter!("bridge_snapshots_total", "outcome" => "success").increment(1);
                self.publisher.preview(uri).await;
                true
            }
            Err(e) => {
                counter!("bridge_snapshots_total", "outcome" => "failed").increment(1);
                info!("❗ {}", e);
                false
            }
        }
    }

    /// Dispatch a command to a camera.
    ///
    /// `all`/`update_snapshot` forces a snapshot pass. Successful results
    /// are mirrored to the publisher under `<cam>/<cmd>`.
    pub async fn send_cmd(&self, cam: &str, cmd: &str, payload: Value) -> CommandResult {
        if cam == "all" && cmd == UPDATE_SNAPSHOT {
            self.snap_all(None, true).await;
            return CommandResult::success(cmd, payload, None);
        }

        let Some(stream) = self.get(cam).await else {
            return CommandResult::error(cmd, payload, "Camera not found");
        };

        let result = stream.send_cmd(cmd, &payload).await;
        let status = if result.is_success() { "success" } else { "error" };
        counter!("bridge_commands_total", "status" => status).increment(1);

        if result.update_snapshot {
            let on_demand = !stream.connected();
            let snap = self.get_rtsp_snap(cam).await;
            if on_demand {
                stream.stop().await;
            }

            let stamp = if snap { unix_time() } else { 0 };
            self.publisher
                .publish(&format!("{cam}/{cmd}"), stamp.to_string(), false)
                .await;

            let mut outcome = if snap {
                CommandResult::success(cmd, payload, Some(Value::Bool(true)))
            } else {
                CommandResult::error(cmd, payload, "")
            };
            outcome.value = Some(Value::Bool(snap));
            outcome.response = Some(Value::Bool(snap));
            return outcome;
        }

        if result.is_success() {
            self.publisher
                .publish(&format!("{cam}/{cmd}"), result.mirror_value(), false)
                .await;
        }
        result
    }

    /// Handle one inbound event
    pub async fn handle_event(&self, event: StreamEvent) {
        let Some(stream) = self.get(&event.uri).await else {
            debug!("[STREAM] {} event for unknown stream {}", event.kind, event.uri);
            return;
        };
        let uri = event.uri;
        debug!("[{}] {}", uri, event.kind);

        match event.kind {
            EventKind::Ready => {
                self.publisher
                    .publish(&format!("{uri}/state"), "online".to_string(), true)
                    .await;
            }
            EventKind::NotReady => {
                self.publisher
                    .publish(&format!("{uri}/state"), "stopped".to_string(), true)
                    .await;
            }
            EventKind::Read => {
                if !stream.connected() {
                    info!("[{}] Starting on demand", uri);
                    stream.start().await;
                }
            }
            EventKind::Unread => {}
            EventKind::Motion => {
                self.motion_seen.lock().await.insert(uri.clone(), Instant::now());
                if !stream.motion() {
                    stream.set_motion(true);
                    self.publisher
                        .publish(&format!("{uri}/motion"), "1".to_string(), false)
                        .await;
                }
            }
            EventKind::MotionClear => {
                self.motion_seen.lock().await.remove(&uri);
                self.clear_motion(stream.as_ref()).await;
            }
        }
    }

    async fn clear_motion(&self, stream: &dyn Stream) {
        if stream.motion() {
            stream.set_motion(false);
            self.publisher
                .publish(&format!("{}/motion", stream.uri()), "2".to_string(), false)
                .await;
        }
    }

    /// Clear motion on streams without a motion event for `motion_timeout`
    async fn check_motion(&self) {
        let expired: Vec<String> = {
            let mut seen = self.motion_seen.lock().await;
            let expired: Vec<String> = seen
                .iter()
                .filter(|(_, at)| at.elapsed() >= self.config.motion_timeout)
                .map(|(uri, _)| uri.clone())
                .collect();
            for uri in &expired {
                seen.remove(uri);
            }
            expired
        };

        for uri in expired {
            if let Some(stream) = self.get(&uri).await {
                self.clear_motion(stream.as_ref()).await;
            }
        }
    }

    async fn drain_events(&self, events: &mut mpsc::Receiver<StreamEvent>) {
        match tokio::time::timeout(self.config.tick, events.recv()).await {
            Ok(Some(event)) => {
                self.handle_event(event).await;
                while let Ok(event) = events.try_recv() {
                    self.handle_event(event).await;
                }
            }
            Ok(None) => tokio::time::sleep(self.config.tick).await,
            Err(_) => {}
        }
    }

    /// Run the supervisory loop until [`StreamManager::stop_all`]
    pub async fn monitor(self: Arc<Self>, health: Arc<dyn HealthCheck>) {
        let Some(mut events) = self.events_rx.lock().await.take() else {
            warn!("[STREAM] Monitor is already running");
            return;
        };
        if self.is_stopped() {
            *self.events_rx.lock().await = Some(events);
            return;
        }

        if let Some(interval) = self.config.preview_interval {
            // Checked under the task lock: `stop_all` raises the flag before
            // draining, so a preview task is either joined or never spawned.
            let mut tasks = self.tasks.lock().await;
            if !self.is_stopped() {
                tasks.push(tokio::spawn(self.clone().preview_loop(interval)));
            }
        }

        info!("🎬 {} stream(s) enabled", self.active().await);
        let mut status_task = PeriodicTask::new(self.config.health_interval);

        while !self.is_stopped() {
            self.drain_events(&mut events).await;
            if self.is_stopped() {
                break;
            }

            if self.snapshot_due().await {
                let active = self.active_streams().await;
                self.snap_all(Some(&active), false).await;
            }

            self.check_motion().await;

            if status_task.poll(Instant::now()) {
                health.check().await;
                self.publisher
                    .publish("state", "online".to_string(), false)
                    .await;
            }
        }

        *self.events_rx.lock().await = Some(events);
        info!("[STREAM] Stream monitoring stopped");
    }

    /// Spawn [`StreamManager::monitor`] on the runtime
    pub async fn spawn_monitor(self: &Arc<Self>, health: Arc<dyn HealthCheck>) {
        let handle = tokio::spawn(self.clone().monitor(health));
        self.tasks.lock().await.push(handle);
    }

    async fn preview_loop(self: Arc<Self>, interval: Duration) {
        for uri in self.uris().await {
            self.publisher.preview(&uri).await;
        }

        while !self.is_stopped() {
            for (uri, ok) in self.snapshots.reap_finished().await {
                let outcome = if ok { "success" } else { "failed" };
                counter!("bridge_snapshots_total", "outcome" => outcome).increment(1);
                if ok {
                    self.publisher.preview(&uri).await;
                } else {
                    debug!("[{}] Background snapshot failed", uri);
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Stop every stream and wait for the monitor to exit. Safe to call
    /// more than once.
    pub async fn stop_all(&self) {
        let streams = self.all_streams().await;
        info!("[STREAM] Stopping {} stream(s)", streams.len());
        self.stop_flag.store(true, Ordering::SeqCst);

        for stream in streams {
            stream.stop().await;
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("[STREAM] Background task ended abnormally: {}", e);
            }
        }

        self.snapshots.kill_all().await;
    }
}

#[async_trait]
impl CommandSink for StreamManager {
    async fn send_cmd(&self, cam: &str, cmd: &str, payload: Value) -> CommandResult {
        StreamManager::send_cmd(self, cam, cmd, payload).await
    }

    async fn stream_uris(&self) -> Vec<String> {
        self.uris().await
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::NullPublisher;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, AtomicUsize};

    struct FakeStream {
        uri: String,
        health: AtomicI32,
        connected: AtomicBool,
        motion: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        checks: AtomicUsize,
    }

    impl FakeStream {
        fn new(uri: &str, health: i32) -> Arc<Self> {
            Arc::new(Self {
                uri: uri.to_string(),
                health: AtomicI32::new(health),
                connected: AtomicBool::new(false),
                motion: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                checks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Stream for FakeStream {
        fn uri(&self) -> &str {
            &self.uri
        }

        async fn start(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            true
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }

        fn enabled(&self) -> bool {
            true
        }

        fn connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn health_check(&self) -> i32 {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.health.load(Ordering::SeqCst)
        }

        fn motion(&self) -> bool {
            self.motion.load(Ordering::SeqCst)
        }

        fn set_motion(&self, motion: bool) {
            self.motion.store(motion, Ordering::SeqCst);
        }

        fn status(&self) -> StreamStatus {
            if self.connected() {
                StreamStatus::Connected
            } else {
                StreamStatus::Stopped
            }
        }

        async fn send_cmd(&self, cmd: &str, payload: &Value) -> CommandResult {
            match cmd {
                UPDATE_SNAPSHOT => CommandResult::snapshot_request(cmd, payload.clone()),
                "irled" => CommandResult::success(cmd, payload.clone(), Some(payload.clone())),
                _ => CommandResult::error(cmd, payload.clone(), "Invalid command"),
            }
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: std::sync::Mutex<Vec<(String, String, bool)>>,
        previews: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn topic(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, p, _)| p.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: String, retain: bool) {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, retain));
        }

        async fn preview(&self, uri: &str) {
            self.previews.lock().unwrap().push(uri.to_string());
        }
    }

    #[derive(Default)]
    struct CountingHealth(AtomicUsize);

    #[async_trait]
    impl HealthCheck for CountingHealth {
        async fn check(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            tick: Duration::from_millis(20),
            health_interval: Duration::from_secs(60),
            snapshot_interval: Some(Duration::from_secs(60)),
            snapshot_timeout: Duration::from_secs(2),
            preview_interval: None,
            motion_timeout: Duration::from_secs(60),
        }
    }

    fn manager_with(program: &str, config: ManagerConfig) -> (Arc<StreamManager>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let manager = StreamManager::new(
            config,
            SnapshotCommand::new(program, Vec::new()),
            publisher.clone(),
        );
        (Arc::new(manager), publisher)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let manager = StreamManager::new(ManagerConfig::default(), SnapshotCommand::new("true", vec![]), Arc::new(NullPublisher));
        assert_eq!(manager.add(FakeStream::new("FRONT", 1)).await, "FRONT");
        assert!(manager.get("FRONT").await.is_some());
        assert!(manager.get("BACK").await.is_none());
        assert_eq!(manager.total().await, 1);
    }

    #[tokio::test]
    async fn test_active_streams_excludes_unhealthy() {
        let (manager, _) = manager_with("true", config());
        manager.add(FakeStream::new("FRONT", 3)).await;
        manager.add(FakeStream::new("BACK", 0)).await;
        manager.add(FakeStream::new("GONE", -90)).await;

        assert_eq!(manager.active_streams().await, vec!["FRONT".to_string()]);

        manager.stop_all().await;
        assert!(manager.active_streams().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_snapshot_all_always_succeeds() {
        let (manager, _) = manager_with("true", config());
        let healthy = FakeStream::new("FRONT", 1);
        manager.add(healthy.clone()).await;
        manager.add(FakeStream::new("BACK", -90)).await;

        // First pass consumes the pacing window
        assert_eq!(manager.snap_all(None, false).await, 1);
        let result = manager.send_cmd("all", UPDATE_SNAPSHOT, Value::Null).await;
        assert!(result.is_success());
        assert_eq!(healthy.starts.load(Ordering::SeqCst), 2);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let (manager, publisher) = manager_with("true", config());
        let result = manager.send_cmd("NOPE", "irled", json!(1)).await;
        assert!(!result.is_success());
        assert_eq!(result.response, Some(json!("Camera not found")));
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_is_mirrored() {
        let (manager, publisher) = manager_with("true", config());
        manager.add(FakeStream::new("FRONT", 3)).await;

        let result = manager.send_cmd("FRONT", "irled", json!(1)).await;
        assert!(result.is_success());
        assert_eq!(publisher.topic("FRONT/irled"), vec!["1".to_string()]);

        let result = manager.send_cmd("FRONT", "bogus", json!(1)).await;
        assert!(!result.is_success());
        assert!(publisher.topic("FRONT/bogus").is_empty());
    }

    #[tokio::test]
    async fn test_update_snapshot_on_demand() {
        let (manager, publisher) = manager_with("true", config());
        let stream = FakeStream::new("FRONT", 1);
        manager.add(stream.clone()).await;

        let result = manager.send_cmd("FRONT", UPDATE_SNAPSHOT, Value::Null).await;
        assert!(result.is_success());
        assert_eq!(result.value, Some(json!(true)));
        // Brought up for the capture, then torn down again
        assert_eq!(stream.starts.load(Ordering::SeqCst), 1);
        assert_eq!(stream.stops.load(Ordering::SeqCst), 1);

        let stamps = publisher.topic("FRONT/update_snapshot");
        assert_eq!(stamps.len(), 1);
        assert_ne!(stamps[0], "0");
        assert_eq!(*publisher.previews.lock().unwrap(), vec!["FRONT".to_string()]);
    }

    #[tokio::test]
    async fn test_update_snapshot_keeps_connected_stream() {
        let (manager, _) = manager_with("true", config());
        let stream = FakeStream::new("FRONT", 3);
        stream.start().await;
        manager.add(stream.clone()).await;

        manager.send_cmd("FRONT", UPDATE_SNAPSHOT, Value::Null).await;
        assert_eq!(stream.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_snapshot() {
        let (manager, publisher) = manager_with("false", config());
        manager.add(FakeStream::new("FRONT", 3)).await;

        let result = manager.send_cmd("FRONT", UPDATE_SNAPSHOT, Value::Null).await;
        assert!(!result.is_success());
        assert_eq!(result.value, Some(json!(false)));
        assert_eq!(publisher.topic("FRONT/update_snapshot"), vec!["0".to_string()]);
    }

    #[tokio::test]
    async fn test_unhealthy_stream_skips_snapshot() {
        let (manager, _) = manager_with("true", config());
        let stream = FakeStream::new("FRONT", 0);
        manager.add(stream.clone()).await;
        assert!(!manager.get_rtsp_snap("FRONT").await);
        assert_eq!(stream.starts.load(Ordering::SeqCst), 0);
        assert!(!manager.get_rtsp_snap("NOPE").await);
    }

    #[tokio::test]
    async fn test_snap_all_is_paced() {
        let (manager, _) = manager_with("sleep", config());
        manager.add(FakeStream::new("FRONT", 3)).await;

        assert_eq!(manager.snap_all(None, false).await, 1);
        assert_eq!(manager.snap_all(None, false).await, 0);
        assert_eq!(manager.snap_all(None, true).await, 1);
        assert_eq!(manager.snap_all(None, false).await, 0);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_no_periodic_snapshots_without_interval() {
        let config = ManagerConfig {
            snapshot_interval: None,
            ..config()
        };
        let (manager, _) = manager_with("true", config);
        manager.add(FakeStream::new("FRONT", 3)).await;
        assert_eq!(manager.snap_all(None, false).await, 0);
    }

    #[tokio::test]
    async fn test_monitor_handles_events_and_stops() {
        let config = ManagerConfig {
            motion_timeout: Duration::from_millis(150),
            preview_interval: Some(Duration::from_millis(20)),
            ..config()
        };
        let (manager, publisher) = manager_with("true", config);
        let stream = FakeStream::new("FRONT", 3);
        manager.add(stream.clone()).await;

        let health = Arc::new(CountingHealth::default());
        manager.spawn_monitor(health.clone()).await;

        let events = manager.events();
        events.send(StreamEvent::new("FRONT", EventKind::Motion)).await.unwrap();
        events.send(StreamEvent::new("FRONT", EventKind::Ready)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(stream.motion());
        assert_eq!(publisher.topic("FRONT/motion"), vec!["1".to_string()]);
        assert_eq!(publisher.topic("FRONT/state"), vec!["online".to_string()]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!stream.motion());
        assert_eq!(publisher.topic("FRONT/motion"), vec!["1".to_string(), "2".to_string()]);

        // Health runs on the first iteration and then once per interval
        assert_eq!(health.0.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.topic("state"), vec!["online".to_string()]);
        assert!(publisher.previews.lock().unwrap().contains(&"FRONT".to_string()));

        manager.stop_all().await;
        assert!(manager.is_stopped());
        assert!(stream.stops.load(Ordering::SeqCst) >= 1);

        // Second stop is a no-op
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_right_after_spawn() {
        let config = ManagerConfig {
            preview_interval: Some(Duration::from_millis(20)),
            ..config()
        };
        let (manager, _) = manager_with("true", config);
        manager.add(FakeStream::new("FRONT", 3)).await;

        manager.spawn_monitor(Arc::new(CountingHealth::default())).await;
        let stopped = tokio::time::timeout(Duration::from_secs(3), manager.stop_all()).await;
        assert!(stopped.is_ok());
        assert!(manager.is_stopped());
        assert!(manager.tasks.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.tasks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_skips_health_checks_between_passes() {
        let config = ManagerConfig {
            snapshot_interval: None,
            ..config()
        };
        let (manager, _) = manager_with("true", config);
        let stream = FakeStream::new("FRONT", 3);
        manager.add(stream.clone()).await;

        manager.spawn_monitor(Arc::new(CountingHealth::default())).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        manager.stop_all().await;
        assert_eq!(stream.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_read_event_starts_on_demand() {
        let (manager, _) = manager_with("true", config());
        let stream = FakeStream::new("FRONT", 1);
        manager.add(stream.clone()).await;

        manager.handle_event(StreamEvent::new("FRONT", EventKind::Read)).await;
        assert!(stream.connected());
        manager.handle_event(StreamEvent::new("NOPE", EventKind::Read)).await;
    }

    #[tokio::test]
    async fn test_status_summary() {
        let (manager, _) = manager_with("true", config());
        let stream = FakeStream::new("FRONT", 1);
        stream.set_motion(true);
        manager.add(stream).await;

        let status = manager.status().await;
        assert_eq!(
            status.get("FRONT"),
            Some(&StreamInfo { status: StreamStatus::Stopped, motion: true })
        );
    }
}
