use crate::protocol::{SnapshotData, ViewerMessage};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};
use wsviz_core::{
    read_change, recent_archived_tasks, ArchivedTask, DataLayout, FileChange, WatchSignal,
    WorkspaceStore,
};

const VIEWER_QUEUE: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub layout: DataLayout,
    pub write_timeout: Duration,
}

/// One connected viewer. Outbound messages go through a bounded queue that a
/// per-connection writer task drains into the socket.
pub struct Viewer {
    pub conn_id: String,
    remote: Option<SocketAddr>,
    sender: mpsc::Sender<Message>,
    shutdown: watch::Sender<Option<&'static str>>,
}

/// The receiving half of a [`Viewer`], owned by its connection.
pub struct ViewerQueue {
    pub messages: mpsc::Receiver<Message>,
    pub shutdown: watch::Receiver<Option<&'static str>>,
}

impl Viewer {
    /// Enqueue without waiting. A full or closed queue counts as a dead viewer.
    fn deliver(&self, text: String) -> bool {
        self.sender.try_send(Message::Text(text)).is_ok()
    }

    /// Signal the connection to shut down. Does not go through the message
    /// queue, so it still lands when the queue is full.
    fn close(&self, reason: &'static str) {
        self.shutdown.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn close_reason(&self) -> Option<&'static str> {
        *self.shutdown.borrow()
    }
}

pub struct HubState {
    config: HubConfig,
    started: Instant,
    conn_counter: AtomicU64,
    store: RwLock<WorkspaceStore>,
    viewers: RwLock<HashMap<String, Arc<Viewer>>>,
}

impl HubState {
    pub fn new(config: HubConfig, store: WorkspaceStore) -> Self {
        Self {
            config,
            started: Instant::now(),
            conn_counter: AtomicU64::new(0),
            store: RwLock::new(store),
            viewers: RwLock::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &DataLayout {
        &self.config.layout
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn store(&self) -> &RwLock<WorkspaceStore> {
        &self.store
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    fn attach_viewer(&self, remote: Option<SocketAddr>) -> (Arc<Viewer>, ViewerQueue) {
        let (sender, messages) = mpsc::channel(VIEWER_QUEUE);
        let (shutdown, closed) = watch::channel(None);
        let viewer = Arc::new(Viewer {
            conn_id: self.next_conn_id(),
            remote,
            sender,
            shutdown,
        });
        (
            viewer,
            ViewerQueue {
                messages,
                shutdown: closed,
            },
        )
    }

    /// Archive window read off the async workers.
    pub async fn archived_tasks(&self) -> Vec<ArchivedTask> {
        let archive_dir = self.config.layout.archive_dir();
        let read = tokio::task::spawn_blocking(move || {
            recent_archived_tasks(&archive_dir, Utc::now().date_naive())
        })
        .await;
        match read {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(event = "archive_read_failed", error = %err);
                Vec::new()
            }
        }
    }

    /// Register a new viewer with its `initial_data` already queued.
    ///
    /// The snapshot is queued and the viewer inserted while the store read
    /// lock is held, so a `file_update` can never overtake it.
    pub async fn connect_viewer(
        &self,
        remote: Option<SocketAddr>,
    ) -> Option<(Arc<Viewer>, ViewerQueue)> {
        let (viewer, queue) = self.attach_viewer(remote);
        let archived_tasks = self.archived_tasks().await;

        let store = self.store.read().await;
        let message = ViewerMessage::InitialData {
            data: SnapshotData {
                tasks: store.tasks().to_vec(),
                workspaces: store.workspaces().cloned().collect(),
                archived_tasks,
            },
            timestamp: Utc::now(),
        };
        let text = encode(&message)?;
        if !viewer.deliver(text) {
            warn!(event = "snapshot_error", conn_id = %viewer.conn_id);
            return None;
        }
        let total = {
            let mut viewers = self.viewers.write().await;
            viewers.insert(viewer.conn_id.clone(), viewer.clone());
            viewers.len()
        };
        drop(store);

        info!(
            event = "viewer_connected",
            conn_id = %viewer.conn_id,
            remote = ?viewer.remote,
            total
        );
        Some((viewer, queue))
    }

    pub async fn remove_viewer(&self, viewer: &Viewer, reason: &'static str) {
        viewer.close(reason);
        let removed = self.viewers.write().await.remove(&viewer.conn_id);
        if removed.is_some() {
            info!(event = "viewer_disconnected", conn_id = %viewer.conn_id, reason = reason);
        }
    }

    /// Send to every viewer, dropping any whose queue refuses the message.
    pub async fn broadcast(&self, message: &ViewerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };
        let viewers: Vec<Arc<Viewer>> = self.viewers.read().await.values().cloned().collect();
        let mut sent = 0;
        for viewer in viewers {
            if viewer.deliver(text.clone()) {
                sent += 1;
            } else {
                warn!(event = "send_error", conn_id = %viewer.conn_id);
                self.remove_viewer(&viewer, "send_error").await;
            }
        }
        if sent > 0 {
            debug!(event = "broadcast", viewers = sent);
        }
        sent
    }

    /// Apply one change, then push the resulting snapshot to every viewer.
    /// Returns how many viewers it reached.
    pub async fn handle_file_change(&self, change: FileChange) -> usize {
        let file = self
            .config
            .layout
            .relative(&change.path)
            .display()
            .to_string();

        let layout = self.config.layout.clone();
        let to_read = change.clone();
        let read = tokio::task::spawn_blocking(move || {
            read_change(&layout, &to_read, Utc::now().date_naive())
        })
        .await;
        let pending = match read {
            Ok(Ok(pending)) => pending,
            Ok(Err(err)) => {
                warn!(event = "sync_failed", file = %file, kind = %change.kind, error = %err);
                return 0;
            }
            Err(err) => {
                warn!(event = "sync_failed", file = %file, kind = %change.kind, error = %err);
                return 0;
            }
        };

        let (tasks, workspaces) = {
            let mut store = self.store.write().await;
            let outcome = store.apply_pending(pending, Utc::now());
            info!(event = "file_change", file = %file, kind = %change.kind, outcome = ?outcome);
            if self.viewers.read().await.is_empty() {
                return 0;
            }
            (
                store.tasks().to_vec(),
                store.workspaces().cloned().collect(),
            )
        };

        let message = ViewerMessage::FileUpdate {
            file,
            event: change.kind,
            timestamp: Utc::now(),
            data: SnapshotData {
                tasks,
                workspaces,
                archived_tasks: self.archived_tasks().await,
            },
        };
        self.broadcast(&message).await
    }

    pub async fn run_watch_loop(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<WatchSignal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                WatchSignal::Change(change) => {
                    self.handle_file_change(change).await;
                }
                WatchSignal::Failure(err) => warn!(event = "watch_failure", error = %err),
            }
        }
        info!(event = "watch_loop_stopped");
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let (sink, stream) = socket.split();
        self.serve_viewer(sink, stream, Some(remote)).await;
    }

    /// Run one viewer connection until the peer leaves, a write fails or
    /// times out, or the hub drops the viewer.
    pub async fn serve_viewer<S, R, E>(
        self: Arc<Self>,
        sink: S,
        mut stream: R,
        remote: Option<SocketAddr>,
    ) where
        S: Sink<Message> + Unpin + Send + 'static,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let Some((viewer, queue)) = self.connect_viewer(remote).await else {
            return;
        };
        let mut closed = queue.shutdown.clone();
        let mut writer = tokio::spawn(write_loop(sink, queue, self.config.write_timeout));
        let mut writer_done = false;

        let reason = loop {
            tokio::select! {
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(event = "viewer_close", conn_id = %viewer.conn_id);
                        break "disconnect";
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "read_error", conn_id = %viewer.conn_id, error = %err);
                        break "read_error";
                    }
                },
                _ = closed.changed() => break "dropped",
                _ = &mut writer, if !writer_done => {
                    writer_done = true;
                    break "write_error";
                }
            }
        };

        self.remove_viewer(&viewer, reason).await;
        drop(viewer);
        if !writer_done {
            let _ = writer.await;
        }
    }
}

/// Drain the viewer queue into the socket. On shutdown, send a close frame
/// straight to the socket, past anything still queued.
async fn write_loop<S>(mut sink: S, mut queue: ViewerQueue, write_timeout: Duration)
where
    S: Sink<Message> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = queue.shutdown.changed() => break,
            next = queue.messages.recv() => {
                let Some(msg) = next else {
                    return;
                };
                tokio::select! {
                    sent = tokio::time::timeout(write_timeout, sink.send(msg)) => {
                        if !matches!(sent, Ok(Ok(()))) {
                            return;
                        }
                    }
                    _ = queue.shutdown.changed() => break,
                }
            }
        }
    }

    let reason = (*queue.shutdown.borrow()).unwrap_or("closed");
    let frame = Message::Close(Some(CloseFrame {
        code: 1000,
        reason: reason.into(),
    }));
    let _ = tokio::time::timeout(CLOSE_GRACE.min(write_timeout), sink.send(frame)).await;
}

fn encode(message: &ViewerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(event = "encode_error", error = %err);
            None
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}
