//! Connection manager.
//!
//! Owns the socket lifecycle and the write side of the link. A single task
//! consumes the command queue and drives a three-state machine:
//!
//! ```text
//!                  PollConnection (accept/connect, bounded wait)
//!                  +---+
//!                  |   v
//!   start --> AwaitingConnection --Connection--> Connected --+
//!                  ^                                 |       | WriteRequest
//!                  +---------- Disconnection --------+ <-----+
//!
//!   any --Stop--> Terminating
//! ```
//!
//! Events the loop emits for itself go through a loop-local FIFO so the loop
//! never waits on its own bounded queue.

use crate::config::{LinkConfig, Role};
use crate::error::LinkError;
use crate::event::{LinkEvent, LinkHandle};
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Connection manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingConnection,
    Connected,
    Terminating,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::AwaitingConnection => write!(f, "awaiting_connection"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Terminating => write!(f, "terminating"),
        }
    }
}

/// Told about every connection the manager installs or tears down.
///
/// Calls are made from the manager task and must not block.
pub trait PeerObserver: Send + Sync {
    /// A new connection is up; `reader` is its read half.
    fn peer_connected(&self, reader: OwnedReadHalf, epoch: u64);

    /// The connection `epoch` has been closed by the manager.
    fn peer_disconnected(&self, epoch: u64);
}

/// Side effect attached to a transition.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Install,
    Reaffirm,
    Write(Bytes),
    Close,
    Poll,
    Terminate,
}

/// Transition table. `None` means the event is ignored in this state.
fn transition(state: ConnectionState, event: LinkEvent) -> Option<(ConnectionState, Action)> {
    use ConnectionState::*;

    match (state, event) {
        (AwaitingConnection, LinkEvent::Connected) => Some((Connected, Action::Install)),
        (AwaitingConnection, LinkEvent::PollConnection) => {
            Some((AwaitingConnection, Action::Poll))
        }
        (Connected, LinkEvent::Connected) => Some((Connected, Action::Reaffirm)),
        (Connected, LinkEvent::WriteRequest(bytes)) => Some((Connected, Action::Write(bytes))),
        (Connected, LinkEvent::Disconnected { .. }) => Some((AwaitingConnection, Action::Close)),
        (AwaitingConnection | Connected, LinkEvent::Stop) => Some((Terminating, Action::Terminate)),
        _ => None,
    }
}

/// Writes one encoded frame, retrying the remainder of a short write once.
///
/// Every failure is a [`LinkError::Transport`]. A write that is still short
/// after the retry carries [`io::ErrorKind::WriteZero`].
pub(crate) async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let written = writer.write(bytes).await.map_err(LinkError::Transport)?;
    if written == bytes.len() {
        return Ok(());
    }

    let rest = &bytes[written..];
    let retried = writer.write(rest).await.map_err(LinkError::Transport)?;
    if retried == rest.len() {
        return Ok(());
    }

    Err(LinkError::Transport(io::Error::new(
        io::ErrorKind::WriteZero,
        format!("short write: {} of {} bytes", written + retried, bytes.len()),
    )))
}

/// Owns the socket and serializes all writes to the peer.
pub struct ConnectionManager {
    config: LinkConfig,
    handle: LinkHandle,
    epoch: Arc<AtomicU64>,
    rx: Option<mpsc::Receiver<LinkEvent>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Allocates the command queue. Nothing is bound or connected yet.
    pub fn new(config: LinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let (state_tx, state_rx) = watch::channel(ConnectionState::AwaitingConnection);
        let epoch = Arc::new(AtomicU64::new(0));

        Self {
            handle: LinkHandle::new(tx, epoch.clone()),
            config,
            epoch,
            rx: Some(rx),
            state_tx: Some(state_tx),
            state_rx,
            local_addr: None,
            task: None,
        }
    }

    /// Returns a producer handle for the command queue.
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Address the listener is bound to (server role, once started).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Epoch of the current (or last) connection.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Binds (server) or records the target (client) and spawns the loop.
    pub async fn start(&mut self, observer: Arc<dyn PeerObserver>) -> Result<(), LinkError> {
        if self.rx.is_none() || self.state_tx.is_none() {
            return Err(LinkError::AlreadyStarted);
        }

        let acceptor = match self.config.role {
            Role::Server => {
                let listener = TcpListener::bind(self.config.addr)
                    .await
                    .map_err(LinkError::Setup)?;
                let local_addr = listener.local_addr().map_err(LinkError::Setup)?;
                tracing::info!("Listening for peer on {}", local_addr);
                self.local_addr = Some(local_addr);
                Acceptor::Listen(listener)
            }
            Role::Client => {
                tracing::info!("Connecting to peer at {}", self.config.addr);
                Acceptor::Connect(self.config.addr)
            }
        };

        let (Some(rx), Some(state_tx)) = (self.rx.take(), self.state_tx.take()) else {
            return Err(LinkError::AlreadyStarted);
        };

        let mut run = ManagerLoop {
            rx,
            loopback: VecDeque::new(),
            state: ConnectionState::AwaitingConnection,
            state_tx,
            acceptor,
            poll_interval: self.config.poll_interval(),
            nodelay: self.config.nodelay,
            pending: None,
            peer: None,
            epoch: self.epoch.clone(),
            observer,
        };
        run.loopback.push_back(LinkEvent::PollConnection);

        self.task = Some(tokio::spawn(run.run()));
        Ok(())
    }

    /// Stops the loop and waits for it to release the socket and the queue.
    ///
    /// Calling this more than once, or before `start`, is harmless.
    pub async fn stop(&mut self) {
        match self.task.take() {
            Some(task) => {
                self.handle.request_stop().await;
                if let Err(e) = task.await {
                    tracing::error!("Connection manager task failed: {}", e);
                }
            }
            None => {
                self.rx = None;
                if let Some(state_tx) = self.state_tx.take() {
                    state_tx.send_replace(ConnectionState::Terminating);
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Acceptor {
    Listen(TcpListener),
    Connect(SocketAddr),
}

struct Peer {
    addr: SocketAddr,
    writer: OwnedWriteHalf,
}

struct ManagerLoop {
    rx: mpsc::Receiver<LinkEvent>,
    loopback: VecDeque<LinkEvent>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    acceptor: Acceptor,
    poll_interval: Duration,
    nodelay: bool,
    pending: Option<(TcpStream, SocketAddr)>,
    peer: Option<Peer>,
    epoch: Arc<AtomicU64>,
    observer: Arc<dyn PeerObserver>,
}

impl ManagerLoop {
    async fn run(mut self) {
        loop {
            let event = self.next_event().await;

            if let LinkEvent::Disconnected { epoch } = event {
                let current = self.epoch.load(Ordering::Acquire);
                if epoch != current {
                    tracing::debug!(
                        "Ignoring disconnect of connection {} (current {})",
                        epoch,
                        current
                    );
                    continue;
                }
            }

            let name = event.name();
            let Some((next, action)) = transition(self.state, event) else {
                tracing::debug!("Ignoring {} while {}", name, self.state);
                continue;
            };

            match action {
                Action::Install => {
                    if !self.install() {
                        self.loopback.push_back(LinkEvent::PollConnection);
                        continue;
                    }
                }
                Action::Reaffirm => tracing::debug!("Connection re-affirmed"),
                Action::Write(bytes) => self.write(bytes).await,
                Action::Close => self.close(),
                Action::Poll => self.poll().await,
                Action::Terminate => {
                    self.pending = None;
                    self.peer = None;
                    self.set_state(next);
                    break;
                }
            }

            self.set_state(next);
        }

        tracing::info!("Connection manager stopped");
    }

    /// Loop-local events first, except that a pending poll yields to
    /// anything already waiting in the queue.
    async fn next_event(&mut self) -> LinkEvent {
        if let Some(event) = self.loopback.pop_front() {
            if event == LinkEvent::PollConnection {
                match self.rx.try_recv() {
                    Ok(external) => {
                        self.loopback.push_front(event);
                        return external;
                    }
                    Err(TryRecvError::Disconnected) => return LinkEvent::Stop,
                    Err(TryRecvError::Empty) => {}
                }
            }
            return event;
        }

        self.rx.recv().await.unwrap_or(LinkEvent::Stop)
    }

    fn set_state(&mut self, next: ConnectionState) {
        self.state = next;
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn poll(&mut self) {
        let started = Instant::now();
        let result = match &self.acceptor {
            Acceptor::Listen(listener) => {
                tokio::time::timeout(self.poll_interval, listener.accept()).await
            }
            Acceptor::Connect(addr) => {
                let addr = *addr;
                tokio::time::timeout(self.poll_interval, TcpStream::connect(addr))
                    .await
                    .map(|connected| connected.map(|stream| (stream, addr)))
            }
        };

        match result {
            Ok(Ok(pending)) => {
                self.pending = Some(pending);
                self.loopback.push_back(LinkEvent::Connected);
                return;
            }
            Ok(Err(e)) => {
                match &self.acceptor {
                    Acceptor::Listen(_) => tracing::warn!("Accept error: {}", e),
                    Acceptor::Connect(addr) => {
                        tracing::debug!("Connect to {} failed: {}", addr, e)
                    }
                }
                tokio::time::sleep_until(started + self.poll_interval).await;
            }
            Err(_) => tracing::trace!("No peer within {:?}", self.poll_interval),
        }

        self.loopback.push_back(LinkEvent::PollConnection);
    }

    fn install(&mut self) -> bool {
        let Some((stream, addr)) = self.pending.take() else {
            return false;
        };

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
            }
        }

        let (reader, writer) = stream.into_split();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.peer = Some(Peer { addr, writer });

        tracing::info!("Peer connected: {} (connection {})", addr, epoch);
        self.observer.peer_connected(reader, epoch);
        true
    }

    async fn write(&mut self, bytes: Bytes) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };

        match write_frame(&mut peer.writer, &bytes).await {
            Ok(()) => tracing::trace!("[{}] Wrote {} bytes", peer.addr, bytes.len()),
            Err(e) => {
                match &e {
                    LinkError::Transport(source) if source.kind() == io::ErrorKind::WriteZero => {
                        tracing::error!("[{}] {}", peer.addr, e)
                    }
                    _ => tracing::warn!("[{}] Write failed: {}", peer.addr, e),
                }
                let epoch = self.epoch.load(Ordering::Acquire);
                self.loopback.push_back(LinkEvent::Disconnected { epoch });
            }
        }
    }

    fn close(&mut self) {
        let epoch = self.epoch.load(Ordering::Acquire);
        if let Some(peer) = self.peer.take() {
            tracing::info!("Peer disconnected: {} (connection {})", peer.addr, epoch);
        }
        self.observer.peer_disconnected(epoch);
        self.loopback.push_back(LinkEvent::PollConnection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carto_protocol::{Decoder, Message};
    use parking_lot::Mutex;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Recorder {
        readers: Mutex<Vec<(u64, OwnedReadHalf)>>,
        disconnects: Mutex<Vec<u64>>,
    }

    impl PeerObserver for Recorder {
        fn peer_connected(&self, reader: OwnedReadHalf, epoch: u64) {
            self.readers.lock().push((epoch, reader));
        }

        fn peer_disconnected(&self, epoch: u64) {
            self.disconnects.lock().push(epoch);
            self.readers.lock().retain(|(e, _)| *e != epoch);
        }
    }

    /// Accepts at most `limit` bytes per write call.
    struct Trickle {
        limit: usize,
        written: Vec<u8>,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.limit);
            self.written.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn test_config() -> LinkConfig {
        LinkConfig::server("127.0.0.1:0".parse().unwrap())
            .with_poll_interval(Duration::from_millis(50))
    }

    async fn wait_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        tokio::time::timeout(WAIT, rx.wait_for(|state| *state == want))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    async fn read_messages(stream: &mut TcpStream, count: usize) -> Vec<Message> {
        let mut decoder = Decoder::new();
        let mut messages = Vec::new();
        let mut buf = [0u8; 256];
        while messages.len() < count {
            let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed early");
            decoder.extend(&buf[..n]);
            while let Some(message) = decoder.decode_message().unwrap() {
                messages.push(message);
            }
        }
        messages
    }

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;

        assert_eq!(
            transition(AwaitingConnection, LinkEvent::Connected),
            Some((Connected, Action::Install))
        );
        assert_eq!(
            transition(AwaitingConnection, LinkEvent::PollConnection),
            Some((AwaitingConnection, Action::Poll))
        );
        assert_eq!(
            transition(AwaitingConnection, LinkEvent::WriteRequest(Bytes::new())),
            None
        );
        assert_eq!(
            transition(AwaitingConnection, LinkEvent::Disconnected { epoch: 1 }),
            None
        );
        assert_eq!(
            transition(Connected, LinkEvent::Connected),
            Some((Connected, Action::Reaffirm))
        );
        assert_eq!(
            transition(Connected, LinkEvent::WriteRequest(Bytes::from_static(b"x"))),
            Some((Connected, Action::Write(Bytes::from_static(b"x"))))
        );
        assert_eq!(
            transition(Connected, LinkEvent::Disconnected { epoch: 1 }),
            Some((AwaitingConnection, Action::Close))
        );
        assert_eq!(transition(Connected, LinkEvent::PollConnection), None);
        assert_eq!(
            transition(Connected, LinkEvent::Stop),
            Some((Terminating, Action::Terminate))
        );
        assert_eq!(
            transition(AwaitingConnection, LinkEvent::Stop),
            Some((Terminating, Action::Terminate))
        );
        assert_eq!(transition(Terminating, LinkEvent::Connected), None);
        assert_eq!(transition(Terminating, LinkEvent::Stop), None);
    }

    #[tokio::test]
    async fn test_short_write_retried_once() {
        let mut writer = Trickle {
            limit: 4,
            written: Vec::new(),
        };
        write_frame(&mut writer, &[0, 4, 5, 0, 3, 7]).await.unwrap();
        assert_eq!(writer.written, vec![0, 4, 5, 0, 3, 7]);
    }

    #[tokio::test]
    async fn test_persistent_short_write_fails() {
        let mut writer = Trickle {
            limit: 2,
            written: Vec::new(),
        };
        let err = write_frame(&mut writer, &[0, 4, 5, 0, 3, 7])
            .await
            .unwrap_err();
        match &err {
            LinkError::Transport(e) => assert_eq!(e.kind(), io::ErrorKind::WriteZero),
            other => panic!("expected a transport error, got {:?}", other),
        }
        assert!(err.to_string().starts_with("transport error: short write: 4 of 6"));
        assert_eq!(writer.written.len(), 4);
    }

    #[tokio::test]
    async fn test_closed_writer_is_transport_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut writer = client;

        let err = write_frame(&mut writer, &[0, 2, 3, 0]).await.unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_writes_in_order() {
        let recorder = Arc::new(Recorder::default());
        let mut manager = ConnectionManager::new(test_config());
        manager.start(recorder.clone()).await.unwrap();
        let addr = manager.local_addr().unwrap();
        let mut states = manager.subscribe();

        let mut client = TcpStream::connect(addr).await.unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;
        assert_eq!(manager.epoch(), 1);
        assert_eq!(recorder.readers.lock().len(), 1);

        let link = manager.handle();
        let sent: Vec<Message> = (0..20u8)
            .map(|i| Message::SetRobotPosition { x: i, y: 20 - i })
            .collect();
        for message in &sent {
            link.send_message_async(message).await.unwrap();
        }

        assert_eq!(read_messages(&mut client, sent.len()).await, sent);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stale_disconnect_ignored() {
        let recorder = Arc::new(Recorder::default());
        let mut manager = ConnectionManager::new(test_config());
        manager.start(recorder.clone()).await.unwrap();
        let mut states = manager.subscribe();

        let mut client = TcpStream::connect(manager.local_addr().unwrap())
            .await
            .unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;

        let link = manager.handle();
        link.notify_disconnected_epoch(0).await.unwrap();
        link.send_message(&Message::MoveDone).unwrap();

        // The write after the stale notice still reaches the peer.
        assert_eq!(read_messages(&mut client, 1).await, vec![Message::MoveDone]);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(recorder.disconnects.lock().is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_notify_disconnected_then_reconnect() {
        let recorder = Arc::new(Recorder::default());
        let mut manager = ConnectionManager::new(test_config());
        manager.start(recorder.clone()).await.unwrap();
        let addr = manager.local_addr().unwrap();
        let mut states = manager.subscribe();

        let first = TcpStream::connect(addr).await.unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;

        manager.handle().notify_disconnected().unwrap();
        wait_state(&mut states, ConnectionState::AwaitingConnection).await;
        assert_eq!(*recorder.disconnects.lock(), vec![1]);
        drop(first);

        let mut second = TcpStream::connect(addr).await.unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;
        assert_eq!(manager.epoch(), 2);

        manager
            .handle()
            .send_message(&Message::RobotPositionReceived)
            .unwrap();
        assert_eq!(
            read_messages(&mut second, 1).await,
            vec![Message::RobotPositionReceived]
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_broken_pipe_triggers_reconnection() {
        let recorder = Arc::new(Recorder::default());
        let mut manager = ConnectionManager::new(test_config());
        manager.start(recorder.clone()).await.unwrap();
        let addr = manager.local_addr().unwrap();
        let mut states = manager.subscribe();

        let client = TcpStream::connect(addr).await.unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;
        drop(client);

        // Writes to the closed peer eventually fail and recycle the link.
        let link = manager.handle();
        let deadline = Instant::now() + WAIT;
        while manager.state() == ConnectionState::Connected {
            assert!(Instant::now() < deadline, "write failure never detected");
            let _ = link.send_message(&Message::MoveDone);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.disconnects.lock(), vec![1]);

        let _again = TcpStream::connect(addr).await.unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;
        assert_eq!(manager.epoch(), 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_client_role_retries_until_listener_appears() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let config =
            LinkConfig::client(addr).with_poll_interval(Duration::from_millis(50));
        let mut manager = ConnectionManager::new(config);
        manager.start(Arc::new(Recorder::default())).await.unwrap();
        assert!(manager.local_addr().is_none());
        let mut states = manager.subscribe();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(manager.state(), ConnectionState::AwaitingConnection);

        let listener = TcpListener::bind(addr).await.unwrap();
        let (mut server_side, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .unwrap()
            .unwrap();
        wait_state(&mut states, ConnectionState::Connected).await;

        manager.handle().send_message(&Message::StopRobot).unwrap();
        assert_eq!(
            read_messages(&mut server_side, 1).await,
            vec![Message::StopRobot]
        );
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_queue() {
        let mut manager = ConnectionManager::new(test_config());
        manager.start(Arc::new(Recorder::default())).await.unwrap();
        let link = manager.handle();
        assert!(manager.is_running());

        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Terminating);
        assert!(!manager.is_running());
        assert!(link.is_closed());
        assert!(matches!(
            link.send_message(&Message::MoveDone),
            Err(LinkError::QueueClosed)
        ));

        // Second stop is a no-op.
        manager.stop().await;
        assert!(matches!(
            manager.start(Arc::new(Recorder::default())).await,
            Err(LinkError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut manager = ConnectionManager::new(test_config());
        let link = manager.handle();
        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Terminating);
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn test_bind_failure_is_setup_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = LinkConfig::server(taken.local_addr().unwrap());

        let mut manager = ConnectionManager::new(config);
        let err = manager
            .start(Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Setup(_)));
        assert!(!manager.is_running());
    }
}
