//! TCP streaming of frames and control commands.
//!
//! The server owns one listening socket and serves a single viewer at
//! a time: frames flow out on a paced tick, commands flow back on the
//! same connection, and a disconnect simply returns the server to its
//! accept loop. The viewer side wraps the connection in a pair of
//! tasks and hands decoded frames to the rest of the process through
//! the same latest-wins slot the server uses.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{CommandCodec, ControlCommand};
use crate::error::SkycamError;
use crate::frame::ImageMetadata;
use crate::framing::{FrameCodec, WIRE_OVERHEAD};
use crate::slot::{CommandSlot, ImageSlot};

/// Port the server listens on by default.
pub const DEFAULT_PORT: u16 = 12395;

/// Commands queued towards the send task before the caller blocks.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Connect with a deadline and low-latency socket options.
pub async fn connect_with_timeout(
    addr: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream, SkycamError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| SkycamError::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

// ── StreamServerConfig ───────────────────────────────────────────

/// Configuration for [`StreamServer`].
#[derive(Debug, Clone)]
pub struct StreamServerConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Port to listen on.
    pub port: u16,
    /// Pacing between outgoing frames.
    pub send_interval: Duration,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            send_interval: Duration::from_millis(33),
        }
    }
}

// ── StreamServer ─────────────────────────────────────────────────

/// Camera-side streaming endpoint.
///
/// Frames come out of the [`ImageSlot`] filled by acquisition;
/// commands from the viewer go into the [`CommandSlot`] it drains.
pub struct StreamServer {
    listener: TcpListener,
    frames: Arc<ImageSlot>,
    commands: Arc<CommandSlot>,
    shutdown: CancellationToken,
    send_interval: Duration,
    frames_sent: u64,
}

impl StreamServer {
    /// Bind the listening socket.
    pub async fn bind(
        config: &StreamServerConfig,
        frames: Arc<ImageSlot>,
        commands: Arc<CommandSlot>,
        shutdown: CancellationToken,
    ) -> Result<Self, SkycamError> {
        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
        info!(addr = %listener.local_addr()?, "stream server listening");
        Ok(Self {
            listener,
            frames,
            commands,
            shutdown,
            send_interval: config.send_interval,
            frames_sent: 0,
        })
    }

    /// The bound local address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, SkycamError> {
        Ok(self.listener.local_addr()?)
    }

    /// Frames sent across all connections so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Accept viewers one at a time until shutdown.
    pub async fn run(&mut self) -> Result<(), SkycamError> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "viewer connected");
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(error = %e, "set_nodelay failed");
                        }
                        self.serve_viewer(stream).await;
                        info!(%peer, "viewer disconnected");
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = self.shutdown.cancelled() => break,
            }
        }
        info!(frames = self.frames_sent, "stream server stopped");
        Ok(())
    }

    /// Serve one viewer until it disconnects or shutdown.
    async fn serve_viewer(&mut self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut frames_out = FramedWrite::new(write_half, FrameCodec::new());
        let mut commands_in = FramedRead::new(read_half, CommandCodec::new());
        let mut ticker = tokio::time::interval(self.send_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Nothing pending means nothing to send; the slot
                    // already dropped anything stale.
                    if let Some(frame) = self.frames.try_consume() {
                        if let Err(e) = frames_out.send(frame).await {
                            warn!(error = %e, "frame send failed");
                            return;
                        }
                        self.frames_sent += 1;
                    }
                }
                cmd = commands_in.next() => match cmd {
                    Some(Ok(cmd)) => {
                        debug!(
                            start = cmd.start,
                            stop = cmd.stop,
                            quality = cmd.quality,
                            binning = cmd.binning,
                            "control command received"
                        );
                        if self.commands.publish(cmd) {
                            debug!("replaced unconsumed command");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "command stream failed");
                        return;
                    }
                    None => return,
                },
                _ = self.shutdown.cancelled() => return,
            }
        }
    }
}

// ── ViewerStats ──────────────────────────────────────────────────

/// Receive statistics exposed to the viewer frontend.
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    /// Total frames received since connect.
    pub frames_received: u64,
    /// Total wire bytes received (envelope included).
    pub bytes_received: u64,
    /// Metadata of the most recent frame.
    pub last_meta: Option<ImageMetadata>,
}

// ── ViewerClient ─────────────────────────────────────────────────

/// Viewer-side connection to a stream server.
///
/// Received frames are published to a latest-wins slot so the display
/// and archive layers always see the freshest image without blocking
/// the receive loop; statistics go out on a `tokio::sync::watch`
/// channel.
pub struct ViewerClient {
    frames: Arc<ImageSlot>,
    stats_rx: watch::Receiver<ViewerStats>,
    command_tx: mpsc::Sender<ControlCommand>,
    recv_task: JoinHandle<Result<(), SkycamError>>,
    send_task: JoinHandle<Result<(), SkycamError>>,
    shutdown: CancellationToken,
}

impl ViewerClient {
    /// Connect to a server and spawn the receive and send loops.
    ///
    /// The client stops when `parent` is cancelled, when
    /// [`shutdown`](Self::shutdown) is called, or when the server goes
    /// away.
    pub async fn connect(
        addr: SocketAddr,
        timeout: Duration,
        parent: &CancellationToken,
    ) -> Result<Self, SkycamError> {
        info!(%addr, "connecting to stream server");
        let stream = connect_with_timeout(addr, timeout).await?;
        let (read_half, write_half) = stream.into_split();

        let frames = Arc::new(ImageSlot::new());
        let (stats_tx, stats_rx) = watch::channel(ViewerStats::default());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let shutdown = parent.child_token();

        let recv_task = tokio::spawn(Self::recv_loop(
            read_half,
            Arc::clone(&frames),
            stats_tx,
            shutdown.clone(),
        ));
        let send_task = tokio::spawn(Self::send_loop(write_half, command_rx, shutdown.clone()));

        Ok(Self {
            frames,
            stats_rx,
            command_tx,
            recv_task,
            send_task,
            shutdown,
        })
    }

    /// The slot receiving decoded frames.
    pub fn frames(&self) -> Arc<ImageSlot> {
        Arc::clone(&self.frames)
    }

    /// Obtain a `watch::Receiver` for receive statistics.
    pub fn stats(&self) -> watch::Receiver<ViewerStats> {
        self.stats_rx.clone()
    }

    /// Queue a control command towards the server.
    pub async fn send_command(&self, cmd: ControlCommand) -> Result<(), SkycamError> {
        self.command_tx.send(cmd).await?;
        Ok(())
    }

    /// Whether the receive loop is still attached to the server.
    pub fn is_connected(&self) -> bool {
        !self.recv_task.is_finished()
    }

    /// Stop both loops and wait for them to finish.
    pub async fn shutdown(self) -> Result<(), SkycamError> {
        self.shutdown.cancel();
        let recv = self.recv_task.await?;
        let send = self.send_task.await?;
        recv.and(send)
    }

    async fn recv_loop(
        read_half: OwnedReadHalf,
        frames: Arc<ImageSlot>,
        stats_tx: watch::Sender<ViewerStats>,
        shutdown: CancellationToken,
    ) -> Result<(), SkycamError> {
        let mut frames_in = FramedRead::new(read_half, FrameCodec::new());
        let mut stats = ViewerStats::default();

        loop {
            tokio::select! {
                frame = frames_in.next() => match frame {
                    Some(Ok(frame)) => {
                        stats.frames_received += 1;
                        stats.bytes_received += (frame.payload.len() + WIRE_OVERHEAD) as u64;
                        stats.last_meta = Some(frame.meta);
                        let _ = stats_tx.send(stats.clone());

                        if frames.publish(frame) {
                            debug!("display lagging; replaced unconsumed frame");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "frame stream failed");
                        return Err(e);
                    }
                    None => {
                        info!("server closed the stream");
                        return Ok(());
                    }
                },
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    async fn send_loop(
        write_half: OwnedWriteHalf,
        mut command_rx: mpsc::Receiver<ControlCommand>,
        shutdown: CancellationToken,
    ) -> Result<(), SkycamError> {
        let mut commands_out = FramedWrite::new(write_half, CommandCodec::new());

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => commands_out.send(cmd).await?,
                    None => return Ok(()),
                },
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
