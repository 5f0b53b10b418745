//! UECP listener: TCP and UDP on one port.
//!
//! Every accepted TCP connection runs in its own task with a reassembly
//! buffer, since a stream read may hold half a frame or several. UDP
//! datagrams carry exactly one frame each and are served by a single task.
//! Both feed the same [`FieldSink`], which validates decoded fields, owns
//! the RadioText A/B bank and writes through the [`Transmitter`].
//!
//! Fields that fail with a transport-class error stay pending and are
//! retried on the next frame or on the retry tick, whichever comes first.
//! A newer value for the same field replaces the pending one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use picast_core::config::UecpConfig;
use picast_core::error::{Error, Result};
use picast_core::events::TxEvent;
use picast_core::limits;
use picast_core::transmitter::Transmitter;
use picast_core::transport::Transport;
use picast_core::types::{DiFlags, RtBank, RtSource};
use picast_transport::{TcpTransport, UdpTransport};

use crate::codec::{ACK_MALFORMED, ACK_OK, DecodeResult, UecpFrame, decode_frame, encode_ack};
use crate::message::{UecpCommand, parse_message};

/// Reassembly buffer cap per TCP session.
const MAX_FRAME_BUF: usize = 4096;
/// Largest datagram accepted over UDP.
const MAX_DATAGRAM: usize = 2048;
/// Cadence of the pending-field retry tick.
const RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Receive slice for the UDP loop; cancellation is checked between slices.
const UDP_POLL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Field sink
// ---------------------------------------------------------------------------

/// A validated field ready for the chip. The RT bank is fixed when the
/// field is queued so a retried write keeps its original A/B decision.
#[derive(Debug, Clone, PartialEq)]
enum FieldWrite {
    Pi(u16),
    Ps(String),
    TaTp { ta: bool, tp: bool },
    Di(DiFlags),
    Ms(bool),
    Pty(u8),
    Rt { text: String, bank: RtBank },
}

impl FieldWrite {
    fn field(&self) -> &'static str {
        match self {
            FieldWrite::Pi(_) => "pi",
            FieldWrite::Ps(_) => "ps",
            FieldWrite::TaTp { .. } => "ta_tp",
            FieldWrite::Di(_) => "di",
            FieldWrite::Ms(_) => "ms",
            FieldWrite::Pty(_) => "pty",
            FieldWrite::Rt { .. } => "rt",
        }
    }
}

#[derive(Debug)]
struct SinkState {
    /// Bank of the last RT queued. Starts at B so the first RT goes out on A.
    bank: RtBank,
    last_rt: Option<String>,
    pending: Vec<FieldWrite>,
}

/// Applies decoded UECP commands to the transmitter.
pub(crate) struct FieldSink {
    tx: Arc<dyn Transmitter>,
    events: broadcast::Sender<TxEvent>,
    ack: bool,
    state: Mutex<SinkState>,
}

impl FieldSink {
    pub(crate) fn new(
        tx: Arc<dyn Transmitter>,
        events: broadcast::Sender<TxEvent>,
        ack: bool,
    ) -> Self {
        FieldSink {
            tx,
            events,
            ack,
            state: Mutex::new(SinkState {
                bank: RtBank::B,
                last_rt: None,
                pending: Vec::new(),
            }),
        }
    }

    /// Decode and apply one frame. Returns the acknowledgement to send, if
    /// the sender asked for one.
    pub(crate) async fn handle_frame(&self, frame: &UecpFrame) -> Option<Vec<u8>> {
        let code = match parse_message(&frame.message) {
            Ok(commands) => {
                self.queue(commands).await;
                self.flush().await;
                ACK_OK
            }
            Err(e) => {
                tracing::warn!(
                    addr = frame.address,
                    seq = frame.sequence,
                    error = %e,
                    "Discarding undecodable UECP message"
                );
                ACK_MALFORMED
            }
        };

        (self.ack && frame.sequence != 0)
            .then(|| encode_ack(frame.address, frame.sequence, code))
    }

    async fn queue(&self, commands: Vec<UecpCommand>) {
        let mut state = self.state.lock().await;
        for command in commands {
            let write = match validate(command) {
                Ok(Some(w)) => w,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Rejected UECP field");
                    continue;
                }
            };
            let write = match write {
                Resolved::Ready(w) => w,
                Resolved::Rt { text, toggle } => {
                    let changed = state.last_rt.as_deref() != Some(text.as_str());
                    if toggle || changed {
                        state.bank = state.bank.flip();
                    }
                    state.last_rt = Some(text.clone());
                    FieldWrite::Rt {
                        text,
                        bank: state.bank,
                    }
                }
            };
            let field = write.field();
            state.pending.retain(|p| p.field() != field);
            state.pending.push(write);
        }
    }

    /// Write every pending field. Transport failures stay queued.
    pub(crate) async fn flush(&self) {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut state.pending);
        for write in pending {
            match self.apply(&write).await {
                Ok(()) => {
                    tracing::debug!(field = write.field(), "UECP field applied");
                    let _ = self.events.send(TxEvent::UecpFieldApplied {
                        field: write.field(),
                    });
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(field = write.field(), error = %e, "UECP field write failed, will retry");
                    state.pending.push(write);
                }
                Err(e) => {
                    tracing::warn!(field = write.field(), error = %e, "UECP field rejected by driver");
                }
            }
        }
    }

    async fn apply(&self, write: &FieldWrite) -> Result<()> {
        match write {
            FieldWrite::Pi(pi) => self.tx.rds_set_pi(*pi).await,
            FieldWrite::Ps(text) => {
                self.tx.rds_set_ps(0, text).await?;
                let _ = self.events.send(TxEvent::PsChanged {
                    text: text.clone(),
                    index: None,
                });
                Ok(())
            }
            FieldWrite::TaTp { ta, tp } => {
                self.tx.rds_set_tp(*tp).await?;
                self.tx.rds_set_ta(*ta).await
            }
            FieldWrite::Di(di) => self.tx.rds_set_di(*di).await,
            FieldWrite::Ms(music) => self.tx.rds_set_ms(*music).await,
            FieldWrite::Pty(pty) => self.tx.rds_set_pty(*pty).await,
            FieldWrite::Rt { text, bank } => {
                self.tx.rds_set_rt(text, *bank, true).await?;
                let _ = self.events.send(TxEvent::RtChanged {
                    text: text.clone(),
                    bank: *bank,
                    source: RtSource::Uecp,
                });
                Ok(())
            }
        }
    }

    async fn has_pending(&self) -> bool {
        !self.state.lock().await.pending.is_empty()
    }
}

enum Resolved {
    Ready(FieldWrite),
    Rt { text: String, toggle: bool },
}

fn validate(command: UecpCommand) -> Result<Option<Resolved>> {
    let write = match command {
        UecpCommand::Pi(pi) => {
            limits::check_pi(pi)?;
            FieldWrite::Pi(pi)
        }
        UecpCommand::Pty(pty) => {
            limits::check_pty(pty)?;
            FieldWrite::Pty(pty)
        }
        UecpCommand::Ps(text) => {
            limits::check_ps(0, &text)?;
            FieldWrite::Ps(text)
        }
        UecpCommand::TaTp { ta, tp } => FieldWrite::TaTp { ta, tp },
        UecpCommand::Di(di) => FieldWrite::Di(di),
        UecpCommand::Ms(music) => FieldWrite::Ms(music),
        UecpCommand::Rt { text, toggle, .. } => {
            limits::check_rt(&text)?;
            return Ok(Some(Resolved::Rt { text, toggle }));
        }
        UecpCommand::RtClear => {
            return Ok(Some(Resolved::Rt {
                text: String::new(),
                toggle: true,
            }));
        }
        UecpCommand::Unsupported(_) => return Ok(None),
    };
    Ok(Some(Resolved::Ready(write)))
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A running UECP listener. Dropping it stops the background tasks.
pub struct UecpListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl UecpListener {
    /// Bind TCP on `config.host:config.port` and UDP on the same address,
    /// then start serving.
    ///
    /// With port 0 the OS picks the TCP port and UDP binds the same number.
    pub async fn bind(
        config: &UecpConfig,
        tx: Arc<dyn Transmitter>,
        events: broadcast::Sender<TxEvent>,
    ) -> Result<Self> {
        let bind = config.bind_addr();
        let tcp = TcpListener::bind(&bind).await.map_err(|e| {
            tracing::error!(addr = %bind, error = %e, "UECP TCP bind failed");
            Error::Io(e)
        })?;
        let local_addr = tcp.local_addr()?;
        let udp = UdpTransport::bind(&local_addr.to_string()).await?;

        let sink = Arc::new(FieldSink::new(tx, events, config.ack));
        let idle = Duration::from_secs(config.idle_timeout_s.max(1));
        let cancel = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(accept_loop(tcp, Arc::clone(&sink), idle, cancel.clone())),
            tokio::spawn(udp_loop(udp, Arc::clone(&sink), cancel.clone())),
            tokio::spawn(retry_loop(sink, cancel.clone())),
        ];

        tracing::info!(addr = %local_addr, ack = config.ack, "UECP listener started (TCP+UDP)");
        Ok(UecpListener {
            local_addr,
            cancel,
            tasks,
        })
    }

    /// The bound address, shared by TCP and UDP.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every session and wait for the tasks to end.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        tracing::info!(addr = %self.local_addr, "UECP listener stopped");
    }
}

impl Drop for UecpListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    sink: Arc<FieldSink>,
    idle: Duration,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(peer = %peer, "UECP client connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "TCP_NODELAY not set");
                    }
                    let link = TcpTransport::from_stream(stream, peer.to_string());
                    sessions.spawn(tcp_session(link, Arc::clone(&sink), idle, cancel.child_token()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "UECP accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    while sessions.join_next().await.is_some() {}
}

async fn tcp_session(
    mut link: TcpTransport,
    sink: Arc<FieldSink>,
    idle: Duration,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(512);
    let mut chunk = [0u8; 1024];

    loop {
        let n = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = link.receive(&mut chunk, idle) => match received {
                Ok(n) => n,
                Err(Error::Timeout) => {
                    tracing::info!(peer = %link.peer(), idle_s = idle.as_secs(), "UECP session idle, closing");
                    break;
                }
                Err(Error::ConnectionLost) => {
                    tracing::info!(peer = %link.peer(), "UECP client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %link.peer(), error = %e, "UECP session read failed");
                    break;
                }
            },
        };

        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_FRAME_BUF {
            tracing::warn!(peer = %link.peer(), bytes = buf.len(), "UECP buffer overflow, discarding");
            buf.clear();
            continue;
        }

        loop {
            match decode_frame(&buf) {
                DecodeResult::Frame(frame, consumed) => {
                    buf.advance(consumed);
                    if let Some(ack) = sink.handle_frame(&frame).await {
                        if let Err(e) = link.send(&ack).await {
                            tracing::warn!(peer = %link.peer(), error = %e, "UECP ack failed");
                        }
                    }
                }
                DecodeResult::Incomplete => break,
                DecodeResult::Malformed { consumed, reason } => {
                    tracing::warn!(peer = %link.peer(), reason = %reason, "Malformed UECP frame discarded");
                    buf.advance(consumed);
                }
            }
        }
    }

    let _ = link.close().await;
}

async fn udp_loop(socket: UdpTransport, sink: Arc<FieldSink>, cancel: CancellationToken) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (n, src) = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = socket.recv_from(&mut buf, UDP_POLL) => match received {
                Ok(v) => v,
                Err(Error::Timeout) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "UECP UDP receive failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        match decode_frame(&buf[..n]) {
            DecodeResult::Frame(frame, _) => {
                if let Some(ack) = sink.handle_frame(&frame).await {
                    let _ = socket.send_to(&ack, src).await;
                }
            }
            DecodeResult::Incomplete => {
                tracing::warn!(peer = %src, bytes = n, "Truncated UECP datagram discarded");
            }
            DecodeResult::Malformed { reason, .. } => {
                tracing::warn!(peer = %src, reason = %reason, "Malformed UECP datagram discarded");
            }
        }
    }
}

async fn retry_loop(sink: Arc<FieldSink>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(RETRY_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                if sink.has_pending().await {
                    sink.flush().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MEC_PI, MEC_PS, MEC_PTY, MEC_RT};
    use picast_test_harness::{RecordingTransmitter, TxCall};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpStream, UdpSocket};

    fn config() -> UecpConfig {
        UecpConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 0,
            ack: true,
            idle_timeout_s: 120,
        }
    }

    fn frame(seq: u8, message: Vec<u8>) -> UecpFrame {
        UecpFrame {
            address: 0x0001,
            sequence: seq,
            message,
        }
    }

    fn rt_element(text: &[u8], config: u8) -> Vec<u8> {
        let mut el = vec![MEC_RT, 0, 0, (text.len() + 1) as u8, config];
        el.extend_from_slice(text);
        el
    }

    fn sink(rec: &Arc<RecordingTransmitter>) -> (FieldSink, broadcast::Receiver<TxEvent>) {
        let (events, rx) = broadcast::channel(64);
        let tx: Arc<dyn Transmitter> = rec.clone();
        (FieldSink::new(tx, events, true), rx)
    }

    async fn read_ack(stream: &mut TcpStream) -> UecpFrame {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
                .await
                .expect("ack timeout")
                .unwrap();
            assert!(n > 0, "listener closed the connection");
            buf.extend_from_slice(&chunk[..n]);
            if let DecodeResult::Frame(f, _) = decode_frame(&buf) {
                return f;
            }
        }
    }

    // -----------------------------------------------------------------
    // Field sink
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn rt_bank_flips_only_on_change_or_toggle() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);

        sink.handle_frame(&frame(0, rt_element(b"Hello", 0))).await;
        sink.handle_frame(&frame(0, rt_element(b"Hello", 0))).await;
        sink.handle_frame(&frame(0, rt_element(b"World", 0))).await;
        sink.handle_frame(&frame(0, rt_element(b"World", 1))).await;

        let banks: Vec<RtBank> = rec.rt_sends().into_iter().map(|(_, _, b)| b).collect();
        assert_eq!(banks, vec![RtBank::A, RtBank::A, RtBank::B, RtBank::A]);
    }

    #[tokio::test]
    async fn rt_clear_sends_empty_text_on_new_bank() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);

        sink.handle_frame(&frame(0, rt_element(b"Hello", 0))).await;
        sink.handle_frame(&frame(0, vec![MEC_RT, 0, 0, 0])).await;

        let sends = rec.rt_sends();
        assert_eq!(sends[1].1, "");
        assert_eq!(sends[1].2, RtBank::B);
    }

    #[tokio::test]
    async fn invalid_fields_are_skipped() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);

        let ack = sink
            .handle_frame(&frame(
                4,
                vec![MEC_PI, 0, 0, 0, 0, MEC_PTY, 0, 0, 40, MEC_PTY, 0, 0, 7],
            ))
            .await
            .unwrap();

        assert_eq!(rec.writes(), vec![TxCall::RdsSetPty(7)]);
        let DecodeResult::Frame(ack, _) = decode_frame(&ack) else {
            panic!("ack");
        };
        assert_eq!(ack.message, vec![0x18, ACK_OK, 4]);
    }

    #[tokio::test]
    async fn undecodable_message_gets_malformed_ack() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);

        let ack = sink
            .handle_frame(&frame(9, vec![MEC_PTY, 0, 0, 5, MEC_PI, 0]))
            .await
            .unwrap();
        let DecodeResult::Frame(ack, _) = decode_frame(&ack) else {
            panic!("ack");
        };
        assert_eq!(ack.message, vec![0x18, ACK_MALFORMED, 9]);
        assert!(rec.writes().is_empty());
    }

    #[tokio::test]
    async fn no_ack_for_sequence_zero() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);
        assert!(
            sink.handle_frame(&frame(0, vec![MEC_PTY, 0, 0, 3]))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn transport_failure_is_retried_with_latest_value() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, _rx) = sink(&rec);

        rec.fail_next_writes(1);
        sink.handle_frame(&frame(0, vec![MEC_PTY, 0, 0, 3])).await;
        assert!(rec.writes().is_empty());
        assert!(sink.has_pending().await);

        rec.fail_next_writes(1);
        sink.handle_frame(&frame(0, vec![MEC_PTY, 0, 0, 4])).await;
        assert!(rec.writes().is_empty());

        sink.flush().await;
        assert_eq!(rec.writes(), vec![TxCall::RdsSetPty(4)]);
        assert!(!sink.has_pending().await);
    }

    #[tokio::test]
    async fn events_emitted_for_applied_fields() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (sink, mut rx) = sink(&rec);

        let mut msg = vec![MEC_PS, 0, 0];
        msg.extend_from_slice(b"NEWS FM ");
        msg.extend(rt_element(b"Now playing", 0));
        sink.handle_frame(&frame(0, msg)).await;

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert!(seen.contains(&TxEvent::PsChanged {
            text: "NEWS FM ".into(),
            index: None
        }));
        assert!(seen.contains(&TxEvent::RtChanged {
            text: "Now playing".into(),
            bank: RtBank::A,
            source: RtSource::Uecp
        }));
        assert!(seen.contains(&TxEvent::UecpFieldApplied { field: "ps" }));
        assert!(seen.contains(&TxEvent::UecpFieldApplied { field: "rt" }));
    }

    // -----------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn tcp_ps_and_long_rt_leave_pi_pty_alone() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (events, _rx) = broadcast::channel(64);
        let listener = UecpListener::bind(&config(), rec.clone(), events)
            .await
            .unwrap();

        let mut msg = vec![MEC_PS, 0, 0];
        msg.extend_from_slice(b"NEWS FM ");
        msg.extend(rt_element(
            b"This RadioText is far longer than 32 characters",
            0,
        ));
        let wire = crate::codec::encode_frame(&frame(1, msg));

        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();
        client.write_all(&wire).await.unwrap();
        let ack = read_ack(&mut client).await;
        assert_eq!(ack.message, vec![0x18, ACK_OK, 1]);

        let writes = rec.writes();
        assert!(writes.contains(&TxCall::RdsSetPs {
            slot: 0,
            text: "NEWS FM ".into()
        }));
        let rt = rec.rt_sends();
        assert_eq!(rt.len(), 1);
        assert_eq!(rt[0].1, "This RadioText is far longer tha");
        assert_eq!(rt[0].1.chars().count(), 32);
        assert_eq!(
            rec.count(|c| matches!(c, TxCall::RdsSetPi(_) | TxCall::RdsSetPty(_))),
            0
        );

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn tcp_reassembles_split_frames_and_survives_garbage() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (events, _rx) = broadcast::channel(64);
        let listener = UecpListener::bind(&config(), rec.clone(), events)
            .await
            .unwrap();
        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();

        // Corrupted frame: discarded, connection stays up.
        let mut bad = crate::codec::encode_frame(&frame(5, vec![MEC_PTY, 0, 0, 9]));
        let len = bad.len();
        bad[len - 2] ^= 0x55;
        client.write_all(&bad).await.unwrap();

        // A valid frame split across two writes.
        let good = crate::codec::encode_frame(&frame(6, vec![MEC_PTY, 0, 0, 12]));
        let (a, b) = good.split_at(3);
        client.write_all(a).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b).await.unwrap();

        let ack = read_ack(&mut client).await;
        assert_eq!(ack.sequence, 6);
        assert_eq!(rec.writes(), vec![TxCall::RdsSetPty(12)]);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn udp_datagram_applied_and_acked() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (events, _rx) = broadcast::channel(64);
        let listener = UecpListener::bind(&config(), rec.clone(), events)
            .await
            .unwrap();

        let encoder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let wire = crate::codec::encode_frame(&frame(2, vec![MEC_PI, 0, 0, 0xC2, 0x01]));
        encoder.send_to(&wire, listener.local_addr()).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), encoder.recv_from(&mut buf))
            .await
            .expect("udp ack timeout")
            .unwrap();
        let DecodeResult::Frame(ack, _) = decode_frame(&buf[..n]) else {
            panic!("ack");
        };
        assert_eq!(ack.message, vec![0x18, ACK_OK, 2]);
        assert_eq!(rec.writes(), vec![TxCall::RdsSetPi(0xC201)]);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn idle_session_is_closed() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (events, _rx) = broadcast::channel(64);
        let cfg = UecpConfig {
            idle_timeout_s: 1,
            ..config()
        };
        let listener = UecpListener::bind(&cfg, rec, events).await.unwrap();

        let mut client = TcpStream::connect(listener.local_addr()).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("session should close on idle")
            .unwrap_or(0);
        assert_eq!(n, 0);

        listener.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_open_sessions() {
        let rec = Arc::new(RecordingTransmitter::new());
        let (events, _rx) = broadcast::channel(64);
        let listener = UecpListener::bind(&config(), rec, events).await.unwrap();
        let addr = listener.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        // Make sure the session task exists before shutting down.
        client
            .write_all(&crate::codec::encode_frame(&frame(1, vec![MEC_PTY, 0, 0, 1])))
            .await
            .unwrap();
        read_ack(&mut client).await;

        tokio::time::timeout(Duration::from_secs(5), listener.shutdown())
            .await
            .expect("shutdown hung");

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
