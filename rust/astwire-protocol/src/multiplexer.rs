//! Coordinator side of the stream protocol.
//!
//! One writer task owns the writable endpoint and drains a bounded queue of
//! encoded frames. One reader task owns the readable endpoint and hands each
//! decoded response to the stream it names. Callers hold [`StreamHandle`]s
//! and never touch the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{
    write_frame, Encode, GenerateRequest, Header, Response, SourceCode, RESERVED_STREAM_ID,
};
use crate::config::MultiplexerConfig;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Request header written, response header not yet seen.
    Handshaking,
    Open,
    Closed(ProtocolError),
}

impl ChannelState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed(_))
    }

    pub fn close_reason(&self) -> Option<&ProtocolError> {
        match self {
            ChannelState::Closed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Who closes the channel when the transport ends cleanly or a write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClosePolicy {
    /// The I/O tasks close it themselves.
    Immediate,
    /// The I/O tasks only report it; the owner of the peer (a process
    /// supervisor that knows the exit status) closes the channel.
    Deferred,
}

/// What the reader hands to a stream's handle.
#[derive(Debug)]
enum Delivery {
    Frame(SourceCode),
    End,
}

struct MultiplexerInner {
    state: watch::Sender<ChannelState>,
    streams: DashMap<u64, mpsc::UnboundedSender<Delivery>>,
    next_id: AtomicU64,
    outgoing: mpsc::Sender<Bytes>,
    read_done: CancellationToken,
    write_failed: CancellationToken,
    write_error: OnceLock<ProtocolError>,
    policy: ClosePolicy,
    version: u32,
}

impl MultiplexerInner {
    fn close_reason(&self) -> Option<ProtocolError> {
        self.state.borrow().close_reason().cloned()
    }

    /// First call wins; later reasons are dropped.
    fn close(&self, reason: ProtocolError) -> bool {
        let closed = self.state.send_if_modified(|state| {
            if state.is_closed() {
                return false;
            }
            *state = ChannelState::Closed(reason.clone());
            true
        });
        if closed {
            // handles without an end marker now read the closure reason
            self.streams.clear();
            if reason.is_eof() {
                info!("Stream channel closed");
            } else {
                warn!("Stream channel closed: {}", reason);
            }
        }
        closed
    }

    fn fail_write(&self, err: std::io::Error) {
        error!("Failed to write to generator: {}", err);
        let reason = ProtocolError::Write(err.to_string());
        match self.policy {
            ClosePolicy::Immediate => {
                self.close(reason);
            }
            ClosePolicy::Deferred => {
                let _ = self.write_error.set(reason);
                self.write_failed.cancel();
            }
        }
    }

    fn mark_open(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != ChannelState::Handshaking {
                return false;
            }
            *state = ChannelState::Open;
            true
        })
    }

    async fn closed(&self) -> ProtocolError {
        let mut rx = self.state.subscribe();
        let reason = match rx.wait_for(ChannelState::is_closed).await {
            Ok(state) => state.close_reason().cloned().unwrap_or(ProtocolError::Eof),
            Err(_) => ProtocolError::Eof,
        };
        reason
    }

    fn dispatch(&self, response: Response) -> Result<(), ProtocolError> {
        match response {
            Response::EndOfCode(end) => {
                let Some((_, stream)) = self.streams.remove(&end.stream_id) else {
                    return Err(ProtocolError::StreamNotFound(end.stream_id));
                };
                let _ = stream.send(Delivery::End);
                debug!(stream_id = end.stream_id, "Stream ended");
                Ok(())
            }
            Response::Code(code) => {
                let stream_id = code.stream_id;
                if stream_id == RESERVED_STREAM_ID && code.is_error() {
                    return Err(ProtocolError::Decoder(code.error_lossy().into_owned()));
                }
                let Some(stream) = self.streams.get(&stream_id) else {
                    return Err(ProtocolError::StreamNotFound(stream_id));
                };
                if stream.send(Delivery::Frame(code)).is_err() {
                    debug!(stream_id, "Dropping frame for abandoned stream");
                }
                Ok(())
            }
        }
    }
}

/// A duplex channel carrying many concurrent generation streams.
///
/// Cloning is cheap and every clone drives the same channel.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MultiplexerInner>,
}

impl Multiplexer {
    /// Start the writer and reader tasks over `reader`/`writer`.
    ///
    /// Must be called from within a Tokio runtime. The request header is
    /// written immediately; use [`ready`](Self::ready) to wait for the
    /// generator's header.
    pub fn start<R, W>(reader: R, writer: W, config: MultiplexerConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start_with(reader, writer, config, ClosePolicy::Immediate)
    }

    pub(crate) fn start_with<R, W>(
        reader: R,
        writer: W,
        config: MultiplexerConfig,
        policy: ClosePolicy,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::channel(config.outgoing_capacity.max(1));
        let (state, _) = watch::channel(ChannelState::Handshaking);

        let inner = Arc::new(MultiplexerInner {
            state,
            streams: DashMap::new(),
            next_id: AtomicU64::new(RESERVED_STREAM_ID + 1),
            outgoing,
            read_done: CancellationToken::new(),
            write_failed: CancellationToken::new(),
            write_error: OnceLock::new(),
            policy,
            version: config.version,
        });

        spawn_writer_loop(writer, outgoing_rx, inner.clone());
        spawn_reader_loop(reader, inner.clone());

        Self { inner }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state.borrow().clone()
    }

    /// Wait until the handshake completes or the channel closes first.
    pub async fn ready(&self) -> Result<(), ProtocolError> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|state| *state != ChannelState::Handshaking)
            .await
            .map_err(|_| ProtocolError::Eof)?;
        match &*state {
            ChannelState::Closed(reason) => Err(reason.clone()),
            _ => Ok(()),
        }
    }

    /// Allocate a new stream. Ids start at 1 and are never reused.
    pub fn create_stream(&self) -> Result<StreamHandle, ProtocolError> {
        if let Some(reason) = self.inner.close_reason() {
            return Err(reason);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.streams.insert(id, tx);
        debug!(stream_id = id, "Stream created");
        Ok(StreamHandle {
            id,
            rx,
            ended: false,
            inner: self.inner.clone(),
        })
    }

    /// Close the channel with `reason` unless it is already closed.
    ///
    /// Returns whether this call closed it.
    pub fn close(&self, reason: ProtocolError) -> bool {
        self.inner.close(reason)
    }

    /// Resolve with the closure reason once the channel is closed.
    pub async fn closed(&self) -> ProtocolError {
        self.inner.closed().await
    }

    /// Streams created and not yet ended by the generator.
    pub fn active_streams(&self) -> usize {
        self.inner.streams.len()
    }

    /// Resolve once the reader task has stopped.
    pub(crate) async fn read_finished(&self) {
        self.inner.read_done.cancelled().await
    }

    /// Resolve with the write failure held back under
    /// [`ClosePolicy::Deferred`].
    pub(crate) async fn write_failed(&self) -> ProtocolError {
        self.inner.write_failed.cancelled().await;
        self.inner
            .write_error
            .get()
            .cloned()
            .unwrap_or_else(|| ProtocolError::Write("write failed".to_string()))
    }
}

/// One logical request/response conversation on a [`Multiplexer`].
///
/// Dropping a handle before its end-of-stream arrives leaves its entry in
/// place until the generator ends the stream; later frames are discarded.
pub struct StreamHandle {
    id: u64,
    rx: mpsc::UnboundedReceiver<Delivery>,
    ended: bool,
    inner: Arc<MultiplexerInner>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a generate request for this stream.
    ///
    /// Suspends only while the outgoing queue is full.
    pub async fn send(
        &self,
        name: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Result<(), ProtocolError> {
        if let Some(reason) = self.inner.close_reason() {
            return Err(reason);
        }
        let frame = GenerateRequest::new(self.id, name, payload).to_bytes();
        tokio::select! {
            biased;
            reason = self.inner.closed() => Err(reason),
            sent = self.inner.outgoing.send(frame) => {
                sent.map_err(|_| self.inner.close_reason().unwrap_or(ProtocolError::Eof))
            }
        }
    }

    /// Next frame for this stream, `Ok(None)` once the generator has ended
    /// it, or the channel's closure reason.
    ///
    /// Frames already dispatched to this stream are returned before a
    /// closure is reported.
    pub async fn receive(&mut self) -> Result<Option<SourceCode>, ProtocolError> {
        if self.ended {
            return Ok(None);
        }
        let delivery = tokio::select! {
            biased;
            delivery = self.rx.recv() => delivery,
            reason = self.inner.closed() => return Err(reason),
        };
        match delivery {
            Some(Delivery::Frame(code)) => Ok(Some(code)),
            Some(Delivery::End) => {
                self.ended = true;
                Ok(None)
            }
            // sender dropped by a closure
            None => Err(self.inner.closed().await),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").field("id", &self.id).finish()
    }
}

fn spawn_writer_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::Receiver<Bytes>,
    inner: Arc<MultiplexerInner>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let header = Header::new(inner.version).to_bytes();
        if let Err(e) = write_frame(&mut writer, &header).await {
            inner.fail_write(e);
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = inner.closed() => break,
                frame = outgoing.recv() => {
                    let Some(frame) = frame else {
                        break;
                    };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        inner.fail_write(e);
                        break;
                    }
                }
            }
        }

        let _ = writer.shutdown().await;
        debug!("Writer stopped");
    });
}

fn spawn_reader_loop<R>(mut reader: R, inner: Arc<MultiplexerInner>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = inner.closed() => None,
            result = read_responses(&mut reader, &inner) => Some(result),
        };
        match outcome {
            Some(Ok(())) => {
                debug!("Generator output ended");
                if inner.policy == ClosePolicy::Immediate {
                    inner.close(ProtocolError::Eof);
                }
            }
            Some(Err(reason)) => {
                inner.close(reason);
            }
            None => {}
        }
        inner.read_done.cancel();
    });
}

async fn read_responses<R>(reader: &mut R, inner: &MultiplexerInner) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let Some(header) = Header::read_next(reader).await? else {
        return Ok(());
    };
    if header.version != inner.version {
        return Err(ProtocolError::VersionMismatch {
            expected: inner.version,
            actual: header.version,
        });
    }
    if inner.mark_open() {
        info!("Stream channel open (protocol version {})", header.version);
    }

    while let Some(response) = Response::read_next(reader).await? {
        inner.dispatch(response)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    use super::*;
    use crate::codec::EndOfStream;
    use crate::error::CodecError;

    /// The generator end of an in-memory channel, driven by hand.
    struct Peer {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn handshake(&mut self) {
            let header = Header::read_from(&mut self.reader).await.unwrap();
            assert_eq!(header, Header::default());
            self.send_header(Header::default()).await;
        }

        async fn send_header(&mut self, header: Header) {
            write_frame(&mut self.writer, &header.to_bytes())
                .await
                .unwrap();
        }

        async fn next_request(&mut self) -> GenerateRequest {
            GenerateRequest::read_next(&mut self.reader)
                .await
                .unwrap()
                .expect("request")
        }

        async fn respond(&mut self, response: impl Into<Response>) {
            write_frame(&mut self.writer, &response.into().to_bytes())
                .await
                .unwrap();
        }

        async fn raw(&mut self, bytes: &[u8]) {
            write_frame(&mut self.writer, bytes).await.unwrap();
        }

        async fn hang_up(&mut self) {
            self.writer.shutdown().await.unwrap();
        }
    }

    fn channel() -> (Multiplexer, Peer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (reader, writer) = tokio::io::split(server);
        let mux = Multiplexer::start(client_read, client_write, MultiplexerConfig::default());
        (mux, Peer { reader, writer })
    }

    async fn open_channel() -> (Multiplexer, Peer) {
        let (mux, mut peer) = channel();
        peer.handshake().await;
        mux.ready().await.unwrap();
        (mux, peer)
    }

    #[tokio::test]
    async fn test_request_and_response_round_trip() {
        let (mux, mut peer) = open_channel().await;
        assert_eq!(mux.state(), ChannelState::Open);

        let mut stream = mux.create_stream().unwrap();
        assert_eq!(stream.id(), 1);
        stream.send("a.bgn", "{\"node\":[]}").await.unwrap();

        let request = peer.next_request().await;
        assert_eq!(request.stream_id, 1);
        assert_eq!(request.name_lossy(), "a.bgn");
        assert_eq!(&request.payload[..], b"{\"node\":[]}");

        peer.respond(SourceCode::ok(1, "a.go", "package main")).await;
        peer.respond(EndOfStream { stream_id: 1 }).await;

        let frame = stream.receive().await.unwrap().expect("frame");
        assert_eq!(frame.name_lossy(), "a.go");
        assert_eq!(&frame.code[..], b"package main");
        assert_eq!(stream.receive().await.unwrap(), None);

        let again = tokio::time::timeout(Duration::from_secs(1), stream.receive())
            .await
            .expect("ended stream should not block");
        assert_eq!(again.unwrap(), None);
        assert_eq!(mux.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_stream_ids_are_unique_and_start_at_one() {
        let (mux, _peer) = channel();
        let ids: Vec<u64> = (0..3).map(|_| mux.create_stream().unwrap().id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // dropped handles keep their entries until the generator ends them
        assert_eq!(mux.active_streams(), 3);
    }

    #[tokio::test]
    async fn test_interleaved_frames_reach_their_own_stream() {
        let (mux, mut peer) = open_channel().await;
        let mut a = mux.create_stream().unwrap();
        let mut b = mux.create_stream().unwrap();

        peer.respond(SourceCode::ok(b.id(), "b1", "")).await;
        peer.respond(SourceCode::ok(a.id(), "a1", "")).await;
        peer.respond(SourceCode::ok(a.id(), "a2", "")).await;
        peer.respond(EndOfStream { stream_id: b.id() }).await;
        peer.respond(SourceCode::error(a.id(), "a3")).await;
        peer.respond(EndOfStream { stream_id: a.id() }).await;

        let mut seen_a = Vec::new();
        while let Some(frame) = a.receive().await.unwrap() {
            assert_eq!(frame.stream_id, a.id());
            seen_a.push(if frame.is_error() {
                frame.error_lossy().into_owned()
            } else {
                frame.name_lossy().into_owned()
            });
        }
        assert_eq!(seen_a, vec!["a1", "a2", "a3"]);

        let frame = b.receive().await.unwrap().expect("frame");
        assert_eq!(frame.name_lossy(), "b1");
        assert_eq!(b.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decode_failure_closes_every_stream() {
        let (mux, mut peer) = open_channel().await;
        let mut waiters = Vec::new();
        for _ in 0..3 {
            let mut stream = mux.create_stream().unwrap();
            waiters.push(tokio::spawn(async move { stream.receive().await }));
        }
        let idle = mux.create_stream().unwrap();

        peer.raw(&[9]).await;

        let expected = ProtocolError::Codec(CodecError::UnknownTag {
            field: "response",
            value: 9,
        });
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Err(expected.clone()));
        }
        assert_eq!(mux.closed().await, expected);
        assert_eq!(mux.create_stream().unwrap_err(), expected);
        assert_eq!(idle.send("late", "").await, Err(expected.clone()));
        assert_eq!(mux.state(), ChannelState::Closed(expected));
    }

    #[tokio::test]
    async fn test_frame_for_unknown_stream_closes_channel() {
        let (mux, mut peer) = open_channel().await;
        let mut stream = mux.create_stream().unwrap();

        peer.respond(SourceCode::ok(999, "x", "")).await;

        let err = stream.receive().await.unwrap_err();
        assert_eq!(err, ProtocolError::StreamNotFound(999));
        assert_eq!(err.to_string(), "stream 999 not found");
    }

    #[tokio::test]
    async fn test_end_of_stream_for_unknown_stream_closes_channel() {
        let (mux, mut peer) = open_channel().await;
        peer.respond(EndOfStream { stream_id: 42 }).await;
        assert_eq!(mux.closed().await, ProtocolError::StreamNotFound(42));
    }

    #[tokio::test]
    async fn test_reserved_stream_error_is_decoder_error() {
        let (mux, mut peer) = open_channel().await;
        let mut stream = mux.create_stream().unwrap();

        peer.respond(SourceCode::error(RESERVED_STREAM_ID, "bad input"))
            .await;

        let err = stream.receive().await.unwrap_err();
        assert_eq!(err, ProtocolError::Decoder("bad input".to_string()));
        assert_eq!(err.to_string(), "Generator decoder error: bad input");
    }

    #[tokio::test]
    async fn test_version_mismatch_fails_handshake() {
        let (mux, mut peer) = channel();
        Header::read_from(&mut peer.reader).await.unwrap();
        peer.send_header(Header::new(2)).await;

        assert_eq!(
            mux.ready().await,
            Err(ProtocolError::VersionMismatch {
                expected: 1,
                actual: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_clean_end_of_output_is_eof() {
        let (mux, mut peer) = open_channel().await;
        let mut stream = mux.create_stream().unwrap();
        peer.respond(SourceCode::ok(stream.id(), "last", "")).await;
        peer.hang_up().await;

        // frames already delivered come before the closure
        assert!(stream.receive().await.unwrap().is_some());
        let err = stream.receive().await.unwrap_err();
        assert!(err.is_eof());
        assert_eq!(mux.closed().await, ProtocolError::Eof);
    }

    #[tokio::test]
    async fn test_first_close_wins() {
        let (mux, _peer) = channel();
        assert!(mux.close(ProtocolError::Write("broken pipe".to_string())));
        assert!(!mux.close(ProtocolError::Eof));
        assert_eq!(
            mux.closed().await,
            ProtocolError::Write("broken pipe".to_string())
        );
        assert_eq!(
            mux.ready().await,
            Err(ProtocolError::Write("broken pipe".to_string()))
        );
    }

    #[tokio::test]
    async fn test_abandoned_stream_frames_are_discarded() {
        let (mux, mut peer) = open_channel().await;
        let dropped = mux.create_stream().unwrap();
        let dropped_id = dropped.id();
        drop(dropped);
        let mut kept = mux.create_stream().unwrap();

        peer.respond(SourceCode::ok(dropped_id, "ignored", "")).await;
        peer.respond(EndOfStream { stream_id: dropped_id }).await;
        peer.respond(SourceCode::ok(kept.id(), "kept", "")).await;

        let frame = kept.receive().await.unwrap().expect("frame");
        assert_eq!(frame.name_lossy(), "kept");
        assert_eq!(mux.active_streams(), 1);
        assert_eq!(mux.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_close_releases_stream_entries() {
        let (mux, mut peer) = open_channel().await;
        let mut finished = mux.create_stream().unwrap();
        let mut pending = mux.create_stream().unwrap();
        let mut idle = mux.create_stream().unwrap();

        peer.respond(EndOfStream { stream_id: finished.id() }).await;
        peer.respond(SourceCode::ok(pending.id(), "partial", "")).await;
        assert_eq!(finished.receive().await.unwrap(), None);

        let reason = ProtocolError::Write("broken pipe".to_string());
        // wait for the partial frame to be dispatched before closing
        let frame = pending.receive().await.unwrap().expect("frame");
        assert_eq!(frame.name_lossy(), "partial");
        assert!(mux.close(reason.clone()));
        assert_eq!(mux.active_streams(), 0);

        assert_eq!(pending.receive().await, Err(reason.clone()));
        assert_eq!(idle.receive().await, Err(reason));
        // a stream the generator already ended stays ended
        assert_eq!(finished.receive().await.unwrap(), None);
    }
}
