//! Generator side of the stream protocol.
//!
//! [`serve`] answers every request on its own task. A job may emit any
//! number of artifacts; when it returns, fails or panics the stream is
//! always terminated with an end-of-stream record, so the coordinator never
//! waits on a stream that nobody will finish.

use std::any::Any;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::codec::{
    write_frame, EndOfStream, Encode, GenerateRequest, Header, Response, SourceCode,
    RESERVED_STREAM_ID,
};
use crate::config::ServeConfig;
use crate::error::ProtocolError;

/// Turns one request into artifacts written through a [`Responder`].
///
/// Returning an error (or panicking) reports that error on the request's
/// stream; the stream is ended either way.
#[async_trait]
pub trait Generate: Send + Sync + 'static {
    async fn generate(&self, request: GenerateRequest, out: &Responder) -> anyhow::Result<()>;
}

/// Writes response frames for a single stream.
#[derive(Clone, Debug)]
pub struct Responder {
    stream_id: u64,
    outgoing: mpsc::Sender<Bytes>,
}

impl Responder {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Emit one generated artifact.
    pub async fn source(
        &self,
        name: impl Into<Bytes>,
        code: impl Into<Bytes>,
    ) -> Result<(), ProtocolError> {
        self.send(SourceCode::ok(self.stream_id, name, code).into())
            .await
    }

    /// Emit an error frame. The stream stays open.
    pub async fn error(&self, message: impl Into<Bytes>) -> Result<(), ProtocolError> {
        self.send(SourceCode::error(self.stream_id, message).into())
            .await
    }

    async fn finish(&self) -> Result<(), ProtocolError> {
        self.send(
            EndOfStream {
                stream_id: self.stream_id,
            }
            .into(),
        )
        .await
    }

    async fn send(&self, response: Response) -> Result<(), ProtocolError> {
        self.outgoing
            .send(response.to_bytes())
            .await
            .map_err(|_| ProtocolError::Write("response writer stopped".to_string()))
    }
}

/// Serve requests read from `reader` until it ends, writing responses to
/// `writer`.
///
/// Returns once every in-flight job has finished and all responses are
/// flushed. A malformed request or header is reported on the reserved
/// stream before returning the error.
pub async fn serve<R, W, G>(
    mut reader: R,
    writer: W,
    generator: Arc<G>,
    config: ServeConfig,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
    G: Generate,
{
    let (outgoing, rx) = mpsc::channel(config.outgoing_capacity.max(1));
    let writer_task = tokio::spawn(write_loop(writer, rx, Header::new(config.version)));
    let reserved = Responder {
        stream_id: RESERVED_STREAM_ID,
        outgoing: outgoing.clone(),
    };

    let mut jobs = JoinSet::new();
    let outcome = read_requests(&mut reader, &generator, &outgoing, &mut jobs, config.version).await;
    if let Err(reason) = &outcome {
        warn!("Stopped reading requests: {}", reason);
        let _ = reserved.error(reason.to_string()).await;
    }

    while let Some(joined) = jobs.join_next().await {
        if let Err(e) = joined {
            warn!("Generation task failed: {}", e);
        }
    }
    drop(reserved);
    drop(outgoing);

    let written = match writer_task.await {
        Ok(result) => result.map_err(|e| ProtocolError::Write(e.to_string())),
        Err(e) => Err(ProtocolError::Write(e.to_string())),
    };
    debug!("Generator server stopped");
    outcome.and(written)
}

async fn read_requests<R, G>(
    reader: &mut R,
    generator: &Arc<G>,
    outgoing: &mpsc::Sender<Bytes>,
    jobs: &mut JoinSet<()>,
    version: u32,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    G: Generate,
{
    let Some(header) = Header::read_next(reader).await? else {
        return Ok(());
    };
    if header.version != version {
        return Err(ProtocolError::VersionMismatch {
            expected: version,
            actual: header.version,
        });
    }
    info!("Serving protocol version {}", header.version);

    while let Some(request) = GenerateRequest::read_next(reader).await? {
        debug!(stream_id = request.stream_id, name = %request.name_lossy(), "Request received");
        let out = Responder {
            stream_id: request.stream_id,
            outgoing: outgoing.clone(),
        };
        jobs.spawn(run_job(generator.clone(), request, out));
    }
    Ok(())
}

async fn run_job<G: Generate>(generator: Arc<G>, request: GenerateRequest, out: Responder) {
    let stream_id = out.stream_id;
    let name = request.name_lossy().into_owned();

    let task = {
        let out = out.clone();
        tokio::spawn(async move { generator.generate(request, &out).await })
    };
    let failure = match task.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(e) if e.is_panic() => Some(panic_message(e.into_panic())),
        Err(e) => Some(e.to_string()),
    };

    if let Some(message) = failure {
        warn!(stream_id, name = %name, "Generation failed: {}", message);
        let _ = out.error(message).await;
    }
    if out.finish().await.is_err() {
        debug!(stream_id, "Response writer gone before end of stream");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        return "generator panicked".to_string();
    };
    format!("generator panicked: {}", detail)
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>, header: Header) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(&mut writer, &header.to_bytes()).await?;
    while let Some(frame) = rx.recv().await {
        write_frame(&mut writer, &frame).await?;
    }
    writer.shutdown().await
}
