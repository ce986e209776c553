//! Binary records exchanged between a coordinator and a generator.
//!
//! Integers are big-endian. Variable-length fields are a `u64` length
//! followed by that many bytes. Lengths are always taken from the owned
//! buffer being written, so a declared/actual mismatch cannot be encoded.
//! Records are encoded whole into a buffer before anything touches the
//! transport, which keeps frames from different streams from interleaving.

use std::borrow::Cow;
use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;

pub const PROTOCOL_VERSION: u32 = 1;

/// Stream id never handed out to callers. A generator uses it to report
/// errors not tied to any request.
pub const RESERVED_STREAM_ID: u64 = 0;

pub trait Encode {
    fn encoded_len(&self) -> usize;

    fn encode(&self, dst: &mut BytesMut);

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// First record sent in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
}

pub type RequestHeader = Header;
pub type ResponseHeader = Header;

impl Default for Header {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
        }
    }
}

impl Header {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            version: read_u32(reader, "version").await?,
        })
    }

    /// Like [`read_from`](Self::read_from), but `None` if the stream ends
    /// before the first byte.
    pub async fn read_next<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<Option<Self>, CodecError> {
        Ok(read_array_or_eof::<4, _>(reader, "version")
            .await?
            .map(|b| Self {
                version: u32::from_be_bytes(b),
            }))
    }
}

impl Encode for Header {
    fn encoded_len(&self) -> usize {
        4
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.version);
    }
}

/// One generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub stream_id: u64,
    /// Human-readable job name, usually the source file name.
    pub name: Bytes,
    /// The interchange document, JSON-encoded.
    pub payload: Bytes,
}

impl GenerateRequest {
    pub fn new(stream_id: u64, name: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            name: name.into(),
            payload: payload.into(),
        }
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Read the next request, or `None` on a clean end of stream between
    /// records.
    pub async fn read_next<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<Option<Self>, CodecError> {
        let Some(id) = read_array_or_eof::<8, _>(reader, "stream_id").await? else {
            return Ok(None);
        };
        Ok(Some(Self {
            stream_id: u64::from_be_bytes(id),
            name: read_bytes(reader, "name").await?,
            payload: read_bytes(reader, "payload").await?,
        }))
    }
}

impl Encode for GenerateRequest {
    fn encoded_len(&self) -> usize {
        8 + 8 + self.name.len() + 8 + self.payload.len()
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64(self.stream_id);
        put_bytes(dst, &self.name);
        put_bytes(dst, &self.payload);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl TryFrom<u8> for Status {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Error),
            value => Err(CodecError::UnknownTag {
                field: "status",
                value,
            }),
        }
    }
}

/// One generated artifact, or one job failure, for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCode {
    pub stream_id: u64,
    pub status: Status,
    pub name: Bytes,
    pub error_message: Bytes,
    pub code: Bytes,
}

impl SourceCode {
    pub fn ok(stream_id: u64, name: impl Into<Bytes>, code: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            status: Status::Ok,
            name: name.into(),
            error_message: Bytes::new(),
            code: code.into(),
        }
    }

    pub fn error(stream_id: u64, message: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            status: Status::Error,
            name: Bytes::new(),
            error_message: message.into(),
            code: Bytes::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn error_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.error_message)
    }

    async fn read_body<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            stream_id: read_u64(reader, "stream_id").await?,
            status: Status::try_from(read_u8(reader, "status").await?)?,
            name: read_bytes(reader, "name").await?,
            error_message: read_bytes(reader, "error_message").await?,
            code: read_bytes(reader, "code").await?,
        })
    }
}

impl Encode for SourceCode {
    fn encoded_len(&self) -> usize {
        8 + 1 + 8 + self.name.len() + 8 + self.error_message.len() + 8 + self.code.len()
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64(self.stream_id);
        dst.put_u8(self.status as u8);
        put_bytes(dst, &self.name);
        put_bytes(dst, &self.error_message);
        put_bytes(dst, &self.code);
    }
}

/// Marks the end of a stream. No frame for the id may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfStream {
    pub stream_id: u64,
}

impl Encode for EndOfStream {
    fn encoded_len(&self) -> usize {
        8
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u64(self.stream_id);
    }
}

const TAG_CODE: u8 = 0;
const TAG_END_OF_CODE: u8 = 1;

/// The unit read off the wire in the response direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Code(SourceCode),
    EndOfCode(EndOfStream),
}

impl Response {
    pub fn stream_id(&self) -> u64 {
        match self {
            Response::Code(code) => code.stream_id,
            Response::EndOfCode(end) => end.stream_id,
        }
    }

    /// Read the next envelope, or `None` on a clean end of stream between
    /// records.
    pub async fn read_next<R: AsyncRead + Unpin>(
        reader: &mut R,
    ) -> Result<Option<Self>, CodecError> {
        let Some([tag]) = read_array_or_eof::<1, _>(reader, "response tag").await? else {
            return Ok(None);
        };
        let response = match tag {
            TAG_CODE => Response::Code(SourceCode::read_body(reader).await?),
            TAG_END_OF_CODE => Response::EndOfCode(EndOfStream {
                stream_id: read_u64(reader, "stream_id").await?,
            }),
            value => {
                return Err(CodecError::UnknownTag {
                    field: "response",
                    value,
                })
            }
        };
        Ok(Some(response))
    }
}

impl From<SourceCode> for Response {
    fn from(code: SourceCode) -> Self {
        Response::Code(code)
    }
}

impl From<EndOfStream> for Response {
    fn from(end: EndOfStream) -> Self {
        Response::EndOfCode(end)
    }
}

impl Encode for Response {
    fn encoded_len(&self) -> usize {
        1 + match self {
            Response::Code(code) => code.encoded_len(),
            Response::EndOfCode(end) => end.encoded_len(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Code(code) => {
                dst.put_u8(TAG_CODE);
                code.encode(dst);
            }
            Response::EndOfCode(end) => {
                dst.put_u8(TAG_END_OF_CODE);
                end.encode(dst);
            }
        }
    }
}

/// Write one pre-encoded frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

fn put_bytes(dst: &mut BytesMut, bytes: &[u8]) {
    dst.put_u64(bytes.len() as u64);
    dst.put_slice(bytes);
}

/// Read until `buf` is full or the stream ends; returns the count read.
async fn fill<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::io(field, e)),
        }
    }
    Ok(filled)
}

async fn read_array<const N: usize, R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    let got = fill(reader, &mut buf, field).await?;
    if got < N {
        return Err(CodecError::ShortRead {
            field,
            expected: N as u64,
            actual: got as u64,
        });
    }
    Ok(buf)
}

async fn read_array_or_eof<const N: usize, R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<Option<[u8; N]>, CodecError> {
    let mut buf = [0u8; N];
    match fill(reader, &mut buf, field).await? {
        0 => Ok(None),
        got if got < N => Err(CodecError::ShortRead {
            field,
            expected: N as u64,
            actual: got as u64,
        }),
        _ => Ok(Some(buf)),
    }
}

async fn read_u8<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<u8, CodecError> {
    let [b] = read_array::<1, _>(reader, field).await?;
    Ok(b)
}

async fn read_u32<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<u32, CodecError> {
    Ok(u32::from_be_bytes(read_array(reader, field).await?))
}

async fn read_u64<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<u64, CodecError> {
    Ok(u64::from_be_bytes(read_array(reader, field).await?))
}

/// Read a length-prefixed field. The buffer grows as bytes arrive rather
/// than trusting the declared length up front.
async fn read_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    field: &'static str,
) -> Result<Bytes, CodecError> {
    let len = read_u64(reader, field).await?;
    let mut buf = Vec::new();
    let got = (&mut *reader)
        .take(len)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| CodecError::io(field, e))?;
    if (got as u64) < len {
        return Err(CodecError::ShortRead {
            field,
            expected: len,
            actual: got as u64,
        });
    }
    Ok(Bytes::from(buf))
}
