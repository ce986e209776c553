//! # astwire-protocol
//!
//! Multiplexed request/response protocol between a code generation
//! coordinator and external generator processes.
//!
//! - [`codec`] encodes and decodes the binary records
//! - [`Multiplexer`] runs many concurrent streams over one duplex transport
//! - [`Supervisor`] owns a generator process and the channel wired to it
//! - [`serve`] is the generator side, for generators written in Rust
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use astwire_protocol::{Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let generator = Supervisor::spawn(SupervisorConfig::new("ast2go")).await?;
//!     let mut stream = generator.request("a.bgn", std::fs::read("a.json")?).await?;
//!     while let Some(frame) = stream.receive().await? {
//!         println!("{}", frame.name_lossy());
//!     }
//!     generator.close();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod multiplexer;
pub mod spec;
pub mod supervisor;
pub mod telemetry;

pub use codec::{
    EndOfStream, GenerateRequest, Header, RequestHeader, Response, ResponseHeader, SourceCode,
    Status, PROTOCOL_VERSION, RESERVED_STREAM_ID,
};
pub use config::{MultiplexerConfig, ServeConfig, StderrMode, SupervisorConfig};
pub use error::{CodecError, ProtocolError, SpecError};
pub use generator::{serve, Generate, Responder};
pub use multiplexer::{ChannelState, Multiplexer, StreamHandle};
pub use spec::{query_spec, GeneratorSpec, InputMode};
pub use supervisor::Supervisor;
pub use telemetry::{init as init_telemetry, TelemetryConfig};

pub mod prelude {
    pub use crate::codec::{GenerateRequest, SourceCode};
    pub use crate::config::{MultiplexerConfig, ServeConfig, SupervisorConfig};
    pub use crate::error::ProtocolError;
    pub use crate::generator::{serve, Generate, Responder};
    pub use crate::multiplexer::{Multiplexer, StreamHandle};
    pub use crate::supervisor::Supervisor;
}
