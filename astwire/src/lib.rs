//! # astwire
//!
//! Typed loading of flat AST interchange documents, and the multiplexed
//! protocol used to hand them to external code generators.
//!
//! ## Features
//!
//! - **`ast`** (default) - Interchange document loader and typed node graph
//! - **`protocol`** (default) - Wire codec, stream multiplexer, generator
//!   server and process supervisor
//! - **`runtime`** (default) - Runtime crates for writing generators
//!
//! ## Example
//!
//! ```rust,ignore
//! use astwire::prelude::*;
//!
//! let generator = Supervisor::spawn(SupervisorConfig::new("ast2go")).await?;
//! let ast = astwire::ast::from_slice(&document)?;
//! let mut stream = generator.request("a.bgn", ast.to_json()?).await?;
//! while let Some(frame) = stream.receive().await? {
//!     // one generated file per frame
//! }
//! ```

// Re-export the loader
#[cfg(feature = "ast")]
pub use astwire_ast as ast;

// Re-export the protocol
#[cfg(feature = "protocol")]
pub use astwire_protocol as protocol;

/// Runtime crates generators commonly need, at the versions this crate uses.
#[cfg(feature = "runtime")]
pub mod runtime {
    pub use anyhow;
    pub use async_trait;
    pub use tokio;
    pub use tracing;
}

/// Prelude module for convenient imports
pub mod prelude {
    #[cfg(feature = "ast")]
    pub use astwire_ast::{Ast, AstFile, LoadError, Node, NodeKind, NodeRef};

    #[cfg(feature = "protocol")]
    pub use astwire_protocol::prelude::*;

    #[cfg(feature = "runtime")]
    pub use async_trait::async_trait;
}
