use std::ffi::OsString;
use std::path::PathBuf;

use crate::codec::PROTOCOL_VERSION;

/// Coordinator-side channel configuration
#[derive(Clone, Debug)]
pub struct MultiplexerConfig {
    /// Version sent in the request header and required in the response header.
    pub version: u32,
    /// Frames that may wait for the writer before `send` suspends.
    pub outgoing_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            outgoing_capacity: 64,
        }
    }
}

impl MultiplexerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity.max(1);
        self
    }
}

/// Generator-side server configuration
#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub version: u32,
    pub outgoing_capacity: usize,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            outgoing_capacity: 64,
        }
    }
}

impl ServeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_outgoing_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_capacity = capacity.max(1);
        self
    }
}

/// Where a supervised generator's stderr goes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StderrMode {
    #[default]
    Inherit,
    Null,
}

/// How to start and talk to one generator process
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
    pub stderr: StderrMode,
    pub multiplexer: MultiplexerConfig,
}

impl SupervisorConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stderr: StderrMode::default(),
            multiplexer: MultiplexerConfig::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn with_multiplexer(mut self, config: MultiplexerConfig) -> Self {
        self.multiplexer = config;
        self
    }
}
