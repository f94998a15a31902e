use std::io;
use std::path::PathBuf;

/// Raw allocator could not satisfy a request. Nothing was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("allocation of {size} bytes failed")]
pub struct AllocError {
    pub size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unsupported report signal `{0}` (expected SIGQUIT, SIGUSR1 or SIGUSR2)")]
    UnknownSignal(String),

    #[error("a signal-driven reporter is already installed")]
    ReporterInstalled,

    #[error("failed to set up report trigger: {0}")]
    Trigger(#[source] io::Error),

    #[error("allocation table could not grow past {capacity} slots")]
    TableFull { capacity: usize },

    #[error(transparent)]
    Alloc(#[from] AllocError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
