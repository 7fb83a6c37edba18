use std::time::Duration;

use thiserror::Error;

/// Boxed lower-level error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to open session at {resource}")]
    Connection {
        resource: String,
        #[source]
        source: BoxError,
    },

    #[error("communication failed on {command:?}")]
    Communication {
        command: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to parse reply {reply:?} to {command:?}")]
    Parse {
        command: String,
        reply: String,
        #[source]
        source: BoxError,
    },

    #[error("device still busy after {polls} polls ({elapsed:?})")]
    Timeout { polls: u32, elapsed: Duration },
}

impl Error {
    pub(crate) fn communication(command: &str, source: impl Into<BoxError>) -> Self {
        Error::Communication {
            command: command.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn parse(command: &str, reply: &str, source: impl Into<BoxError>) -> Self {
        Error::Parse {
            command: command.to_string(),
            reply: reply.to_string(),
            source: source.into(),
        }
    }
}
