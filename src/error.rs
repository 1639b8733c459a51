use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

/// Failures surfaced by the collector layer.
///
/// Only `Initialization` is fatal. The other variants are scoped to a
/// single cycle: the scheduler skips or degrades that cycle and retries on
/// the next interval.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// A static host fact could not be read at startup.
    #[error("cannot read host {what}: {source}")]
    Initialization {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The kernel process list could not be obtained for this cycle.
    #[error("process enumeration failed ({query}): {source}")]
    Enumeration {
        query: &'static str,
        #[source]
        source: io::Error,
    },

    /// A host-wide counter was unavailable for this cycle.
    #[error("{counter} counter unavailable: {source}")]
    CounterUnavailable {
        counter: &'static str,
        #[source]
        source: io::Error,
    },
}

impl CollectorError {
    pub fn initialization(what: &'static str, source: io::Error) -> Self {
        CollectorError::Initialization { what, source }
    }

    pub fn enumeration(query: &'static str, source: io::Error) -> Self {
        CollectorError::Enumeration { query, source }
    }

    pub fn counter(counter: &'static str, source: io::Error) -> Self {
        CollectorError::CounterUnavailable { counter, source }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, CollectorError::Initialization { .. })
    }
}
