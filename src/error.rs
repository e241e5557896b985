use thiserror::Error;

use crate::train::TrainReport;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A trainer hit an unrecoverable numerical failure. `report` holds the
    /// counters accumulated up to that point.
    #[error("numerical failure: {message}")]
    Numerical {
        message: String,
        report: TrainReport,
    },
}

impl Error {
    /// Fold counters of work done before the failing call into a numerical failure.
    pub(crate) fn with_earlier_report(self, earlier: TrainReport) -> Self {
        match self {
            Error::Numerical { message, mut report } => {
                report += earlier;
                Error::Numerical { message, report }
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
