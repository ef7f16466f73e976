use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::Write as _;

use thiserror::Error;

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Failure reported by a [`super::TaskExecutor`].
#[derive(Debug, Error)]
pub enum TaskError {
    /// The executor stopped because the request was cancelled.
    #[error("task interrupted")]
    Interrupted,
    /// The task failed; the worker keeps serving other requests.
    #[error("{message}")]
    Failed {
        /// Human-readable failure description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxedSource>,
        /// Rendered backtrace captured where the error was raised.
        trace: String,
    },
    /// The failure leaves the worker unusable; it stops after responding.
    #[error("unrecoverable worker fault: {message}")]
    Fatal {
        /// Human-readable failure description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxedSource>,
        /// Rendered backtrace captured where the error was raised.
        trace: String,
    },
}

impl TaskError {
    /// Builds an ordinary failure with a backtrace of the caller.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Wraps `source` as an ordinary failure.
    #[must_use]
    pub fn from_source(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Failed {
            message: source.to_string(),
            source: Some(Box::new(source)),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Builds a fatal failure with a backtrace of the caller.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
            trace: Backtrace::force_capture().to_string(),
        }
    }

    /// Whether the worker must stop after answering this request.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Renders the error, its causes and its backtrace for the response.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = format!("error: {self}");
        let mut cause = self.source();
        while let Some(current) = cause {
            let _ = write!(rendered, "\ncaused by: {current}");
            cause = current.source();
        }
        match self {
            Self::Interrupted => {}
            Self::Failed { trace, .. } | Self::Fatal { trace, .. } => {
                let _ = write!(rendered, "\nstack backtrace:\n{trace}");
            }
        }
        rendered
    }
}
