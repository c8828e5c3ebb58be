use std::{fmt, io};

/// The kinds of failure the startup procedure can hit. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The desired identity is malformed or ambiguous.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("permission denied: {context}")]
    Permission {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("filesystem error: {context}")]
    Filesystem {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The target command is missing or could not be executed.
    #[error("exec error: {context}")]
    Exec {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Classifies an I/O failure: EPERM/EACCES become `Permission`, everything else `Filesystem`.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::Permission { context, source }
        } else {
            Self::Filesystem { context, source }
        }
    }

    pub fn permission(context: impl Into<String>, source: io::Error) -> Self {
        Self::Permission {
            context: context.into(),
            source,
        }
    }

    pub fn exec(context: impl Into<String>, source: io::Error) -> Self {
        Self::Exec {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Filesystem { .. } => ErrorKind::Filesystem,
            Self::Exec { .. } => ErrorKind::Exec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Permission,
    Filesystem,
    Exec,
}

/// Steps of the startup procedure, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Configure,
    ResolveGroup,
    ResolveUser,
    ProvisionDir,
    Exec,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configure => "configuration",
            Self::ResolveGroup => "group resolution",
            Self::ResolveUser => "user resolution",
            Self::ProvisionDir => "directory provisioning",
            Self::Exec => "exec",
        })
    }
}

/// An [`Error`] tagged with the step that produced it. Reaching one is terminal.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed")]
pub struct StepError {
    pub step: Step,
    #[source]
    pub source: Error,
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

pub(crate) trait AtStep<T> {
    fn at(self, step: Step) -> Result<T, StepError>;
}

impl<T> AtStep<T> for Result<T, Error> {
    fn at(self, step: Step) -> Result<T, StepError> {
        self.map_err(|source| StepError { step, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_by_kind() {
        let denied = Error::io("chown /app/data", io::Error::from_raw_os_error(1));
        assert_eq!(denied.kind(), ErrorKind::Permission);

        let read_only = Error::io("chown /app/data", io::Error::from_raw_os_error(30));
        assert_eq!(read_only.kind(), ErrorKind::Filesystem);
    }

    #[test]
    fn step_error_names_the_failed_step() {
        let err = Err::<(), _>(Error::configuration("bad uid"))
            .at(Step::ResolveUser)
            .unwrap_err();
        assert_eq!(err.to_string(), "user resolution failed");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
