use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A config file, descriptor file or instance directory is missing at the point of use.
    NotFound,
    /// Registry or process access was refused.
    PermissionDenied,
    Io,
    /// The requested transition is not legal from the current state (e.g. R/W toggle on Unknown).
    InvalidState,
    /// Another batch is already in flight.
    Busy,
    Config,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Io => "i/o failure",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Busy => "busy",
            ErrorKind::Config => "config",
            ErrorKind::Other => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn not_found<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn io<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn invalid_state<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::InvalidState, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn busy() -> Self {
        Self::new(ErrorKind::Busy, "another batch is already in flight")
    }

    // Wrap an io::Error with context, keeping NotFound/PermissionDenied distinguishable.
    pub fn from_io(context: impl fmt::Display, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Io,
        };
        Self::new(kind, format!("{context}: {err}"))
    }

    // File stores only distinguish "missing" from every other I/O failure.
    pub fn file(context: impl fmt::Display, err: &io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        };
        Self::new(kind, format!("{context}: {err}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_io("i/o error", &err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
