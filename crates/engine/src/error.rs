use sluice_path::PathError;
use sluice_types::Location;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StxError {
    #[error("compile error: {message} ({location})")]
    Compile { message: String, location: Location },

    #[error("{message} ({location})")]
    Runtime { message: String, location: Location },

    #[error("fatal error: {message} ({location})")]
    Fatal { message: String, location: Location },

    #[error("expression error: {source} ({location})")]
    Path {
        #[source]
        source: PathError,
        location: Location,
    },

    #[error("cannot read '{href}': {source} ({location})")]
    Io {
        href: String,
        #[source]
        source: std::io::Error,
        location: Location,
    },

    #[error("XML input error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed input: {0}")]
    Input(String),

    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("transformation aborted by an earlier error")]
    Aborted,
}

impl StxError {
    pub fn compile(msg: impl Into<String>, location: &Location) -> Self {
        Self::Compile {
            message: msg.into(),
            location: location.clone(),
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime {
            message: msg.into(),
            location: Location::default(),
        }
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal {
            message: msg.into(),
            location: Location::default(),
        }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn path(source: PathError, location: &Location) -> Self {
        Self::Path {
            source,
            location: location.clone(),
        }
    }

    /// Attaches `location` unless the error already carries a known one.
    pub fn at(mut self, at: &Location) -> Self {
        match &mut self {
            Self::Compile { location, .. }
            | Self::Runtime { location, .. }
            | Self::Fatal { location, .. }
            | Self::Path { location, .. }
            | Self::Io { location, .. } => {
                if location.is_unknown() {
                    *location = at.clone();
                }
            }
            _ => {}
        }
        self
    }

    /// Errors an [`ErrorHandler`] may choose to continue after.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Runtime { .. } | Self::Path { .. } | Self::Io { .. })
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Compile { location, .. }
            | Self::Runtime { location, .. }
            | Self::Fatal { location, .. }
            | Self::Path { location, .. }
            | Self::Io { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Decides what happens to errors raised while a document is processed.
pub trait ErrorHandler {
    /// Called for recoverable errors. Returning `Ok` continues processing and
    /// the failing instruction has no effect; returning an error aborts.
    fn error(&mut self, error: StxError) -> Result<(), StxError>;

    /// Called once for the error that aborts the transformation.
    fn fatal(&mut self, error: &StxError);
}

/// Logs recoverable errors and continues, unless `strict` is set.
#[derive(Debug, Default, Clone)]
pub struct DefaultErrorHandler {
    strict: bool,
    recovered: usize,
}

impl DefaultErrorHandler {
    pub fn new(strict: bool) -> Self {
        Self { strict, recovered: 0 }
    }

    pub fn recovered(&self) -> usize {
        self.recovered
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn error(&mut self, error: StxError) -> Result<(), StxError> {
        if self.strict {
            return Err(error);
        }
        log::warn!("{}", error);
        self.recovered += 1;
        Ok(())
    }

    fn fatal(&mut self, error: &StxError) {
        log::error!("{}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_is_attached_once() {
        let first = Location::new(3, 4);
        let err = StxError::runtime("boom").at(&first).at(&Location::new(9, 9));
        assert_eq!(err.location(), Some(&first));
        assert_eq!(err.to_string(), "boom (line 3, column 4)");
    }

    #[test]
    fn strict_handler_escalates() {
        let mut lenient = DefaultErrorHandler::new(false);
        assert!(lenient.error(StxError::runtime("x")).is_ok());
        assert_eq!(lenient.recovered(), 1);

        let mut strict = DefaultErrorHandler::new(true);
        assert!(strict.error(StxError::runtime("x")).is_err());
    }
}
