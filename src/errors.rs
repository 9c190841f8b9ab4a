use std::{io, str::Utf8Error};

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The source markup is not well-formed. Always fatal.
    #[error("malformed OSM input at byte {position}: {message}")]
    MalformedInput { position: usize, message: String },

    /// A child element lacks an attribute the shaper reads unconditionally.
    #[error("element {element_id} is missing field '{field}'")]
    MissingField { field: String, element_id: String },

    /// An attribute is present but cannot be interpreted.
    #[error("element {element_id} has invalid {field} '{value}'")]
    InvalidField {
        field: String,
        element_id: String,
        value: String,
    },

    #[error("reference data unusable: {0}")]
    ReferenceData(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Errors scoped to a single element. The element is skipped and the run goes on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::MissingField { .. } | Error::InvalidField { .. })
    }

    pub(crate) fn malformed(position: usize, message: impl Into<String>) -> Self {
        Error::MalformedInput {
            position,
            message: message.into(),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        match value {
            quick_xml::Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
            other => Error::malformed(0, other.to_string()),
        }
    }
}

impl From<AttrError> for Error {
    fn from(value: AttrError) -> Self {
        Error::malformed(0, value.to_string())
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Error::malformed(0, value.to_string())
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
