use std::{fmt, io, string::FromUtf8Error};

use base64::DecodeError as Base64DecodeError;
use image::ImageError;
use quick_xml::Error as XmlError;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;
use tokio::time::error::Elapsed;
use url::ParseError as UrlParseError;

use crate::event::SyncEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum SceneDocError {
    #[error("Content cache error: {0}")]
    Cache(String),
    #[error("Document codec error: {0}")]
    Codec(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Document does not contain a scene payload: {0}")]
    NotAScene(String),
    #[error("Operation cancelled")]
    OperationCancelled,
    #[error("Recursion limit reached while resolving {0}")]
    RecursionLimit(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl SceneDocError {
    /// Whether the error means the underlying source is absent, as opposed to broken.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SceneDocError::NotFound(_))
    }
}

impl From<toml::de::Error> for SceneDocError {
    fn from(src: toml::de::Error) -> SceneDocError {
        SceneDocError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for SceneDocError {
    fn from(src: toml::ser::Error) -> SceneDocError {
        SceneDocError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for SceneDocError {
    fn from(src: JsonError) -> SceneDocError {
        SceneDocError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<serde_yaml::Error> for SceneDocError {
    fn from(src: serde_yaml::Error) -> SceneDocError {
        SceneDocError::Serialization(format!("YAML metadata error: {src}"))
    }
}

impl From<UrlParseError> for SceneDocError {
    fn from(src: UrlParseError) -> SceneDocError {
        SceneDocError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<Base64DecodeError> for SceneDocError {
    fn from(src: Base64DecodeError) -> SceneDocError {
        SceneDocError::Codec(format!("Base64 decode failed: {src}"))
    }
}

impl From<FromUtf8Error> for SceneDocError {
    fn from(src: FromUtf8Error) -> SceneDocError {
        SceneDocError::Codec(format!("Invalid UTF-8: {src}"))
    }
}

impl From<io::Error> for SceneDocError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => SceneDocError::NotFound(format!("{x}")),
            _ => SceneDocError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for SceneDocError {
    fn from(x: fmt::Error) -> Self {
        SceneDocError::Codec(format!("{x}"))
    }
}

impl From<RegexError> for SceneDocError {
    fn from(x: RegexError) -> Self {
        SceneDocError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<XmlError> for SceneDocError {
    fn from(x: XmlError) -> Self {
        SceneDocError::Codec(format!("SVG markup error: {x}"))
    }
}

impl From<ImageError> for SceneDocError {
    fn from(x: ImageError) -> Self {
        SceneDocError::Codec(format!("Raster decode error: {x}"))
    }
}

impl From<Elapsed> for SceneDocError {
    fn from(x: Elapsed) -> Self {
        SceneDocError::Timeout(format!("{x}"))
    }
}

impl From<SqlxError> for SceneDocError {
    fn from(db_error: SqlxError) -> Self {
        SceneDocError::Cache(format!("database error: {db_error:?}"))
    }
}

impl From<TokioSendError<SyncEvent>> for SceneDocError {
    fn from(x: TokioSendError<SyncEvent>) -> Self {
        SceneDocError::Io(format!(
            "Channel update send Error, could not transmit sync event {:?}",
            x.0
        ))
    }
}
