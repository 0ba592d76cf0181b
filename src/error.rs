use thiserror::Error;

#[derive(Error, Debug)]
pub enum CovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error at position {position}: {message}")]
    Xml { message: String, position: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{format} reports are not supported")]
    UnsupportedFormat { format: String },

    #[error("No report file could be parsed")]
    NoReportsParsed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CovError>;
