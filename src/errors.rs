use thiserror::Error;

/// Class of a failed database connection, derived from the backend error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorClass {
    /// Host unreachable or refused (client-side codes above 2000).
    Network,
    /// Access denied for the user/password pair (1045).
    Credentials,
    /// The server is reachable but the schema does not exist (1049).
    UnknownSchema,
    Unknown,
}

impl ConnectionErrorClass {
    pub fn from_code(code: u16) -> Self {
        match code {
            1045 => ConnectionErrorClass::Credentials,
            1049 => ConnectionErrorClass::UnknownSchema,
            c if c > 2000 => ConnectionErrorClass::Network,
            _ => ConnectionErrorClass::Unknown,
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            ConnectionErrorClass::Network => "Check the database host and port",
            ConnectionErrorClass::Credentials => "Check the database user name and password",
            ConnectionErrorClass::UnknownSchema => "Create the database or fix its name",
            ConnectionErrorClass::Unknown => "Check the database settings",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Unable to connect to database{}", code.map(|c| format!(" error code: {}", c)).unwrap_or_default())]
    ConnectionFailed {
        class: ConnectionErrorClass,
        code: Option<u16>,
        message: String,
    },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Unable to copy {0}")]
    CopyFailed(String),

    #[error("Unable to restore table '{table}' from '{path}' because {error}")]
    StatementFailed {
        table: String,
        path: String,
        error: String,
    },

    #[error("Malformed dump: {0}")]
    MalformedDump(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Remediation shown next to a failed step.
    pub fn hint(&self) -> &'static str {
        match self {
            AppError::ConfigMissing(_) => "Make sure the package contains www/wp-config.php",
            AppError::ConnectionFailed { class, .. } => class.hint(),
            AppError::ExtractionFailed(_) => "Clean up and retry the extraction",
            AppError::CopyFailed(_) => "Check the target directory permissions, then clean up and retry",
            AppError::MalformedDump(_) => "Check that the package holds complete table dumps",
            _ => "Clean up and retry",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_class_thresholds() {
        assert_eq!(ConnectionErrorClass::from_code(2002), ConnectionErrorClass::Network);
        assert_eq!(ConnectionErrorClass::from_code(2005), ConnectionErrorClass::Network);
        assert_eq!(ConnectionErrorClass::from_code(1045), ConnectionErrorClass::Credentials);
        assert_eq!(ConnectionErrorClass::from_code(1049), ConnectionErrorClass::UnknownSchema);
        assert_eq!(ConnectionErrorClass::from_code(2000), ConnectionErrorClass::Unknown);
        assert_eq!(ConnectionErrorClass::from_code(1130), ConnectionErrorClass::Unknown);
    }

    #[test]
    fn test_connection_failed_message_carries_code() {
        let err = AppError::ConnectionFailed {
            class: ConnectionErrorClass::Credentials,
            code: Some(1045),
            message: "Access denied".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to connect to database error code: 1045");
        assert_eq!(err.hint(), "Check the database user name and password");
    }
}
