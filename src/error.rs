use std::fmt;

#[derive(Debug)]
pub enum OffprintError {
    EmptyCaptureSet,
    InvalidConfiguration(String),
    Font(String),
    Render(String),
    Pdf(String),
    Io(std::io::Error),
}

impl fmt::Display for OffprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffprintError::EmptyCaptureSet => write!(f, "no capturable pages to assemble"),
            OffprintError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            OffprintError::Font(message) => write!(f, "font error: {}", message),
            OffprintError::Render(message) => write!(f, "render error: {}", message),
            OffprintError::Pdf(message) => write!(f, "pdf error: {}", message),
            OffprintError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for OffprintError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OffprintError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OffprintError {
    fn from(value: std::io::Error) -> Self {
        OffprintError::Io(value)
    }
}
