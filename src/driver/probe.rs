//! What a driver gets to look at during identification

use std::path::Path;

/// Identifier, extension and bounded header prefix of a source
#[derive(Debug, Clone)]
pub struct Probe {
    pub identifier: String,
    /// Lower-cased file extension, if any
    pub extension: Option<String>,
    /// First bytes of the source; empty when it could not be opened as a file
    pub header: Vec<u8>,
}

impl Probe {
    pub fn new(identifier: impl Into<String>, header: Vec<u8>) -> Self {
        let identifier = identifier.into();
        let extension = Path::new(&identifier)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        Self {
            identifier,
            extension,
            header,
        }
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn starts_with(&self, magic: &[u8]) -> bool {
        self.header.starts_with(magic)
    }

    /// The longest valid UTF-8 prefix of the header
    pub fn header_text(&self) -> &str {
        match std::str::from_utf8(&self.header) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&self.header[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    /// Whether the identifier is itself a document rather than a file name
    pub fn is_inline(&self) -> bool {
        self.identifier.trim_start().starts_with('{')
    }
}
