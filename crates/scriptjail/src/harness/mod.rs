//! Harness generation
//!
//! Wraps a user script in a fixed trailer that calls the entry point and
//! reports its return value on stdout between per-invocation sentinel
//! markers. Everything the script prints itself stays ahead of that block.

use uuid::Uuid;

/// Name of the callable the harness invokes
pub const ENTRY_POINT: &str = "main";

/// File name of the harness inside the scratch area and the sandbox
pub const HARNESS_FILE: &str = "main.py";

const TRAILER_TEMPLATE: &str = include_str!("trailer.py");

/// Open/close markers framing the result and error payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinels {
    pub result_open: String,
    pub result_close: String,
    pub error_open: String,
    pub error_close: String,
}

impl Sentinels {
    /// Markers derived from a nonce
    ///
    /// The nonce must consist of characters that need no escaping inside a
    /// Python string literal.
    pub fn new(nonce: &str) -> Self {
        Self {
            result_open: format!("<<<scriptjail:result:{nonce}>>>"),
            result_close: format!("<<</scriptjail:result:{nonce}>>>"),
            error_open: format!("<<<scriptjail:error:{nonce}>>>"),
            error_close: format!("<<</scriptjail:error:{nonce}>>>"),
        }
    }

    /// Markers with a fresh random nonce
    pub fn generate() -> Self {
        Self::new(&Uuid::new_v4().simple().to_string())
    }
}

/// A generated harness: the user script followed by the trailer
#[derive(Debug, Clone)]
pub struct Harness {
    source: String,
    sentinels: Sentinels,
}

impl Harness {
    /// Generate a harness for `script` framed by `sentinels`
    pub fn generate(script: &str, sentinels: Sentinels) -> Self {
        let trailer = TRAILER_TEMPLATE
            .replace("{{RESULT_OPEN}}", &sentinels.result_open)
            .replace("{{RESULT_CLOSE}}", &sentinels.result_close)
            .replace("{{ERROR_OPEN}}", &sentinels.error_open)
            .replace("{{ERROR_CLOSE}}", &sentinels.error_close)
            .replace("{{ENTRY_POINT}}", ENTRY_POINT);

        let mut source = String::with_capacity(script.len() + trailer.len() + 1);
        source.push_str(script);
        if !script.ends_with('\n') {
            source.push('\n');
        }
        source.push_str(&trailer);

        Self { source, sentinels }
    }

    /// The full Python source to write to disk
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sentinels(&self) -> &Sentinels {
        &self.sentinels
    }
}
