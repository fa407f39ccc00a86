//! Lightweight XForm scanning.
//!
//! Only the handful of attributes needed to list and route forms are read:
//! the primary instance id, the title, and whether an encryption key is
//! declared. Full XML parsing is left to the consumers of the pulled files.

use regex::Regex;

use crate::error::{SourcesError, SourcesResult};

const PRIMARY_INSTANCE_ID: &str = r#"(?s)<instance(?:\s[^>]*)?>\s*(?:<!--.*?-->\s*)*<[A-Za-z_][\w.:-]*\s[^>]*?\bid\s*=\s*["']([^"']+)["']"#;
const TITLE: &str = r"(?s)<(?:h:)?title>\s*(.*?)\s*</(?:h:)?title>";
const SUBMISSION_ROOT_ID: &str = r#"(?s)\A\s*(?:<\?.*?\?>\s*)?(?:<!--.*?-->\s*)*<[A-Za-z_][\w.:-]*\s[^>]*?\bid\s*=\s*["']([^"']+)["']"#;
const ENCRYPTION_KEY_ATTRIBUTE: &str = "base64RsaPublicKey";

/// Attributes of a form definition needed for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDefinition {
    /// `id` attribute of the primary instance root.
    pub id: String,
    /// Declared title, if any.
    pub title: Option<String>,
    /// Whether submissions are encrypted.
    pub encrypted: bool,
}

/// Compiled patterns for form definitions and submissions.
#[derive(Debug)]
pub struct FormScanner {
    primary_instance_id: Regex,
    title: Regex,
    submission_root_id: Regex,
}

fn compile(pattern: &'static str) -> SourcesResult<Regex> {
    Regex::new(pattern).map_err(|source| SourcesError::RegexCompile { pattern, source })
}

impl FormScanner {
    /// Compile the scanning patterns.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::RegexCompile`] if a pattern is rejected.
    pub fn new() -> SourcesResult<Self> {
        Ok(Self {
            primary_instance_id: compile(PRIMARY_INSTANCE_ID)?,
            title: compile(TITLE)?,
            submission_root_id: compile(SUBMISSION_ROOT_ID)?,
        })
    }

    /// Read a form definition; `None` when no primary instance id is found.
    #[must_use]
    pub fn read_form(&self, xml: &str) -> Option<FormDefinition> {
        let id = self.primary_instance_id.captures(xml)?[1].trim().to_string();
        let title = self
            .title
            .captures(xml)
            .map(|caps| caps[1].trim().to_string())
            .filter(|title| !title.is_empty());
        Some(FormDefinition {
            id,
            title,
            encrypted: xml.contains(ENCRYPTION_KEY_ATTRIBUTE),
        })
    }

    /// Form id a submission belongs to: the `id` attribute of its root element.
    #[must_use]
    pub fn submission_form_id(&self, xml: &str) -> Option<String> {
        self.submission_root_id
            .captures(xml)
            .map(|caps| caps[1].trim().to_string())
    }
}
