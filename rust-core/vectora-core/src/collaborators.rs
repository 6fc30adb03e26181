//! # Collaborator Contracts
//!
//! Narrow interfaces to services living outside the request core: template
//! rendering, mail delivery and localization. The server only ever talks to
//! them through these traits.

use crate::error::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Renders a named template with JSON data
pub trait TemplateEngine: Send + Sync {
    /// Render `template` with `data`
    ///
    /// # Errors
    ///
    /// Implementations return `Error::Template` on failure.
    fn render(&self, template: &str, data: &serde_json::Value) -> Result<Vec<u8>>;
}

/// A file attached to a [`Mail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File to attach
    pub path: PathBuf,
    /// Show inline instead of as an attachment
    pub inline: bool,
}

/// An outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mail {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Attached files
    pub attachments: Vec<Attachment>,
}

impl Mail {
    /// Create a message without attachments
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    /// Attach a file
    #[must_use]
    pub fn attach(mut self, path: impl Into<PathBuf>, inline: bool) -> Self {
        self.attachments.push(Attachment {
            path: path.into(),
            inline,
        });
        self
    }
}

/// Delivers mail
pub trait Mailer: Send + Sync {
    /// Send a message
    ///
    /// # Errors
    ///
    /// Implementations return `Error::Mail` on delivery failure.
    fn send(&self, mail: &Mail) -> Result<()>;
}

/// Translation function for one locale
pub type Translator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Locale support and translations
pub trait Localizer: Send + Sync {
    /// Whether `tag` names a supported locale
    fn is_supported(&self, tag: &str) -> bool;

    /// Translation function for `locale`
    fn translator(&self, locale: &str) -> Translator;
}

/// In-memory localizer with per-locale message catalogs
///
/// Keys missing from a catalog translate to themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticLocalizer {
    locales: HashSet<String>,
    catalogs: HashMap<String, Arc<HashMap<String, String>>>,
}

impl StaticLocalizer {
    /// Support the given locale tags
    pub fn new<I, S>(locales: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            locales: locales.into_iter().map(Into::into).collect(),
            catalogs: HashMap::new(),
        }
    }

    /// Add translations for `locale`, enabling it if needed
    #[must_use]
    pub fn with_catalog<I, K, V>(mut self, locale: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.locales.insert(locale.to_string());
        let catalog = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.catalogs.insert(locale.to_string(), Arc::new(catalog));
        self
    }
}

impl Localizer for StaticLocalizer {
    fn is_supported(&self, tag: &str) -> bool {
        self.locales.contains(tag)
    }

    fn translator(&self, locale: &str) -> Translator {
        let catalog = self.catalogs.get(locale).cloned().unwrap_or_default();
        Arc::new(move |key| catalog.get(key).cloned().unwrap_or_else(|| key.to_string()))
    }
}
