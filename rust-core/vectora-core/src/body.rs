//! # Request Bodies
//!
//! Parsing of request payloads by negotiated media type:
//!
//! | media type                          | result                                 |
//! |-------------------------------------|----------------------------------------|
//! | `application/json`                  | `Body::Json` (generic value)           |
//! | `application/x-www-form-urlencoded` | `Body::Form`                           |
//! | `multipart/form-data`               | `Body::Multipart`, files staged on disk |
//! | none, empty body                    | `Body::Empty`                          |
//! | anything else with a body           | malformed request (400)                |
//!
//! The whole body is read through a length-limited reader first; exceeding
//! the limit is a malformed request. GET bodies are never read.

use crate::error::{Error, Result};
use crate::router::Method;
use futures_util::stream;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body as HttpBody, Bytes};
use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// `application/json`
pub const CT_JSON: &str = "application/json";
/// `application/x-www-form-urlencoded`
pub const CT_FORM: &str = "application/x-www-form-urlencoded";
/// `multipart/form-data`
pub const CT_MULTIPART: &str = "multipart/form-data";

/// Form fields; every name maps to all its values in arrival order
pub type FormFields = HashMap<String, Vec<String>>;

/// A file part of a multipart request, staged to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field name of the part
    pub field_name: String,
    /// File name sent by the client, if any
    pub file_name: Option<String>,
    /// Where the content was written
    pub path: PathBuf,
    /// Bytes written
    pub size: u64,
}

/// Parsed request body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Decoded JSON document
    Json(serde_json::Value),
    /// URL-encoded form
    Form(FormFields),
    /// Multipart form: regular fields and staged files
    Multipart(FormFields, Vec<UploadedFile>),
}

impl Body {
    /// Form fields for form and multipart bodies
    #[must_use]
    pub fn fields(&self) -> Option<&FormFields> {
        match self {
            Self::Form(fields) | Self::Multipart(fields, _) => Some(fields),
            _ => None,
        }
    }

    /// Staged files; empty unless multipart
    #[must_use]
    pub fn files(&self) -> &[UploadedFile] {
        match self {
            Self::Multipart(_, files) => files,
            _ => &[],
        }
    }

    /// The JSON document for JSON bodies
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the body is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Parameters for [`parse_body`]
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits<'a> {
    /// Request method
    pub method: Method,
    /// Negotiated media type (lower-case, no parameters)
    pub media_type: Option<&'a str>,
    /// Raw `Content-Type` header, needed for the multipart boundary
    pub content_type_header: Option<&'a str>,
    /// Maximum bytes to read
    pub max_bytes: u64,
    /// Directory uploaded files are staged in
    pub staging_dir: &'a Path,
}

/// Read and decode a request body
///
/// Returns the parsed body together with the raw bytes read.
///
/// # Errors
///
/// - `Error::PayloadTooLarge` when the body exceeds `max_bytes`
/// - `Error::MalformedRequest` for undecodable payloads or unsupported types
/// - `Error::Upload` when staging a file fails
pub async fn parse_body<B>(limits: BodyLimits<'_>, body: B) -> Result<(Body, Bytes)>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if limits.method == Method::Get {
        return Ok((Body::Empty, Bytes::new()));
    }

    let bytes = read_limited(body, limits.max_bytes).await?;
    if bytes.is_empty() {
        return Ok((Body::Empty, bytes));
    }

    let parsed = match limits.media_type {
        Some(CT_JSON) => Body::Json(crate::json::parse_json_bytes(&bytes)?),
        Some(CT_FORM) => Body::Form(parse_form(&bytes)),
        Some(CT_MULTIPART) => {
            let header = limits.content_type_header.unwrap_or_default();
            parse_multipart(bytes.clone(), header, limits.staging_dir).await?
        }
        Some(other) => {
            return Err(Error::malformed(format!("unsupported content type '{other}'")));
        }
        None => return Err(Error::malformed("body without content type")),
    };

    Ok((parsed, bytes))
}

async fn read_limited<B>(body: B, max_bytes: u64) -> Result<Bytes>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limit = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(Error::PayloadTooLarge { limit: max_bytes }),
        Err(e) => Err(Error::malformed(format!("failed to read body: {e}"))),
    }
}

/// Parse `application/x-www-form-urlencoded` content
pub fn parse_form(bytes: &[u8]) -> FormFields {
    let mut fields = FormFields::new();
    for (key, value) in url::form_urlencoded::parse(bytes) {
        fields
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    fields
}

async fn parse_multipart(bytes: Bytes, content_type: &str, staging_dir: &Path) -> Result<Body> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Error::malformed(format!("invalid multipart boundary: {e}")))?;
    let staging_dir = staging_dir.to_path_buf();

    // Staging runs as its own task so a dropped request never interrupts a
    // file operation midway. Output nobody collects is dropped, and with it
    // the staged files.
    let staging = tokio::spawn(async move {
        let chunks = stream::once(async move { Ok::<Bytes, Infallible>(bytes) });
        let mut multipart = multer::Multipart::new(chunks, boundary);

        let mut fields = FormFields::new();
        let mut staged = StagedFiles::default();
        read_parts(&mut multipart, &staging_dir, &mut fields, &mut staged).await?;
        Ok::<_, Error>((fields, staged))
    });

    match staging.await {
        Ok(Ok((fields, staged))) => Ok(Body::Multipart(fields, staged.release())),
        Ok(Err(e)) => Err(e),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(Error::Upload {
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        }),
    }
}

/// Files written while a body is being parsed
///
/// Removed from disk on drop unless [`StagedFiles::release`] hands them on.
#[derive(Debug, Default)]
struct StagedFiles(Vec<UploadedFile>);

impl StagedFiles {
    fn release(mut self) -> Vec<UploadedFile> {
        std::mem::take(&mut self.0)
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        discard_files(&self.0);
    }
}

async fn read_parts(
    multipart: &mut multer::Multipart<'static>,
    staging_dir: &Path,
    fields: &mut FormFields,
    staged: &mut StagedFiles,
) -> Result<()> {
    let mut staging_ready = false;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let text = field.text().await.map_err(multipart_error)?;
            fields.entry(name).or_default().push(text);
            continue;
        };

        if !staging_ready {
            tokio::fs::create_dir_all(staging_dir)
                .await
                .map_err(|source| Error::Upload { source })?;
            staging_ready = true;
        }

        // Tracked before it exists so a failure past this point still removes it
        let path = staging_dir.join(staged_name(&name));
        staged.0.push(UploadedFile {
            field_name: name,
            file_name: Some(file_name),
            path: path.clone(),
            size: 0,
        });
        let index = staged.0.len() - 1;

        let mut out = tokio::fs::File::create(&path)
            .await
            .map_err(|source| Error::Upload { source })?;

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            out.write_all(&chunk)
                .await
                .map_err(|source| Error::Upload { source })?;
            staged.0[index].size += chunk.len() as u64;
        }
        out.flush().await.map_err(|source| Error::Upload { source })?;

        let file = &staged.0[index];
        debug!(
            field = %file.field_name,
            path = %file.path.display(),
            size = file.size,
            "Upload staged"
        );
    }

    Ok(())
}

fn multipart_error(e: multer::Error) -> Error {
    Error::malformed(format!("multipart parse error: {e}"))
}

/// Unique file name for a staged upload: `<field>-<uuid>`
fn staged_name(field: &str) -> String {
    let field: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{field}-{}", uuid::Uuid::new_v4().simple())
}

/// Delete staged files
///
/// Every file is attempted; the first failure is returned.
///
/// # Errors
///
/// The first IO error encountered (missing files are not errors).
pub async fn remove_files(files: &[UploadedFile]) -> std::io::Result<()> {
    let mut first_error = None;
    for file in files {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Delete staged files without awaiting, logging anything but missing files
pub(crate) fn discard_files(files: &[UploadedFile]) {
    for file in files {
        match std::fs::remove_file(&file.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "Failed to remove staged upload");
            }
        }
    }
}
