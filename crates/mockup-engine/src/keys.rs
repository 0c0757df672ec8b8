use chrono::Utc;
use mockup_contracts::OutputFormat;
use uuid::Uuid;

pub const DEFAULT_UPLOAD_FOLDER: &str = "uploads/misc";
pub const DEFAULT_PRODUCT_HANDLE: &str = "unknown-product";
pub const DEFAULT_VIEW: &str = "view";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    Base,
    Enhanced,
}

impl GeneratedKind {
    fn folder(self) -> &'static str {
        match self {
            Self::Base => "generated/base",
            Self::Enhanced => "generated/enhanced",
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `-`.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

pub fn date_folder() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

pub fn upload_key(folder: Option<&str>, file_name: &str) -> String {
    let folder = folder
        .map(|value| value.trim().trim_matches('/'))
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_FOLDER);
    format!(
        "{folder}/{}/{}.{}",
        date_folder(),
        Uuid::new_v4(),
        file_extension(file_name)
    )
}

pub fn generated_key(
    kind: GeneratedKind,
    product_handle: Option<&str>,
    view_id: Option<&str>,
    format: OutputFormat,
) -> String {
    let handle = sanitize_segment(
        product_handle
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_PRODUCT_HANDLE),
    );
    let view = sanitize_segment(view_id.filter(|value| !value.is_empty()).unwrap_or(DEFAULT_VIEW));
    format!(
        "{}/{handle}/{view}/{}/{}.{}",
        kind.folder(),
        date_folder(),
        Uuid::new_v4(),
        format.extension()
    )
}

/// Lower-cased text after the last `.`, or `bin`.
pub fn file_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| sanitize_segment(&ext.to_ascii_lowercase()))
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "bin".to_string())
}
