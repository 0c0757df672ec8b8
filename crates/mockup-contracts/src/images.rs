use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[serde(rename = "auto")]
    Auto,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1024x1024",
            Self::Landscape => "1536x1024",
            Self::Portrait => "1024x1536",
            Self::Auto => "auto",
        }
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1024x1024" => Ok(Self::Square),
            "1536x1024" => Ok(Self::Landscape),
            "1024x1536" => Ok(Self::Portrait),
            "auto" => Ok(Self::Auto),
            other => Err(format!(
                "unsupported size '{other}' (expected 1024x1024, 1536x1024, 1024x1536 or auto)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    #[default]
    Auto,
    Opaque,
    Transparent,
}

impl Background {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Opaque => "opaque",
            Self::Transparent => "transparent",
        }
    }
}

impl FromStr for Background {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "opaque" => Ok(Self::Opaque),
            "transparent" => Ok(Self::Transparent),
            other => Err(format!(
                "unsupported background '{other}' (expected auto, opaque or transparent)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        content_type_for_format(self.as_str())
    }

    /// File extension used for stored objects.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(Self::Png),
            "jpeg" | "jpg" | "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "webp" | "image/webp" => Ok(Self::Webp),
            other => Err(format!(
                "unsupported output format '{other}' (expected png, jpeg or webp)"
            )),
        }
    }
}

/// Maps an output format name to the MIME type of the returned bytes.
pub fn content_type_for_format(format: &str) -> &'static str {
    match format.trim().to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => OCTET_STREAM,
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(ImageSize, Background, OutputFormat);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageEndpoint {
    Generations,
    Edits,
}

impl ImageEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Generations => "images/generations",
            Self::Edits => "images/edits",
        }
    }

    /// Label used as the prefix of error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Generations => "OpenAI generate",
            Self::Edits => "OpenAI edit",
        }
    }
}

/// Raw image bytes plus the file metadata sent in a multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl ImageFile {
    pub fn new(
        bytes: Vec<u8>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    pub fn png(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self::new(bytes, filename, "image/png")
    }
}

/// Text-to-image request. `model: None` resolves to the client's generate model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub model: Option<String>,
    pub background: Background,
    pub output_format: OutputFormat,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            size: ImageSize::default(),
            model: None,
            background: Background::default(),
            output_format: OutputFormat::default(),
        }
    }

    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    pub fn output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }
}

/// Prompt plus a base image and an overlay image; the upstream treats the
/// first `image` part as the primary input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub prompt: String,
    pub base_image: ImageFile,
    pub overlay_image: ImageFile,
    pub size: ImageSize,
    pub model: Option<String>,
    pub background: Background,
    pub output_format: OutputFormat,
}

impl EditRequest {
    pub fn new(prompt: impl Into<String>, base_image: ImageFile, overlay_image: ImageFile) -> Self {
        Self {
            prompt: prompt.into(),
            base_image,
            overlay_image,
            size: ImageSize::default(),
            model: None,
            background: Background::default(),
            output_format: OutputFormat::default(),
        }
    }

    pub fn size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    pub fn output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub model: String,
    pub size: ImageSize,
    pub background: Background,
    pub output_format: OutputFormat,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResult {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: ImageMetadata,
}
