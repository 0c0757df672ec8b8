pub mod events;
pub mod images;

pub use images::{
    content_type_for_format, Background, EditRequest, GenerateRequest, ImageEndpoint, ImageFile,
    ImageMetadata, ImageResult, ImageSize, OutputFormat,
};
