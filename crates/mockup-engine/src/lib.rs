//! Image generation/edit client with bounded retries, plus the collaborators
//! the mockup routes need: prompts, object store, key naming, CORS, media
//! helpers and request validation.

pub mod client;
pub mod config;
pub mod cors;
pub mod error;
pub mod keys;
pub mod media;
pub mod prompts;
pub mod service;
pub mod storage;
pub mod transport;
pub mod validate;

pub use client::ImageApiClient;
pub use config::{ClientConfig, ServiceConfig};
pub use cors::CorsPolicy;
pub use error::{ImageApiError, ImageApiErrorKind, UpstreamError};
pub use service::{MockupService, ServiceError, UploadInput};
pub use storage::{LocalDirStore, MemoryStore, ObjectStore};
pub use transport::{ReqwestTransport, Transport};
