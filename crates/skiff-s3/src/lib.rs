//! # skiff-s3
//!
//! Amazon S3 session for skiff:
//!
//! - `signing`: AWS Signature Version 4 and the legacy Version 2 scheme
//! - `client`: path-style REST client that switches to v4 when asked to
//! - `session`: key validation and feature lookup
//! - `features`: single-part upload with ETag verification, write, metadata
//! - `error`: S3 error replies mapped onto the skiff error taxonomy

pub mod client;
pub mod error;
pub mod features;
pub mod session;
pub mod signing;

pub use client::{ObjectHead, S3Client, S3RestClient, StoredObject};
pub use error::{map_s3_error, AwsError};
pub use features::{S3MetadataFeature, S3SingleUploadService, S3WriteFeature};
pub use session::{S3Session, S3SessionFactory};
pub use signing::{AwsCredentials, SignatureSelector, SignatureVersion};
