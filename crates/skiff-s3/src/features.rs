//! Capabilities an [`S3Session`] offers.

use crate::error::map_s3_error;
use crate::session::S3Session;
use async_trait::async_trait;
use skiff_core::feature::{Headers, Upload, Write};
use skiff_core::listener::ProgressListener;
use skiff_core::transfer::{sha256_hex, Checksum, DigestReader, HashAlgorithm, TransferStatus};
use skiff_core::{BackgroundError, BackgroundResult, ErrorKind, Path, PathAttributes, Session};
use std::collections::BTreeMap;
use std::path::Path as LocalPath;
use std::sync::{Arc, Weak};
use tokio::io::AsyncReadExt;

macro_rules! s3_features {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub struct $name {
                session: Weak<S3Session>,
            }

            impl $name {
                pub fn new(session: Weak<S3Session>) -> Self {
                    Self { session }
                }

                fn session(&self) -> BackgroundResult<Arc<S3Session>> {
                    self.session
                        .upgrade()
                        .ok_or_else(|| BackgroundError::transport("Session is gone"))
                }
            }
        )*
    };
}

s3_features! {
    /// Single `PUT` of a byte buffer.
    S3WriteFeature,
    /// Single `PUT` of a local file, verified against the returned ETag.
    S3SingleUploadService,
    /// User metadata as `x-amz-meta-*` headers.
    S3MetadataFeature,
}

/// `PUT` `data` to `file`. Under AWS4-HMAC-SHA256 the SHA-256 of the
/// payload goes on `status` unless it is already there.
async fn put(
    session: &S3Session,
    file: &Path,
    data: Vec<u8>,
    status: &TransferStatus,
) -> BackgroundResult<PathAttributes> {
    let (bucket, key) = session.object(file)?;
    let mut status = status.clone();
    let has_sha256 = matches!(status.checksum, Some(ref c) if c.algorithm == HashAlgorithm::Sha256);
    if session.signature_version().requires_payload_hash() && !has_sha256 {
        status.checksum = Some(Checksum::new(HashAlgorithm::Sha256, sha256_hex(&data)));
    }
    let size = data.len() as i64;
    let stored = session
        .client()?
        .put_object(&bucket, &key, data, &status)
        .await
        .map_err(map_s3_error)?;
    Ok(PathAttributes {
        size,
        etag: Some(stored.etag),
        metadata: status.metadata.clone(),
        ..PathAttributes::default()
    })
}

#[async_trait]
impl Write for S3WriteFeature {
    async fn write(
        &self,
        file: &Path,
        data: Vec<u8>,
        status: &TransferStatus,
    ) -> BackgroundResult<PathAttributes> {
        let session = self.session()?;
        put(&session, file, data, status).await
    }
}

impl S3SingleUploadService {
    /// SHA-256 of the local file, read ahead of the transfer.
    async fn sha256(local: &LocalPath) -> BackgroundResult<String> {
        let mut reader = DigestReader::sha256(tokio::fs::File::open(local).await?);
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
        Ok(reader.finalize_hex())
    }

    async fn attempt(
        &self,
        session: &S3Session,
        file: &Path,
        local: &LocalPath,
        status: &TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<PathAttributes> {
        let input = tokio::fs::File::open(local).await?;
        let mut body = Vec::new();
        let expected = if session.core().preferences().s3_upload_md5 {
            let mut reader = DigestReader::md5(input);
            reader.read_to_end(&mut body).await?;
            Some(reader.finalize_hex())
        } else {
            log::warn!("MD5 calculation disabled");
            let mut input = input;
            input.read_to_end(&mut body).await?;
            None
        };

        listener.message(&session.core().status("Uploading {0}", &[file.name()]));
        let attributes = put(session, file, body, status).await?;

        if let Some(expected) = expected {
            let etag = attributes.etag.clone().unwrap_or_default();
            if expected != etag {
                return Err(BackgroundError::checksum_mismatch(session.core().context().locale.format(
                    "Upload {0} failed",
                    "Error",
                    &[file.name()],
                ))
                .with_detail(format!(
                    "Mismatch between MD5 hash {} of uploaded data and ETag {} returned by the server",
                    expected, etag
                )));
            }
        }
        Ok(attributes)
    }
}

#[async_trait]
impl Upload for S3SingleUploadService {
    async fn upload(
        &self,
        file: &Path,
        local: &LocalPath,
        status: &mut TransferStatus,
        listener: &dyn ProgressListener,
    ) -> BackgroundResult<PathAttributes> {
        let session = self.session()?;
        let mut retried = false;
        loop {
            let version = session.signature_version();
            if version.requires_payload_hash() {
                status.checksum = Some(Checksum::new(HashAlgorithm::Sha256, Self::sha256(local).await?));
            }
            match self.attempt(&session, file, local, status, listener).await {
                Err(e)
                    if e.kind == ErrorKind::Interoperability
                        && !retried
                        && session.signature_version() != version =>
                {
                    log::info!(
                        "Retry upload of {} with {} signature: {}",
                        file.absolute(),
                        session.signature_version(),
                        e
                    );
                    retried = true;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl Headers for S3MetadataFeature {
    async fn get_metadata(&self, file: &Path) -> BackgroundResult<BTreeMap<String, String>> {
        let session = self.session()?;
        let (bucket, key) = session.object(file)?;
        let head = session
            .client()?
            .head_object(&bucket, &key)
            .await
            .map_err(map_s3_error)?;
        Ok(head.metadata)
    }

    async fn set_metadata(
        &self,
        file: &Path,
        metadata: &BTreeMap<String, String>,
    ) -> BackgroundResult<()> {
        let session = self.session()?;
        let (bucket, key) = session.object(file)?;
        log::debug!("Replace metadata of {} with {:?}", file.absolute(), metadata);
        session
            .client()?
            .copy_object_metadata(&bucket, &key, metadata)
            .await
            .map_err(map_s3_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockS3Client, ObjectHead, S3Client, StoredObject};
    use crate::error::AwsError;
    use crate::signing::{SignatureSelector, SignatureVersion};
    use skiff_core::feature::FeatureKind;
    use skiff_core::host::Credentials;
    use skiff_core::listener::DisabledProgressListener;
    use skiff_core::transfer::md5_hex;
    use skiff_core::{get_feature, Host, PathType, Preferences, Protocol, SessionContext};
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CONTENT: &[u8] = b"The quick brown fox jumps over the lazy dog";

    fn local() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONTENT).unwrap();
        file
    }

    fn target() -> Path {
        Path::new("/bucket/docs/fox.txt", PathType::FILE)
    }

    fn preferences(version: &str, md5: bool) -> Preferences {
        Preferences {
            s3_signature_version: version.into(),
            s3_upload_md5: md5,
            ..Preferences::default()
        }
    }

    /// Connected session around `client`; `client` also receives the
    /// shared selector so tests can flip the signature version.
    async fn connected<F>(prefs: Preferences, build: F) -> Arc<S3Session>
    where
        F: FnOnce(Arc<SignatureSelector>) -> MockS3Client + Send + 'static,
    {
        let slot: Mutex<Option<Arc<dyn S3Client>>> = Mutex::new(None);
        let build = Mutex::new(Some(build));
        let session = S3Session::with_client(
            Host::new(Protocol::S3, "s3.amazonaws.com")
                .with_credentials(Credentials::new("AKIDEXAMPLE", "secret")),
            SessionContext::default().with_preferences(prefs),
            move |selector| {
                let mut slot = slot.lock().unwrap();
                if slot.is_none() {
                    let make = build.lock().unwrap().take().unwrap();
                    let mut client = make(selector);
                    client.expect_list_buckets().returning(|| Ok(Vec::new()));
                    *slot = Some(Arc::new(client));
                }
                slot.clone().unwrap()
            },
        );
        session.connect().await.unwrap();
        session
    }

    fn upload_feature(session: &Arc<S3Session>) -> Arc<dyn Upload> {
        get_feature::<dyn Upload, _>(session.as_ref()).unwrap()
    }

    #[tokio::test]
    async fn etag_mismatch_fails_upload() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client.expect_put_object().times(1).returning(|_, _, _, _| {
                Ok(StoredObject {
                    etag: "0123456789abcdef0123456789abcdef".into(),
                    version_id: None,
                })
            });
            client
        })
        .await;

        let mut status = TransferStatus::new().with_length(CONTENT.len() as i64);
        let err = upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChecksumMismatch);
        assert_eq!(err.message, "Upload fox.txt failed");
        let detail = err.detail.unwrap();
        assert!(detail.contains(&md5_hex(CONTENT)));
        assert!(detail.contains("0123456789abcdef0123456789abcdef"));
    }

    #[tokio::test]
    async fn matching_etag_succeeds_with_payload_hash() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client
                .expect_put_object()
                .withf(|bucket, key, body, status| {
                    bucket == "bucket"
                        && key == "docs/fox.txt"
                        && body.as_slice() == CONTENT
                        && status.checksum
                            == Some(Checksum::new(HashAlgorithm::Sha256, sha256_hex(CONTENT)))
                })
                .times(1)
                .returning(|_, _, body, _| {
                    Ok(StoredObject {
                        etag: md5_hex(&body),
                        version_id: None,
                    })
                });
            client
        })
        .await;

        let mut status = TransferStatus::new();
        let attributes = upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap();
        assert_eq!(attributes.etag.as_deref(), Some(md5_hex(CONTENT).as_str()));
        assert_eq!(attributes.size, CONTENT.len() as i64);
        assert_eq!(
            status.checksum,
            Some(Checksum::new(HashAlgorithm::Sha256, sha256_hex(CONTENT)))
        );
    }

    #[tokio::test]
    async fn legacy_signature_sends_no_payload_hash() {
        let session = connected(preferences("AWS2", true), |_| {
            let mut client = MockS3Client::new();
            client
                .expect_put_object()
                .withf(|_, _, _, status| status.checksum.is_none())
                .returning(|_, _, body, _| {
                    Ok(StoredObject {
                        etag: md5_hex(&body),
                        version_id: None,
                    })
                });
            client
        })
        .await;

        let mut status = TransferStatus::new();
        upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap();
        assert!(status.checksum.is_none());
    }

    #[tokio::test]
    async fn disabled_md5_skips_verification() {
        let session = connected(preferences("AWS4HMACSHA256", false), |_| {
            let mut client = MockS3Client::new();
            client.expect_put_object().returning(|_, _, _, _| {
                Ok(StoredObject {
                    etag: "not-an-md5".into(),
                    version_id: None,
                })
            });
            client
        })
        .await;

        let mut status = TransferStatus::new();
        let attributes = upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap();
        assert_eq!(attributes.etag.as_deref(), Some("not-an-md5"));
    }

    #[tokio::test]
    async fn retries_once_after_signature_switch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let session = connected(preferences("AWS2", true), move |selector| {
            let mut client = MockS3Client::new();
            client.expect_put_object().returning(move |_, _, body, status| {
                if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                    assert!(status.checksum.is_none());
                    selector.switch_to(SignatureVersion::Aws4HmacSha256);
                    return Err(AwsError::new(
                        "InvalidRequest",
                        "The authorization mechanism you have provided is not supported. Please use AWS4-HMAC-SHA256.",
                        400,
                    ));
                }
                assert_eq!(
                    status.checksum.as_ref().map(|c| c.algorithm),
                    Some(HashAlgorithm::Sha256)
                );
                Ok(StoredObject {
                    etag: md5_hex(&body),
                    version_id: None,
                })
            });
            client
        })
        .await;

        let mut status = TransferStatus::new();
        upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.signature_version(), SignatureVersion::Aws4HmacSha256);
    }

    #[tokio::test]
    async fn interoperability_without_switch_is_not_retried() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client.expect_put_object().times(1).returning(|_, _, _, _| {
                Err(AwsError::new(
                    "XAmzContentSHA256Mismatch",
                    "The provided 'x-amz-content-sha256' header does not match what was computed.",
                    400,
                ))
            });
            client
        })
        .await;

        let mut status = TransferStatus::new();
        let err = upload_feature(&session)
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Interoperability);
    }

    #[tokio::test]
    async fn write_puts_buffer() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client
                .expect_put_object()
                .withf(|_, key, body, status| {
                    key == "docs/fox.txt"
                        && body.as_slice() == b"hello"
                        && status.mime.as_deref() == Some("text/plain")
                        && status.checksum.is_some()
                })
                .returning(|_, _, _, _| {
                    Ok(StoredObject {
                        etag: "e".into(),
                        version_id: None,
                    })
                });
            client
        })
        .await;

        let write = get_feature::<dyn Write, _>(session.as_ref()).unwrap();
        let status = TransferStatus::new().with_mime("text/plain");
        let attributes = write.write(&target(), b"hello".to_vec(), &status).await.unwrap();
        assert_eq!(attributes.size, 5);
        assert_eq!(attributes.etag.as_deref(), Some("e"));
    }

    #[tokio::test]
    async fn metadata_reads_head_and_replaces_by_copy() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client
                .expect_head_object()
                .withf(|bucket, key| bucket == "bucket" && key == "docs/fox.txt")
                .returning(|_, _| {
                    let mut head = ObjectHead::default();
                    head.metadata.insert("color".into(), "red".into());
                    Ok(head)
                });
            client
                .expect_copy_object_metadata()
                .withf(|_, _, metadata| metadata.get("color").map(String::as_str) == Some("blue"))
                .times(1)
                .returning(|_, _, _| Ok(()));
            client
        })
        .await;

        let headers = get_feature::<dyn Headers, _>(session.as_ref()).unwrap();
        let metadata = headers.get_metadata(&target()).await.unwrap();
        assert_eq!(metadata.get("color").map(String::as_str), Some("red"));

        let mut update = BTreeMap::new();
        update.insert("color".to_string(), "blue".to_string());
        headers.set_metadata(&target(), &update).await.unwrap();
    }

    #[tokio::test]
    async fn missing_object_maps_to_not_found() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| {
            let mut client = MockS3Client::new();
            client
                .expect_head_object()
                .returning(|_, _| Err(AwsError::parse_xml_error(404, "")));
            client
        })
        .await;
        let headers = get_feature::<dyn Headers, _>(session.as_ref()).unwrap();
        let err = headers.get_metadata(&target()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn features_need_open_session() {
        let session = connected(preferences("AWS4HMACSHA256", true), |_| MockS3Client::new()).await;
        let upload = upload_feature(&session);
        session.close().await;
        assert!(session.feature(FeatureKind::Upload).is_none());
        let mut status = TransferStatus::new();
        let err = upload
            .upload(&target(), local().path(), &mut status, &DisabledProgressListener)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportFailure);
    }
}
