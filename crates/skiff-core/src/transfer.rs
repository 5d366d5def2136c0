//! Transfer bookkeeping and checksums.

use crate::error::{BackgroundError, BackgroundResult};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Crc32,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Crc32 => "CRC32",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub hash: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash: hash.into().to_ascii_lowercase(),
        }
    }

    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> BackgroundResult<Self> {
        let hash = match algorithm {
            HashAlgorithm::Md5 => md5_hex(data),
            HashAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
            HashAlgorithm::Sha256 => sha256_hex(data),
            HashAlgorithm::Crc32 => {
                return Err(BackgroundError::checksum_computation(format!(
                    "{} is not computed locally",
                    algorithm
                )))
            }
        };
        Ok(Self { algorithm, hash })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.algorithm, self.hash)
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// State of a single transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// Bytes to transfer, `-1` when unknown.
    pub length: i64,
    pub offset: i64,
    pub checksum: Option<Checksum>,
    pub mime: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub exists: bool,
    pub append: bool,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self {
            length: -1,
            ..Default::default()
        }
    }

    pub fn with_length(mut self, length: i64) -> Self {
        self.length = length;
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Reader that feeds every byte it yields into a digest, so a checksum of
/// the stream is available once the transfer has consumed it.
pub struct DigestReader<R, D> {
    inner: R,
    digest: D,
    count: u64,
}

impl<R> DigestReader<R, Md5> {
    pub fn md5(inner: R) -> Self {
        Self::new(inner, Md5::new())
    }
}

impl<R> DigestReader<R, Sha256> {
    pub fn sha256(inner: R) -> Self {
        Self::new(inner, Sha256::new())
    }
}

impl<R, D: Digest> DigestReader<R, D> {
    pub fn new(inner: R, digest: D) -> Self {
        Self {
            inner,
            digest,
            count: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    /// Lowercase hex digest of everything read so far.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.digest.finalize())
    }
}

impl<R, D> AsyncRead for DigestReader<R, D>
where
    R: AsyncRead + Unpin,
    D: Digest + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                this.digest.update(fresh);
                this.count += fresh.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn known_digests() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            sha256_hex(b"test"),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
        let sha1 = Checksum::compute(HashAlgorithm::Sha1, b"abc").unwrap();
        assert_eq!(sha1.hash, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn crc32_is_not_computed() {
        let err = Checksum::compute(HashAlgorithm::Crc32, b"x").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ChecksumComputation);
    }

    #[test]
    fn checksum_lowercases() {
        assert_eq!(Checksum::new(HashAlgorithm::Md5, "ABCDEF").hash, "abcdef");
    }

    #[tokio::test]
    async fn digest_reader_passes_bytes_through() {
        let data = b"hello world".to_vec();
        let mut reader = DigestReader::md5(&data[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.bytes_read(), 11);
        assert_eq!(reader.finalize_hex(), md5_hex(b"hello world"));
    }
}
