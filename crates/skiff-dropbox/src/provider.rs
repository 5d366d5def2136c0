//! Temporary download and upload links.

use crate::client::DropboxFiles;
use crate::error::map_dropbox_error;
use async_trait::async_trait;
use skiff_core::date::{Clock, UserDateFormatter};
use skiff_core::feature::{PromptUrlProvider, ShareKind, ShareOptions};
use skiff_core::listener::PasswordCallback;
use skiff_core::locale::{LocaleTable, DEFAULT_TABLE};
use skiff_core::url::{DescriptiveUrl, UrlKind};
use skiff_core::{BackgroundError, BackgroundResult, Path, SessionContext};
use std::sync::Arc;
use url::Url;

const HOUR_MS: i64 = 3_600_000;

/// Issues Dropbox temporary links. Download links expire after the
/// configured lifetime (four hours unless overridden); the expiry is part of
/// the label.
pub struct DropboxUrlProvider {
    files: Arc<dyn DropboxFiles>,
    clock: Arc<dyn Clock>,
    formatter: Arc<dyn UserDateFormatter>,
    locale: Arc<LocaleTable>,
    ttl_hours: u64,
}

impl DropboxUrlProvider {
    pub fn new(files: Arc<dyn DropboxFiles>, context: &SessionContext) -> Self {
        Self {
            files,
            clock: context.clock.clone(),
            formatter: context.formatter.clone(),
            locale: context.locale.clone(),
            ttl_hours: context.preferences.dropbox_link_ttl_hours,
        }
    }

    /// "Temporary URL"
    fn temporary_label(&self) -> String {
        self.locale.format(
            "{0} URL",
            DEFAULT_TABLE,
            &[&self.locale.localized("Temporary", "S3")],
        )
    }

    fn expiry_ms(&self) -> i64 {
        self.clock.now_ms() + self.ttl_hours as i64 * HOUR_MS
    }
}

fn parse_link(link: &str) -> BackgroundResult<Url> {
    Url::parse(link).map_err(|e| {
        BackgroundError::interoperability(format!("Invalid link returned by Dropbox: {}", link))
            .with_source(e)
    })
}

#[async_trait]
impl PromptUrlProvider for DropboxUrlProvider {
    fn is_supported(&self, file: &Path, kind: ShareKind) -> bool {
        match kind {
            ShareKind::Download => file.is_file(),
            ShareKind::Upload => true,
        }
    }

    async fn to_download_url(
        &self,
        file: &Path,
        _options: &ShareOptions,
        _prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl> {
        let link = self
            .files
            .temporary_link(file.absolute())
            .await
            .map_err(map_dropbox_error)?;
        let expires = self.locale.format(
            "Expires {0}",
            "S3",
            &[&self.formatter.medium_format(self.expiry_ms())],
        );
        let label = format!("{} ({})", self.temporary_label(), expires);
        log::debug!("Temporary link for {}: {}", file.absolute(), label);
        Ok(DescriptiveUrl::new(parse_link(&link)?, UrlKind::Http, label))
    }

    async fn to_upload_url(
        &self,
        file: &Path,
        _options: &ShareOptions,
        _prompt: &dyn PasswordCallback,
    ) -> BackgroundResult<DescriptiveUrl> {
        let link = self
            .files
            .temporary_upload_link(file.absolute())
            .await
            .map_err(map_dropbox_error)?;
        Ok(DescriptiveUrl::new(
            parse_link(&link)?,
            UrlKind::Http,
            self.temporary_label(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockDropboxFiles;
    use crate::error::DropboxError;
    use skiff_core::date::{ChronoDateFormatter, FixedClock};
    use skiff_core::listener::DisabledPasswordCallback;
    use skiff_core::{ErrorKind, PathType, Preferences};

    const NOW: i64 = 1_700_000_000_000; // 2023-11-14T22:13:20Z
    const LINK: &str = "https://dl.dropboxusercontent.com/apitl/1/abc";

    fn provider(files: MockDropboxFiles, prefs: Preferences) -> DropboxUrlProvider {
        let context = SessionContext::default()
            .with_preferences(prefs)
            .with_clock(Arc::new(FixedClock::new(NOW)))
            .with_formatter(Arc::new(ChronoDateFormatter::default()));
        DropboxUrlProvider::new(Arc::new(files), &context)
    }

    fn file() -> Path {
        Path::new("/reports/q3.pdf", PathType::FILE)
    }

    #[tokio::test]
    async fn download_label_carries_expiry() {
        let mut files = MockDropboxFiles::new();
        files
            .expect_temporary_link()
            .withf(|path| path == "/reports/q3.pdf")
            .times(1)
            .returning(|_| Ok(LINK.to_string()));
        let url = provider(files, Preferences::default())
            .to_download_url(&file(), &ShareOptions::default(), &DisabledPasswordCallback)
            .await
            .unwrap();

        let expected = ChronoDateFormatter::default().medium_format(NOW + 4 * HOUR_MS);
        assert_eq!(expected, "Nov 15, 2023, 2:13:20 AM");
        assert_eq!(url.label(), format!("Temporary URL (Expires {})", expected));
        assert_eq!(url.kind(), UrlKind::Http);
        assert_eq!(url.url().as_str(), LINK);
    }

    #[tokio::test]
    async fn lifetime_follows_preference() {
        let mut files = MockDropboxFiles::new();
        files
            .expect_temporary_link()
            .returning(|_| Ok(LINK.to_string()));
        let prefs = Preferences {
            dropbox_link_ttl_hours: 1,
            ..Preferences::default()
        };
        let url = provider(files, prefs)
            .to_download_url(&file(), &ShareOptions::default(), &DisabledPasswordCallback)
            .await
            .unwrap();
        assert!(url.label().ends_with("(Expires Nov 14, 2023, 11:13:20 PM)"));
    }

    #[tokio::test]
    async fn upload_label_has_no_expiry() {
        let mut files = MockDropboxFiles::new();
        files
            .expect_temporary_upload_link()
            .withf(|path| path == "/inbox")
            .returning(|_| Ok("https://content.dropboxapi.com/apitul/1/xyz".to_string()));
        let folder = Path::new("/inbox", PathType::DIRECTORY);
        let url = provider(files, Preferences::default())
            .to_upload_url(&folder, &ShareOptions::default(), &DisabledPasswordCallback)
            .await
            .unwrap();
        assert_eq!(url.label(), "Temporary URL");
    }

    #[test]
    fn download_requires_file() {
        let provider = provider(MockDropboxFiles::new(), Preferences::default());
        let folder = Path::new("/inbox", PathType::DIRECTORY);
        assert!(!provider.is_supported(&folder, ShareKind::Download));
        assert!(provider.is_supported(&folder, ShareKind::Upload));
        assert!(provider.is_supported(&file(), ShareKind::Download));
    }

    #[tokio::test]
    async fn backend_errors_are_mapped_without_retry() {
        let mut files = MockDropboxFiles::new();
        files.expect_temporary_link().times(1).returning(|_| {
            Err(DropboxError::Api {
                status: 409,
                summary: "path/not_found/..".into(),
            })
        });
        let err = provider(files, Preferences::default())
            .to_download_url(&file(), &ShareOptions::default(), &DisabledPasswordCallback)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn malformed_link_is_interoperability() {
        let mut files = MockDropboxFiles::new();
        files
            .expect_temporary_link()
            .returning(|_| Ok("not a url".to_string()));
        let err = provider(files, Preferences::default())
            .to_download_url(&file(), &ShareOptions::default(), &DisabledPasswordCallback)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Interoperability);
    }
}
