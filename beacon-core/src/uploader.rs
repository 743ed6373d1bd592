use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;

use crate::upload::UploadOutcome;

/// The network capability injected by the host.
///
/// This is the only network-touching operation the core depends on. An
/// implementation performs one request and classifies the response; see
/// [`UploadOutcome::from_http_status`] for the usual HTTP mapping. It must
/// not retry on its own, retries are scheduled by the upload manager.
pub trait Uploader: Send + Sync + 'static {
    /// Uploads a ping body to `url` with the given headers.
    fn upload(&self, url: &Url, body: &[u8], headers: &BTreeMap<String, String>) -> UploadOutcome;
}

impl<T: Uploader + ?Sized> Uploader for Arc<T> {
    fn upload(&self, url: &Url, body: &[u8], headers: &BTreeMap<String, String>) -> UploadOutcome {
        (**self).upload(url, body, headers)
    }
}
