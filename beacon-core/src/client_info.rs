//! Build and platform metadata reported in every ping's `client_info`.

use crate::constants::{ARCH, PLATFORM};

/// Host supplied metadata about the running application.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfoMetrics {
    /// The build identifier of the application.
    pub app_build: String,
    /// The user visible version of the application.
    pub app_display_version: String,
    /// The operating system name.
    pub os: String,
    /// The operating system version.
    pub os_version: String,
    /// The CPU architecture.
    pub architecture: String,
}

impl ClientInfoMetrics {
    /// Metadata for an unknown application on the compile target's platform.
    pub fn unknown() -> Self {
        ClientInfoMetrics {
            app_build: "Unknown".into(),
            app_display_version: "Unknown".into(),
            os: PLATFORM.into(),
            os_version: "Unknown".into(),
            architecture: ARCH.into(),
        }
    }
}

/// Supplies client metadata at assembly time.
///
/// The provider is asked once per assembled ping, so values that change at
/// runtime (e.g. after an OS update) are picked up by the next ping.
pub trait ClientInfoProvider: Send + Sync {
    /// The metadata to report.
    fn client_info(&self) -> ClientInfoMetrics;
}

impl ClientInfoProvider for ClientInfoMetrics {
    fn client_info(&self) -> ClientInfoMetrics {
        self.clone()
    }
}

impl<F> ClientInfoProvider for F
where
    F: Fn() -> ClientInfoMetrics + Send + Sync,
{
    fn client_info(&self) -> ClientInfoMetrics {
        self()
    }
}
