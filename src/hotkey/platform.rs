//! Platform selection for the tap backend and authorizer

use std::sync::Arc;

use super::auth::Authorizer;
use super::engine::TapBackend;

/// Authorizer for the current platform
pub fn authorizer() -> Arc<dyn Authorizer> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(super::macos::AccessibilityAuthorizer)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(unsupported::UnsupportedAuthorizer)
    }
}

/// Tap backend for the current platform
pub fn backend() -> Arc<dyn TapBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(super::macos::CgEventTapBackend)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(unsupported::UnsupportedBackend)
    }
}

/// Fallbacks that keep the daemon (and its IPC surface) running where no
/// tap exists.
#[cfg(not(target_os = "macos"))]
mod unsupported {
    use tracing::warn;

    use crate::hotkey::auth::Authorizer;
    use crate::hotkey::engine::{EngineError, TapBackend, TapHandler, TapLoop};

    pub struct UnsupportedAuthorizer;

    impl Authorizer for UnsupportedAuthorizer {
        fn is_authorized(&self) -> bool {
            false
        }

        fn prompt_for_authorization(&self) {
            warn!("input monitoring is not supported on this platform");
        }
    }

    pub struct UnsupportedBackend;

    impl TapBackend for UnsupportedBackend {
        fn create(&self, _handler: TapHandler) -> Result<Box<dyn TapLoop>, EngineError> {
            Err(EngineError::ResourceCreation(format!(
                "no event tap available on {}",
                std::env::consts::OS
            )))
        }
    }
}
