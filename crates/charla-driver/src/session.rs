use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use charla_core::config::BrowserConfig;

use crate::error::{DriverError, Result};

/// How long the DevTools connection may sit idle before headless_chrome
/// gives up on the browser. The session is long-lived; keep it generous.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Exclusive claim on the profile directory. A second process pointed at the
/// same profile would corrupt the WhatsApp Web session, so startup fails fast
/// when the lock already exists. Removed on drop.
pub struct ProfileLock {
    path: PathBuf,
}

impl ProfileLock {
    pub fn acquire(profile_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(profile_dir)?;
        let path = profile_dir.join("profile.lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(DriverError::ProfileLocked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove profile lock");
        }
    }
}

/// Launch the persistent browser context over the configured profile
/// directory and open a tab on WhatsApp Web. The profile is the source of
/// truth for session cookies — no login flow lives in this codebase.
pub fn launch(cfg: &BrowserConfig) -> Result<(Browser, Arc<Tab>)> {
    let profile_dir = PathBuf::from(&cfg.user_data_dir);
    std::fs::create_dir_all(&profile_dir)?;

    info!(
        profile = %profile_dir.display(),
        headless = cfg.headless,
        "launching browser context"
    );

    let options = LaunchOptions::default_builder()
        .headless(cfg.headless)
        .sandbox(false)
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .user_data_dir(Some(profile_dir))
        .build()
        .map_err(DriverError::browser)?;

    let browser = Browser::new(options).map_err(DriverError::browser)?;
    let tab = browser.new_tab().map_err(DriverError::browser)?;

    tab.navigate_to(&cfg.whatsapp_url)
        .map_err(DriverError::browser)?;
    tab.wait_until_navigated().map_err(DriverError::browser)?;
    info!(url = %cfg.whatsapp_url, "navigation complete");

    Ok((browser, tab))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_profile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProfileLock::acquire(dir.path()).unwrap();
        let second = ProfileLock::acquire(dir.path());
        assert!(matches!(second, Err(DriverError::ProfileLocked(_))));
        drop(first);
        // Lock released: a new claim succeeds.
        assert!(ProfileLock::acquire(dir.path()).is_ok());
    }
}
