use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::cdp::{CdpConnection, CdpContext};
use super::{BrowserError, BrowserLauncher, BrowsingContext};
use crate::config::CsrfConfig;
use crate::utils::capture_group_1_owned;

static DEVTOOLS_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DevTools listening on (ws://\S+)").unwrap());

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const EXECUTABLE_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

/// Launches a fresh Chromium per context with a throw-away profile directory.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    headless: bool,
    extra_args: Vec<String>,
    command_timeout: Duration,
    startup_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self {
            executable,
            headless: true,
            extra_args: Vec::new(),
            command_timeout: Duration::from_secs(15),
            startup_timeout: Duration::from_secs(20),
        }
    }

    pub fn from_config(config: &CsrfConfig) -> Self {
        Self::new(config.browser_executable.clone())
            .headless(config.headless)
            .args(config.browser_args.iter().cloned())
            .command_timeout(config.command_timeout())
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn resolve_executable(&self) -> Result<PathBuf, BrowserError> {
        if let Some(path) = &self.executable {
            return Ok(path.clone());
        }
        find_on_path(EXECUTABLE_CANDIDATES).ok_or_else(|| {
            BrowserError::Launch(format!(
                "no browser found on PATH (tried {}); set csrf.browser_executable",
                EXECUTABLE_CANDIDATES.join(", ")
            ))
        })
    }

    fn build_command(&self, executable: &Path, profile: &Path) -> Command {
        let mut cmd = Command::new(executable);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut user_data_dir = OsString::from("--user-data-dir=");
        user_data_dir.push(profile.as_os_str());

        cmd.arg("--remote-debugging-port=0")
            .arg(user_data_dir)
            .args([
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-background-networking",
                "--disable-sync",
                "--disable-extensions",
                "--disable-blink-features=AutomationControlled",
            ]);
        if self.headless {
            cmd.arg("--headless=new");
        }
        cmd.args(&self.extra_args)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn find_on_path(candidates: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        candidates.iter().find_map(|name| {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
            let exe = candidate.with_extension("exe");
            exe.is_file().then_some(exe)
        })
    })
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        let executable = self.resolve_executable()?;
        let profile = TempDir::new()?;

        let mut child = self
            .build_command(&executable, profile.path())
            .spawn()
            .map_err(|e| BrowserError::Launch(format!("{}: {e}", executable.display())))?;
        info!(executable = %executable.display(), headless = self.headless, "Launched browser");

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrowserError::Launch("browser stderr not captured".to_string()))?;

        // Chromium announces the browser websocket on stderr.
        let mut lines = BufReader::new(stderr).lines();
        let ws_url = tokio::time::timeout(self.startup_timeout, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(url) = capture_group_1_owned(&DEVTOOLS_URL_REGEX, &line) {
                    return Ok::<String, BrowserError>(url);
                }
                debug!(line = %line, "browser stderr");
            }
            Err(BrowserError::Launch(
                "browser exited before opening DevTools".to_string(),
            ))
        })
        .await
        .map_err(|_| BrowserError::Timeout("browser startup".to_string()))??;

        let conn = CdpConnection::connect(&ws_url, self.command_timeout).await?;
        let context = CdpContext::open(conn, child, profile, self.command_timeout * 2).await?;
        Ok(Box::new(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devtools_url_regex() {
        let line = "DevTools listening on ws://127.0.0.1:41234/devtools/browser/7c1b-4d2e";
        assert_eq!(
            capture_group_1_owned(&DEVTOOLS_URL_REGEX, line).as_deref(),
            Some("ws://127.0.0.1:41234/devtools/browser/7c1b-4d2e")
        );
        assert!(capture_group_1_owned(&DEVTOOLS_URL_REGEX, "[WARNING] gpu").is_none());
    }

    #[test]
    fn test_command_flags() {
        let launcher = ChromeLauncher::new(Some(PathBuf::from("/usr/bin/chromium")))
            .headless(true)
            .args(["--no-sandbox".to_string()]);
        let cmd = launcher.build_command(Path::new("/usr/bin/chromium"), Path::new("/tmp/p"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/p".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_explicit_executable_wins() {
        let launcher = ChromeLauncher::new(Some(PathBuf::from("/opt/chrome/chrome")));
        assert_eq!(
            launcher.resolve_executable().unwrap(),
            PathBuf::from("/opt/chrome/chrome")
        );
    }
}
