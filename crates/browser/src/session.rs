//! Browser process lifetime.
//!
//! A `BrowserSession` owns one Chromium-family child process, its throwaway
//! profile directory and a CDP connection to its first page target. The
//! process is terminated by `close()` and, failing that, on drop.

use dashprint_core::{BrowserSettings, Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;

const WINDOW_SIZE: &str = "--window-size=1920,1080";

pub struct BrowserSession {
    pub cdp: CdpClient,
    pub debug_port: u16,
    chrome_process: Child,
    profile_dir: PathBuf,
    closed: bool,
}

impl BrowserSession {
    /// Spawn a browser and connect to its page target.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let browser_path = match &settings.binary {
            Some(path) => path.clone(),
            None => find_browser_binary().ok_or_else(|| {
                Error::Session("no Chrome/Chromium/Edge binary found; pass --browser_path".into())
            })?,
        };

        let profile_dir =
            std::env::temp_dir().join(format!("dashprint-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| Error::Session(format!("cannot create profile dir: {}", e)))?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(debug_port, &profile_dir, settings);

        info!(
            browser = %browser_path.display(),
            port = debug_port,
            headed = settings.headed,
            "Launching browser"
        );

        let mut child = match Command::new(&browser_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(Error::Session(format!(
                    "failed to launch {}: {}",
                    browser_path.display(),
                    e
                )));
            }
        };

        let timeout = Duration::from_secs(settings.timeout_secs);
        match connect_page(debug_port, timeout).await {
            Ok(cdp) => Ok(Self {
                cdp,
                debug_port,
                chrome_process: child,
                profile_dir,
                closed: false,
            }),
            Err(e) => {
                let _ = child.kill().await;
                let _ = std::fs::remove_dir_all(&profile_dir);
                Err(e)
            }
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.chrome_process.id()
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Shut the browser down, reap the process and remove the profile.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.cdp.close_browser().await {
            debug!("Browser.close failed (may already be gone): {}", e);
        }
        if let Err(e) = self.chrome_process.kill().await {
            debug!("browser kill: {}", e);
        }
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            warn!(dir = %self.profile_dir.display(), "cannot remove browser profile: {}", e);
        }
        info!(port = self.debug_port, "Browser closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.chrome_process.start_kill();
            let _ = std::fs::remove_dir_all(&self.profile_dir);
        }
    }
}

async fn connect_page(port: u16, timeout: Duration) -> Result<CdpClient> {
    wait_for_cdp_ready(port, timeout).await?;
    let page_ws_url = page_ws_url(port).await?;
    let cdp = CdpClient::connect(&page_ws_url, timeout).await?;
    cdp.enable_domain("Page").await?;
    info!(ws_url = %page_ws_url, "CDP connection established");
    Ok(cdp)
}

/// Launch flags for a Chromium-family browser.
pub fn build_browser_args(
    debug_port: u16,
    profile_dir: &Path,
    settings: &BrowserSettings,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--disable-gpu".to_string(),
        "--hide-scrollbars".to_string(),
        "--mute-audio".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !settings.headed {
        args.push("--headless=new".to_string());
    }
    if settings.no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    args.push(WINDOW_SIZE.to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a Chromium-family browser on this machine.
pub fn find_browser_binary() -> Option<PathBuf> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome", "google-chrome-stable",
            "chromium", "chromium-browser",
            "microsoft-edge", "microsoft-edge-stable",
            "/usr/bin/google-chrome", "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
        ]
    };

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_absolute() {
            if path.exists() {
                return Some(path.to_path_buf());
            }
        } else if let Ok(found) = which::which(candidate) {
            return Some(found);
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Session(format!("cannot bind a free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Session(format!("cannot read local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the debugging endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Session(format!(
                "browser debugging endpoint not ready after {:?} on port {}",
                timeout, port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()).is_some() {
                    return Ok(());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first `page` target listed by `/json/list`.
async fn page_ws_url(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Session("no page target found after retries".into()))
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headless_args() {
        let settings = BrowserSettings::default();
        let args = build_browser_args(9222, Path::new("/tmp/profile"), &settings);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(!args.contains(&"--no-sandbox".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));
    }

    #[test]
    fn test_headed_no_sandbox_args() {
        let settings = BrowserSettings {
            headed: true,
            no_sandbox: true,
            ..Default::default()
        };
        let args = build_browser_args(9222, Path::new("/tmp/profile"), &settings);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn test_first_page_ws_url() {
        let targets = vec![
            json!({"type": "service_worker", "webSocketDebuggerUrl": "ws://sw"}),
            json!({"type": "page"}),
            json!({"type": "page", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A"}),
        ];
        assert_eq!(
            first_page_ws_url(&targets).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/page/A")
        );
        assert_eq!(first_page_ws_url(&[]), None);
    }

    #[tokio::test]
    async fn test_find_free_port() {
        let port = find_free_port().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_cdp_ready_honours_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let started = Instant::now();
        let result = wait_for_cdp_ready(port, Duration::from_millis(500)).await;
        assert!(matches!(result, Err(Error::Session(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let settings = BrowserSettings {
            binary: Some(PathBuf::from("/nonexistent/dashprint-test-browser")),
            ..Default::default()
        };
        assert!(matches!(
            BrowserSession::launch(&settings).await,
            Err(Error::Session(_))
        ));
    }
}
