//! Dashboard-to-PDF capture.
//!
//! One linear sequence: build the URL, open a browser, set the bearer
//! header and viewport, navigate and wait for the load event, sleep for the
//! settle time, print, write the file. The browser is closed on every path
//! out of `run_capture`.

use dashprint_core::{dashboard_url, CaptureConfig, Error, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cdp::CdpClient;
use crate::pdf::{decode_pdf, write_pdf, PdfOptions};
use crate::session::BrowserSession;

pub const VIEWPORT_WIDTH: u32 = 1920;
pub const VIEWPORT_HEIGHT: u32 = 1080;

#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// The dashboard URL that was captured.
    pub url: String,
    pub output_file: PathBuf,
    pub bytes_written: usize,
}

pub async fn run_capture(config: &CaptureConfig) -> Result<CaptureReport> {
    let url = dashboard_url(config)?;
    info!(url = %url, "Dashboard URL");

    let mut session = BrowserSession::launch(&config.browser).await?;
    let printed = render_pdf(&session.cdp, config, url.as_str()).await;
    session.close().await;
    let pdf = printed?;

    let bytes_written = write_pdf(&config.output_file, &pdf)?;
    info!(
        path = %config.output_file.display(),
        bytes = bytes_written,
        "PDF written"
    );

    Ok(CaptureReport {
        url: url.to_string(),
        output_file: config.output_file.clone(),
        bytes_written,
    })
}

/// Everything that talks to the page. Returns the decoded PDF bytes.
async fn render_pdf(cdp: &CdpClient, config: &CaptureConfig, url: &str) -> Result<Vec<u8>> {
    cdp.enable_domain("Network").await?;
    cdp.set_extra_headers(json!({
        "Authorization": format!("Bearer {}", config.api_token),
    }))
    .await?;

    cdp.set_viewport(VIEWPORT_WIDTH, VIEWPORT_HEIGHT, 1.0).await?;

    navigate_and_wait(cdp, url).await?;

    if config.wait_time > 0 {
        debug!(seconds = config.wait_time, "Waiting for dashboard to render");
        tokio::time::sleep(Duration::from_secs(config.wait_time)).await;
    }

    let data = cdp.print_to_pdf(&PdfOptions::default()).await?;
    decode_pdf(&data)
}

/// Navigate and block until the page's load event. Fails on network errors
/// and on an HTTP error status for the main document.
async fn navigate_and_wait(cdp: &CdpClient, url: &str) -> Result<()> {
    let mut loaded = cdp.subscribe_event("Page.loadEventFired").await;
    let mut responses = cdp.subscribe_event("Network.responseReceived").await;

    let nav = cdp.navigate(url).await?;
    if let Some(err) = nav.get("errorText").and_then(|v| v.as_str()) {
        return Err(Error::Navigation(format!("{}: {}", url, err)));
    }

    match tokio::time::timeout(cdp.timeout(), loaded.recv()).await {
        Ok(Some(_)) => debug!("Load event fired"),
        Ok(None) => {
            return Err(Error::Cdp("connection closed before the page loaded".into()));
        }
        Err(_) => {
            return Err(Error::Timeout(format!(
                "page did not finish loading within {}s",
                cdp.timeout().as_secs()
            )));
        }
    }

    let loader_id = nav.get("loaderId").and_then(|v| v.as_str()).unwrap_or_default();
    if let Some(status) = document_status(&mut responses, loader_id) {
        if status >= 400 {
            return Err(Error::Navigation(format!("{} returned HTTP {}", url, status)));
        }
        debug!(status, "Document response");
    }
    Ok(())
}

/// Status of the main document response among the events received so far.
fn document_status(responses: &mut mpsc::Receiver<Value>, loader_id: &str) -> Option<u64> {
    while let Ok(event) = responses.try_recv() {
        let is_document = event.get("type").and_then(|v| v.as_str()) == Some("Document");
        let same_loader = event.get("loaderId").and_then(|v| v.as_str()) == Some(loader_id);
        if is_document && same_loader {
            return event
                .get("response")
                .and_then(|r| r.get("status"))
                .and_then(|s| s.as_f64())
                .map(|s| s as u64);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_document_status_matches_loader() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(json!({"type": "Script", "loaderId": "L1", "response": {"status": 404}}))
            .await
            .unwrap();
        tx.send(json!({"type": "Document", "loaderId": "L0", "response": {"status": 500}}))
            .await
            .unwrap();
        tx.send(json!({"type": "Document", "loaderId": "L1", "response": {"status": 200}}))
            .await
            .unwrap();
        assert_eq!(document_status(&mut rx, "L1"), Some(200));
    }

    #[tokio::test]
    async fn test_document_status_missing() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(json!({"type": "XHR", "loaderId": "L1", "response": {"status": 401}}))
            .await
            .unwrap();
        assert_eq!(document_status(&mut rx, "L1"), None);
    }

    #[tokio::test]
    async fn test_bad_config_fails_before_launch() {
        let config = CaptureConfig {
            host: "bad host/with path".into(),
            output_file: std::env::temp_dir().join("dashprint_never_written.pdf"),
            ..Default::default()
        };
        let _ = std::fs::remove_file(&config.output_file);
        assert!(matches!(run_capture(&config).await, Err(Error::Config(_))));
        assert!(!config.output_file.exists());
    }

    // A scripted CDP peer: answers every command, emits the document
    // response and load event after `Page.navigate`, and returns the list
    // of (method, params) it received once the client disconnects.
    mod fake_browser {
        use base64::Engine;
        use futures::{SinkExt, StreamExt};
        use serde_json::{json, Value};
        use tokio::net::TcpListener;
        use tokio::task::JoinHandle;
        use tokio_tungstenite::tungstenite::Message;

        pub struct Page {
            pub status: u64,
            pub error_text: Option<&'static str>,
        }

        pub async fn serve(page: Page) -> (String, JoinHandle<Vec<(String, Value)>>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();

            let handle = tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let mut seen = Vec::new();

                while let Some(Ok(Message::Text(text))) = ws.next().await {
                    let cmd: Value = serde_json::from_str(&text).unwrap();
                    let method = cmd["method"].as_str().unwrap_or_default().to_string();
                    seen.push((method.clone(), cmd["params"].clone()));

                    let result = match method.as_str() {
                        "Page.navigate" => match page.error_text {
                            Some(err) => json!({"frameId": "F1", "loaderId": "L1", "errorText": err}),
                            None => json!({"frameId": "F1", "loaderId": "L1"}),
                        },
                        "Page.printToPDF" => json!({
                            "data": base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 fake"),
                        }),
                        _ => json!({}),
                    };
                    let reply = json!({"id": cmd["id"], "result": result});
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        break;
                    }

                    if method == "Page.navigate" && page.error_text.is_none() {
                        let events = [
                            json!({"method": "Network.responseReceived", "params": {
                                "type": "Document",
                                "loaderId": "L1",
                                "response": {"status": page.status},
                            }}),
                            json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.0}}),
                        ];
                        for event in events {
                            let _ = ws.send(Message::Text(event.to_string())).await;
                        }
                    }
                }
                seen
            });

            (format!("ws://{}", addr), handle)
        }
    }

    fn methods(seen: &[(String, Value)]) -> Vec<&str> {
        seen.iter().map(|(m, _)| m.as_str()).collect()
    }

    async fn render_against(
        page: fake_browser::Page,
        config: &CaptureConfig,
    ) -> (Result<Vec<u8>>, Vec<(String, Value)>) {
        let (ws_url, server) = fake_browser::serve(page).await;
        let cdp = CdpClient::connect(&ws_url, Duration::from_secs(5)).await.unwrap();
        let result = render_pdf(&cdp, config, "http://localhost:3000/d/abc123/?orgId=1&kiosk").await;
        drop(cdp);
        (result, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_render_pdf_command_sequence() {
        let config = CaptureConfig {
            api_token: "glsa_token".into(),
            wait_time: 0,
            ..Default::default()
        };
        let (result, seen) =
            render_against(fake_browser::Page { status: 200, error_text: None }, &config).await;

        assert!(result.unwrap().starts_with(b"%PDF-"));
        assert_eq!(
            methods(&seen),
            vec![
                "Network.enable",
                "Network.setExtraHTTPHeaders",
                "Emulation.setDeviceMetricsOverride",
                "Page.navigate",
                "Page.printToPDF",
            ]
        );
        assert_eq!(seen[1].1["headers"]["Authorization"], "Bearer glsa_token");
        assert_eq!(seen[2].1["width"], 1920);
        assert_eq!(seen[2].1["height"], 1080);
        assert_eq!(seen[3].1["url"], "http://localhost:3000/d/abc123/?orgId=1&kiosk");
        assert_eq!(seen[4].1, serde_json::to_value(PdfOptions::default()).unwrap());
    }

    #[tokio::test]
    async fn test_empty_token_still_sends_bearer_header() {
        let config = CaptureConfig {
            wait_time: 0,
            ..Default::default()
        };
        let (result, seen) =
            render_against(fake_browser::Page { status: 200, error_text: None }, &config).await;

        assert!(result.is_ok());
        let (method, params) = &seen[1];
        assert_eq!(method, "Network.setExtraHTTPHeaders");
        assert_eq!(params["headers"]["Authorization"], "Bearer ");
    }

    #[tokio::test]
    async fn test_http_error_status_stops_before_print() {
        let config = CaptureConfig {
            wait_time: 0,
            ..Default::default()
        };
        let (result, seen) =
            render_against(fake_browser::Page { status: 404, error_text: None }, &config).await;

        assert!(matches!(result, Err(Error::Navigation(ref msg)) if msg.contains("404")));
        assert!(!methods(&seen).contains(&"Page.printToPDF"));
    }

    #[tokio::test]
    async fn test_navigation_error_text_stops_before_print() {
        let config = CaptureConfig {
            wait_time: 0,
            ..Default::default()
        };
        let page = fake_browser::Page {
            status: 0,
            error_text: Some("net::ERR_CONNECTION_REFUSED"),
        };
        let (result, seen) = render_against(page, &config).await;

        assert!(matches!(result, Err(Error::Navigation(ref msg)) if msg.contains("ERR_CONNECTION_REFUSED")));
        assert_eq!(methods(&seen).last(), Some(&"Page.navigate"));
    }
}
