//! Minimal Chrome DevTools Protocol client over WebSocket.
//!
//! Outgoing commands go through a channel to `write_pump`, which owns the
//! sink. `read_pump` owns the stream and hands each frame to a `Router`
//! that wakes the command waiting on that id or fans event params out to
//! subscribers.

use dashprint_core::{Error, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::pdf::PdfOptions;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One decoded frame from the browser.
#[derive(Debug, PartialEq)]
enum Inbound {
    Response { id: u64, body: Value },
    Event { method: String, params: Value },
}

impl Inbound {
    fn parse(text: &str) -> Option<Self> {
        let val: Value = serde_json::from_str(text).ok()?;
        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
            return Some(Self::Response { id, body: val });
        }
        let method = val.get("method")?.as_str()?.to_string();
        let params = val.get("params").cloned().unwrap_or(Value::Null);
        Some(Self::Event { method, params })
    }
}

/// Shared between the client and its reader task.
#[derive(Default)]
struct Router {
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    listeners: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
}

impl Router {
    async fn route(&self, frame: Inbound) {
        match frame {
            Inbound::Response { id, body } => {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let _ = tx.send(body);
                }
            }
            Inbound::Event { method, params } => {
                if let Some(senders) = self.listeners.lock().await.get(&method) {
                    for tx in senders {
                        // A full subscriber loses the event rather than stalling the reader.
                        let _ = tx.try_send(params.clone());
                    }
                }
            }
        }
    }

    /// Fail every in-flight command by dropping its sender.
    async fn disconnect(&self) {
        self.pending.lock().await.clear();
    }
}

async fn write_pump(mut sink: SplitSink<Socket, Message>, mut outgoing: mpsc::Receiver<String>) {
    while let Some(text) = outgoing.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            error!("CDP WebSocket write error: {}", e);
            break;
        }
    }
}

async fn read_pump(mut stream: SplitStream<Socket>, router: Arc<Router>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Some(frame) = Inbound::parse(&text) {
                    router.route(frame).await;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("CDP WebSocket closed by browser");
                break;
            }
            Err(e) => {
                warn!("CDP WebSocket read error: {}", e);
                break;
            }
            _ => {}
        }
    }
    router.disconnect().await;
}

pub struct CdpClient {
    outgoing: mpsc::Sender<String>,
    router: Arc<Router>,
    next_id: AtomicU64,
    timeout: Duration,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint. `timeout` bounds every command.
    pub async fn connect(ws_url: &str, timeout: Duration) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("cannot connect to {}: {}", ws_url, e)))?;
        let (sink, stream) = socket.split();
        let (outgoing, outgoing_rx) = mpsc::channel::<String>(256);
        let router = Arc::new(Router::default());

        Ok(Self {
            outgoing,
            router: router.clone(),
            next_id: AtomicU64::new(1),
            timeout,
            reader: tokio::spawn(read_pump(stream, router)),
            writer: tokio::spawn(write_pump(sink, outgoing_rx)),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a command and wait for its `result` object.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.router.pending.lock().await.insert(id, tx);

        debug!(id, method, "CDP command");
        if let Err(e) = self.outgoing.send(msg.to_string()).await {
            self.router.pending.lock().await.remove(&id);
            return Err(Error::Cdp(format!("cannot send {}: {}", method, e)));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    Err(Error::Cdp(format!("{} failed: {}", method, err)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!(
                "connection closed while waiting for {}",
                method
            ))),
            Err(_) => {
                self.router.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Receive the params of every future `method` event.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.router
            .listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Start a navigation. Returns the raw `Page.navigate` result
    /// (`frameId`, `loaderId`, and `errorText` when the load failed).
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({ "url": url }))
            .await
    }

    /// Headers sent with every request the page issues from now on.
    pub async fn set_extra_headers(&self, headers: Value) -> Result<()> {
        self.send_command("Network.setExtraHTTPHeaders", json!({ "headers": headers }))
            .await?;
        Ok(())
    }

    pub async fn set_viewport(&self, width: u32, height: u32, device_scale_factor: f64) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Print the current page and return the base64 PDF payload.
    pub async fn print_to_pdf(&self, options: &PdfOptions) -> Result<String> {
        let params = serde_json::to_value(options)?;
        let result = self.send_command("Page.printToPDF", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Export("Page.printToPDF returned no data".into()))
    }

    /// Ask the browser to shut down. The connection drops right after.
    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
