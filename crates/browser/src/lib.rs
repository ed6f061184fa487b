//! Headless browser capture over the Chrome DevTools Protocol.
//!
//! - `cdp`: JSON-over-WebSocket command/event client
//! - `session`: browser process + page target lifetime
//! - `pdf`: print options and output file handling
//! - `capture`: the end-to-end dashboard-to-PDF sequence

pub mod capture;
pub mod cdp;
pub mod pdf;
pub mod session;

pub use capture::{run_capture, CaptureReport};
pub use cdp::CdpClient;
pub use pdf::PdfOptions;
pub use session::{find_browser_binary, BrowserSession};
