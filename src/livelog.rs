//! Live log feed over WebSocket.
//!
//! The feed is advisory. Lines improve the view of a running test but
//! completion is only ever decided by the report poller, so connection
//! failures and drops are logged and otherwise ignored.

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a background WebSocket reader. Dropping it closes the
/// connection.
pub struct LogFeed {
    cancel: CancellationToken,
}

impl LogFeed {
    /// Connect to `url` and forward each text line to `line_tx`.
    /// Returns immediately; the connection proceeds in the background.
    pub fn open(url: String, token: Option<String>, line_tx: UnboundedSender<String>) -> Self {
        let cancel = CancellationToken::new();
        let feed_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_feed(&url, token.as_deref(), line_tx, feed_cancel).await {
                warn!("live log feed ended: {e:#}");
            }
        });
        Self { cancel }
    }

    /// Tear the feed down. Safe to call more than once.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_feed(
    url: &str,
    token: Option<&str>,
    line_tx: UnboundedSender<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut request = url.into_client_request()?;
    if let Some(token) = token {
        request
            .headers_mut()
            .insert(AUTHORIZATION, format!("Bearer {token}").parse()?);
    }

    let (mut stream, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect_async(request) => connected?,
    };
    debug!(url, "log feed connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    // A frame may batch several newline-separated lines.
                    for line in text.lines() {
                        if line_tx.send(line.to_string()).is_err() {
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("log feed closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("log feed read failed: {e}");
                    break;
                }
            }
        }
    }
    Ok(())
}
