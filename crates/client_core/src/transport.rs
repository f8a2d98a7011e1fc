use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use shared::protocol::{ClientRequest, ServerEvent};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// What the connection reports to the client, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    Connected,
    Event(ServerEvent),
    /// A frame that could not be read as a server event.
    Malformed(String),
    Disconnected(Option<String>),
}

/// Sending half of an established connection.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn emit(&self, request: &ClientRequest) -> Result<()>;
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        socket_url: &Url,
    ) -> Result<(Arc<dyn EventTransport>, mpsc::Receiver<TransportSignal>)>;
}

pub struct MissingTransport;

#[async_trait]
impl EventTransport for MissingTransport {
    async fn emit(&self, request: &ClientRequest) -> Result<()> {
        Err(anyhow!(
            "not connected: cannot emit {}",
            request.event_name()
        ))
    }
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct WebSocketTransport {
    writer: Mutex<WsWriter>,
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn emit(&self, request: &ClientRequest) -> Result<()> {
        let text = serde_json::to_string(request)?;
        debug!(event = request.event_name(), "transport: emit");
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .with_context(|| format!("failed to emit {}", request.event_name()))
    }
}

/// Opens one websocket per session; no reconnection is attempted.
pub struct WebSocketConnector {
    buffer: usize,
}

impl WebSocketConnector {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        socket_url: &Url,
    ) -> Result<(Arc<dyn EventTransport>, mpsc::Receiver<TransportSignal>)> {
        let (ws_stream, _) = connect_async(socket_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {socket_url}"))?;
        info!(url = %socket_url, "transport: websocket connected");
        let (writer, mut reader) = ws_stream.split();
        let (signals, inbound) = mpsc::channel(self.buffer);

        signals
            .send(TransportSignal::Connected)
            .await
            .map_err(|_| anyhow!("transport signal receiver dropped"))?;

        tokio::spawn(async move {
            // Ends as soon as the client drops its receiver so the socket is
            // released without waiting for another frame.
            let reason = loop {
                let frame = tokio::select! {
                    frame = reader.next() => frame,
                    _ = signals.closed() => {
                        debug!("transport: receiver dropped, closing websocket");
                        return;
                    }
                };
                let Some(frame) = frame else {
                    break None;
                };
                let signal = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => TransportSignal::Event(event),
                        Err(err) => TransportSignal::Malformed(format!("invalid server event: {err}")),
                    },
                    Ok(Message::Close(_)) => break None,
                    Ok(_) => continue,
                    Err(err) => break Some(format!("websocket receive failed: {err}")),
                };
                if signals.send(signal).await.is_err() {
                    return;
                }
            };
            if let Some(reason) = &reason {
                warn!(%reason, "transport: websocket closed with error");
            } else {
                info!("transport: websocket closed");
            }
            let _ = signals.send(TransportSignal::Disconnected(reason)).await;
        });

        Ok((
            Arc::new(WebSocketTransport {
                writer: Mutex::new(writer),
            }),
            inbound,
        ))
    }
}

/// Derives the websocket endpoint from the HTTP server URL.
pub fn socket_url(server_url: &str, socket_path: &str) -> Result<Url> {
    let mut url =
        Url::parse(server_url).with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow!("server_url must be http(s) or ws(s), got {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot use scheme {scheme} for {server_url}"))?;
    url.set_path(socket_path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_map_to_websocket_schemes() {
        let url = socket_url("http://localhost:8000", "/ws").expect("url");
        assert_eq!(url.as_str(), "ws://localhost:8000/ws");
        let url = socket_url("https://chat.example.com/", "/ws").expect("url");
        assert_eq!(url.as_str(), "wss://chat.example.com/ws");
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(socket_url("ftp://example.com", "/ws").is_err());
        assert!(socket_url("not a url", "/ws").is_err());
    }

    #[tokio::test]
    async fn missing_transport_refuses_to_emit() {
        let err = MissingTransport
            .emit(&ClientRequest::FetchHistory { room: "g1_GROUP".into() })
            .await
            .expect_err("no connection");
        assert!(err.to_string().contains("fetch_history"));
    }
}
