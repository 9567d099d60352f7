//! Client websocket transport.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::client::event::{self, ClientEvent};
use crate::frame::{Data, Frame, SYSCALL_HEARTBEAT};

pub struct ClientSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ClientSocket {
    /// Open `{ws_base}/api/ws` with `auth` as query parameters.
    ///
    /// # Errors
    ///
    /// Bad URL, refused handshake (e.g. 401), or network failure.
    pub async fn connect(ws_base: &str, auth: &[(String, String)]) -> Result<Self, ClientError> {
        let url = reqwest::Url::parse_with_params(&format!("{}/api/ws", ws_base.trim_end_matches('/')), auth)
            .map_err(|e| ClientError::Url(e.to_string()))?;
        let (stream, _) = connect_async(url.as_str()).await?;
        debug!(url = %url.path(), "client: socket connected");
        Ok(Self { stream })
    }

    /// Next recognised event. `Ok(None)` once the server closes the socket.
    /// Malformed and unknown frames are skipped.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>, ClientError> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => match event::parse_text(text.as_str()) {
                    Ok(Some(event)) => return Ok(Some(event)),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "client: invalid frame from server"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "client: socket closed by server");
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Send a `session:heartbeat` request.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        self.send_frame(&Frame::request(SYSCALL_HEARTBEAT, Data::new())).await
    }

    /// Send an arbitrary frame.
    ///
    /// # Errors
    ///
    /// Encode or transport failure.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let json = serde_json::to_string(frame)?;
        self.stream.send(Message::text(json)).await?;
        Ok(())
    }

    /// Close the socket gracefully.
    ///
    /// # Errors
    ///
    /// Transport failure.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
