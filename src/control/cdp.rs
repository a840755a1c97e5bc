//! Minimal DevTools-protocol session over a single websocket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::script;
use super::snapshot::{ElementRef, ElementSnapshot, UiSnapshot};
use crate::error::ControlError;
use crate::traits::ControlSurface;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Entry of the endpoint's `/json/list` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub url: String,

    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    /// Page targets that can be driven; devtools and extension pages are skipped.
    pub fn is_controllable(&self) -> bool {
        self.kind == "page"
            && self.web_socket_debugger_url.is_some()
            && !self.url.starts_with("devtools://")
            && !self.url.starts_with("chrome-extension://")
    }
}

/// Connected session. Commands are serialized through the socket lock, so only
/// one request is outstanding at any time.
pub struct CdpSession {
    socket: Mutex<Socket>,
    next_id: AtomicU64,
    command_timeout: Duration,
    target: TargetInfo,
}

impl fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpSession")
            .field("target", &self.target.id)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl CdpSession {
    pub fn new(socket: Socket, target: TargetInfo, command_timeout: Duration) -> Self {
        Self {
            socket: Mutex::new(socket),
            next_id: AtomicU64::new(1),
            command_timeout,
            target,
        }
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Sends one command and waits for the reply with the same id. Events that
    /// arrive in between are dropped.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ControlError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({ "id": id, "method": method, "params": params });

        let mut socket = self.socket.lock().await;
        socket.send(Message::Text(request.to_string())).await?;
        trace!(id, method, "command sent");

        let reply = timeout(self.command_timeout, read_reply(&mut *socket, id))
            .await
            .map_err(|_| ControlError::Timeout {
                method: method.to_string(),
                timeout_ms: self.command_timeout.as_millis() as u64,
            })??;

        if let Some(error) = reply.get("error") {
            return Err(ControlError::Protocol {
                method: method.to_string(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluates an expression in the page and returns its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, ControlError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("exception")
                .to_string();
            return Err(ControlError::Script(text));
        }

        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    pub async fn close(self) -> Result<(), ControlError> {
        let mut socket = self.socket.into_inner();
        socket.close(None).await?;
        Ok(())
    }
}

async fn read_reply(socket: &mut Socket, id: u64) -> Result<Value, ControlError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                let message: Value = serde_json::from_str(&text)?;
                if message.get("id").and_then(Value::as_u64) == Some(id) {
                    return Ok(message);
                }
            }
            Some(Ok(Message::Close(_))) | None => return Err(ControlError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ControlError::from(e)),
        }
    }
}

#[async_trait]
impl ControlSurface for CdpSession {
    async fn snapshot(&self) -> Result<UiSnapshot, ControlError> {
        let value = self.evaluate(script::SNAPSHOT).await?;
        let elements: Vec<ElementSnapshot> = serde_json::from_value(value)?;
        debug!(elements = elements.len(), "snapshot captured");
        Ok(UiSnapshot::new(elements))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), ControlError> {
        match self.evaluate(&script::click(element.as_str())).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(ControlError::StaleElement(element.to_string())),
        }
    }

    async fn set_value(&self, element: &ElementRef, value: &str) -> Result<(), ControlError> {
        match self
            .evaluate(&script::set_value(element.as_str(), value))
            .await?
        {
            Value::Bool(true) => Ok(()),
            _ => Err(ControlError::StaleElement(element.to_string())),
        }
    }

    async fn read_value(&self, element: &ElementRef) -> Result<String, ControlError> {
        match self.evaluate(&script::read_value(element.as_str())).await? {
            Value::String(value) => Ok(value),
            _ => Err(ControlError::StaleElement(element.to_string())),
        }
    }

    async fn ready(&self) -> Result<bool, ControlError> {
        let state = self.evaluate(script::READY_STATE).await?;
        Ok(matches!(state.as_str(), Some("complete") | Some("interactive")))
    }
}
