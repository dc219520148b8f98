use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use ogent_shared::{AgentEvent, ControllerEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// A cheaply-cloneable handle for sending `AgentEvent`s to the controller.
/// Cloned into every worker task so progress and result frames can be
/// emitted without threading the whole `Client` through the worker pool.
#[derive(Clone)]
pub struct EventSender {
    outbound_tx: mpsc::UnboundedSender<Message>,
}

impl EventSender {
    pub fn send(&self, event: &AgentEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        self.outbound_tx
            .send(Message::Text(payload))
            .map_err(|_| anyhow::anyhow!("controller connection is closed"))
    }
}

/// A single WebSocket session with the controller. Splits the socket into
/// a writer task fed by an unbounded queue (so callers never block on a
/// slow or congested connection) and a reader task that decodes
/// `ControllerEvent`s onto an inbound queue the agent loop drains.
pub struct Client {
    sender: EventSender,
    inbound_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Connects to the controller's agent WebSocket endpoint, authenticating
    /// via the bearer token as a query parameter (the upgrade handshake
    /// can't carry custom headers from every client runtime).
    pub async fn connect(ws_url: &str, bearer_token: &str) -> Result<Self> {
        let mut url = url::Url::parse(ws_url).context("invalid controller_url")?;
        url.query_pairs_mut().append_pair("token", bearer_token);

        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("failed to connect to controller")?;
        let (mut write, mut read) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ControllerEvent>();
        let reader_task = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ControllerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "received malformed controller event");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            sender: EventSender { outbound_tx },
            inbound_rx,
            writer_task,
            reader_task,
        })
    }

    /// Returns a cloneable sender that worker tasks can use independently
    /// of the main receive loop.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Waits for the next event from the controller, or `None` once the
    /// connection has dropped.
    pub async fn recv_event(&mut self) -> Option<ControllerEvent> {
        self.inbound_rx.recv().await
    }

    pub async fn close(self) {
        drop(self.sender);
        let _ = self.writer_task.await;
        self.reader_task.abort();
    }
}

/// Exchanges the agent's configured credentials for a bearer token via the
/// controller's bootstrap HTTP endpoint, ahead of opening the WebSocket.
pub async fn fetch_bearer_token(controller_url: &str, username: &str, password: &str) -> Result<String> {
    let token_url = http_token_url(controller_url)?;

    let response = reqwest::Client::new()
        .post(token_url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .context("failed to reach controller /token endpoint")?
        .error_for_status()
        .context("controller rejected credentials")?;

    let token: ogent_shared::TokenResponse = response.json().await?;
    Ok(token.access_token)
}

fn http_token_url(controller_url: &str) -> Result<String> {
    let mut url = url::Url::parse(controller_url).context("invalid controller_url")?;
    match url.scheme() {
        "ws" => url.set_scheme("http").ok(),
        "wss" => url.set_scheme("https").ok(),
        _ => None,
    };
    url.set_path("/token");
    url.set_query(None);
    Ok(url.to_string())
}
