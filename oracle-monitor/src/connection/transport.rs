use crate::{
    api::ApiClient,
    config::PollSource,
    error::MonitorError,
    types::{FeedBundle, PushMessage},
};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt, stream::BoxStream};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{Instant, Sleep},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Seam between the connection state machine and the network.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Open a push session.
    async fn connect(&self) -> Result<PushSession, MonitorError>;

    /// Fetch a full-state snapshot for fallback polling.
    async fn fetch_snapshot(&self) -> Result<FeedBundle, MonitorError>;
}

#[async_trait]
impl<T> FeedTransport for std::sync::Arc<T>
where
    T: FeedTransport + ?Sized,
{
    async fn connect(&self) -> Result<PushSession, MonitorError> {
        T::connect(self).await
    }

    async fn fetch_snapshot(&self) -> Result<FeedBundle, MonitorError> {
        T::fetch_snapshot(self).await
    }
}

/// A live push session. Dropping it stops the keep-alive task and closes the socket.
pub struct PushSession {
    stream: BoxStream<'static, Result<PushMessage, MonitorError>>,
    keepalive: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSession")
            .field("keepalive", &self.keepalive.is_some())
            .finish()
    }
}

impl PushSession {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<PushMessage, MonitorError>> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            keepalive: None,
        }
    }

    /// Attach a task that is aborted when the session is dropped.
    pub fn with_keepalive(mut self, task: JoinHandle<()>) -> Self {
        self.keepalive = Some(task);
        self
    }

    /// Yield [`MonitorError::ReadTimeout`] whenever nothing arrives for `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        let stream = std::mem::replace(&mut self.stream, futures::stream::empty().boxed());
        self.stream = TimeoutStream::new(stream, timeout).boxed();
        self
    }

    pub async fn next(&mut self) -> Option<Result<PushMessage, MonitorError>> {
        self.stream.next().await
    }
}

impl Drop for PushSession {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}

/// Stream wrapper yielding a read-timeout error when the inner stream goes silent, so a
/// half-open socket is detected as a disconnect.
struct TimeoutStream<S> {
    inner: S,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl<S> TimeoutStream<S> {
    fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(tokio::time::sleep(timeout)),
        }
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream<Item = Result<PushMessage, MonitorError>> + Unpin,
{
    type Item = Result<PushMessage, MonitorError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let timeout = self.timeout;

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(item) => {
                self.deadline.as_mut().reset(Instant::now() + timeout);
                Poll::Ready(item)
            }
            Poll::Pending => match self.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    warn!(timeout_secs = timeout.as_secs(), "push channel read timeout");
                    self.deadline.as_mut().reset(Instant::now() + timeout);
                    Poll::Ready(Some(Err(MonitorError::ReadTimeout(timeout.as_secs()))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Production transport: WebSocket push channel plus REST polling.
#[derive(Debug, Clone)]
pub struct WsPollTransport {
    ws_url: String,
    api: ApiClient,
    poll_source: PollSource,
    ping_interval: Duration,
    read_timeout: Duration,
}

impl WsPollTransport {
    pub fn new(
        ws_url: impl Into<String>,
        api: ApiClient,
        poll_source: PollSource,
        ping_interval: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            api,
            poll_source,
            ping_interval,
            read_timeout,
        }
    }
}

#[async_trait]
impl FeedTransport for WsPollTransport {
    async fn connect(&self) -> Result<PushSession, MonitorError> {
        debug!(url = %self.ws_url, "opening push channel");
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        info!(url = %self.ws_url, "push channel connected");

        let (mut write, read) = ws_stream.split();

        let ping_interval = self.ping_interval;
        let keepalive = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
            loop {
                interval.tick().await;
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("failed to send ping, push channel likely dead");
                    break;
                }
            }
        });

        let stream = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<PushMessage>(text.as_str()).map_err(MonitorError::from),
                ),
                Ok(Message::Close(frame)) => {
                    info!(?frame, "server closed push channel");
                    Some(Err(MonitorError::ChannelClosed))
                }
                // Ping/Pong are answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => None,
                Err(error) => Some(Err(MonitorError::from(error))),
            }
        });

        Ok(PushSession::new(stream)
            .with_keepalive(keepalive)
            .with_read_timeout(self.read_timeout))
    }

    async fn fetch_snapshot(&self) -> Result<FeedBundle, MonitorError> {
        match &self.poll_source {
            PollSource::Full => self.api.fetch_data().await,
            PollSource::Asset(asset) => self.api.fetch_asset_bundle(asset).await,
        }
    }
}
