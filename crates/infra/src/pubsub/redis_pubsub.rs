//! Redis pub/sub subscriber for evaluation results.
//!
//! Pub/sub is not durable: messages published while the gateway is down are
//! lost. That is acceptable here because clients re-fetch submission status
//! on reconnect.

use std::thread;
use std::time::Duration;

use redis::Client;
use tokio::sync::mpsc::UnboundedSender;

use super::{EvaluatedSubmission, EVALUATED_CHANNEL};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How often a blocked read wakes up to notice a closed receiver.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("redis: {0}")]
    Redis(String),
}

#[derive(Debug, Clone)]
pub struct EvaluationSubscriber {
    client: Client,
    channel: String,
}

impl EvaluationSubscriber {
    /// Accepts `redis://host:port` or a bare `host:port`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, SubscriberError> {
        let url = redis_url.as_ref();
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("redis://{url}")
        };
        let client = Client::open(url).map_err(|e| SubscriberError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: EVALUATED_CHANNEL.to_string(),
        })
    }

    /// Start a background thread forwarding decoded messages to `tx`.
    ///
    /// Lost connections are re-established with exponential backoff. The
    /// thread only exits once the receiving half of `tx` is closed.
    pub fn spawn(&self, tx: UnboundedSender<EvaluatedSubmission>) -> thread::JoinHandle<()> {
        let client = self.client.clone();
        let channel = self.channel.clone();

        thread::spawn(move || {
            let mut backoff = Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF);
            while !tx.is_closed() {
                match run_session(&client, &channel, &tx, &mut backoff) {
                    SessionEnd::ReceiverClosed => break,
                    SessionEnd::Disconnected(reason) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            error = %reason,
                            retry_in_ms = delay.as_millis() as u64,
                            "redis subscription lost; reconnecting"
                        );
                        thread::sleep(delay);
                    }
                }
            }
            tracing::info!(channel = %channel, "evaluation subscriber stopped");
        })
    }
}

enum SessionEnd {
    ReceiverClosed,
    Disconnected(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// One connect/subscribe/read cycle. Returns when the connection fails or
/// nobody is listening any more.
fn run_session(
    client: &Client,
    channel: &str,
    tx: &UnboundedSender<EvaluatedSubmission>,
    backoff: &mut Backoff,
) -> SessionEnd {
    let mut conn = match client.get_connection() {
        Ok(c) => c,
        Err(e) => return SessionEnd::Disconnected(e.to_string()),
    };

    let mut pubsub = conn.as_pubsub();
    if let Err(e) = pubsub.subscribe(channel) {
        return SessionEnd::Disconnected(e.to_string());
    }
    if let Err(e) = pubsub.set_read_timeout(Some(READ_TIMEOUT)) {
        return SessionEnd::Disconnected(e.to_string());
    }
    tracing::info!(channel = %channel, "subscribed to evaluation results");
    backoff.reset();

    loop {
        if tx.is_closed() {
            return SessionEnd::ReceiverClosed;
        }

        let msg = match pubsub.get_message() {
            Ok(m) => m,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return SessionEnd::Disconnected(e.to_string()),
        };

        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(_) => continue,
        };

        if forward_payload(&payload, tx) == Flow::Stop {
            return SessionEnd::ReceiverClosed;
        }
    }
}

fn forward_payload(payload: &str, tx: &UnboundedSender<EvaluatedSubmission>) -> Flow {
    let evaluated: EvaluatedSubmission = match serde_json::from_str(payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "failed to decode evaluated submission");
            return Flow::Continue;
        }
    };

    match tx.send(evaluated) {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}

/// Doubling delay, capped at `max`.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
