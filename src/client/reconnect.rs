//! Reconnection with bounded exponential backoff.
//!
//! Contract: on unexpected channel loss, retry with `min(base * 2^attempt,
//! cap)` delay; the attempt counter resets on a successful connect; give up
//! after a fixed attempt count; replay the active join on every reconnect; a
//! manual disconnect never retries.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::transport::ChannelTransport;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    /// ±30% jitter to avoid thundering reconnects after a server restart.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 8,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        let raw = self
            .base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.cap);
        if !self.jitter {
            return raw;
        }
        let mut rng = rand::thread_rng();
        let factor = 1.0 + rng.gen_range(-0.3..0.3);
        Duration::from_millis((raw.as_millis() as f64 * factor) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    /// A text frame from the server, passed through verbatim.
    Frame(String),
    /// Channel lost; `will_retry` is false for a manual disconnect.
    Disconnected { will_retry: bool },
    /// Retry budget exhausted; terminal.
    GaveUp,
}

/// Caller-facing controls for a running [`ChatClient`].
pub struct ClientHandle {
    close_tx: watch::Sender<bool>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    /// Manual disconnect: the run loop exits without retrying.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    pub fn send(&self, frame: String) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }
}

pub struct ChatClient<T: ChannelTransport> {
    transport: T,
    policy: ReconnectPolicy,
    /// Conversation to (re)join after every successful connect.
    active_conversation: Option<String>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    close_rx: watch::Receiver<bool>,
}

impl<T: ChannelTransport> ChatClient<T> {
    pub fn new(
        transport: T,
        policy: ReconnectPolicy,
        active_conversation: Option<String>,
    ) -> (Self, ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        (
            Self {
                transport,
                policy,
                active_conversation,
                events_tx,
                outbound_rx,
                close_rx,
            },
            ClientHandle {
                close_tx,
                outbound_tx,
            },
            events_rx,
        )
    }

    fn closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Drives the connection until a manual close or the retry budget runs
    /// out. Returns the terminal event it emitted last.
    pub async fn run(mut self) -> ClientEvent {
        let mut attempt: u32 = 0;

        loop {
            if self.closed() {
                let event = ClientEvent::Disconnected { will_retry: false };
                let _ = self.events_tx.send(event.clone());
                return event;
            }

            match self.transport.connect().await {
                Ok(mut conn) => {
                    attempt = 0;
                    let _ = self.events_tx.send(ClientEvent::Connected);

                    // Replay the active join so the server re-verifies
                    // membership and resumes fanout.
                    if let Some(conversation_key) = &self.active_conversation {
                        let join = json!({
                            "type": "join",
                            "conversation_key": conversation_key,
                        })
                        .to_string();
                        if conn.send_text(join).await.is_err() {
                            warn!("join replay failed; reconnecting");
                            let _ = self
                                .events_tx
                                .send(ClientEvent::Disconnected { will_retry: true });
                            match self.bump_or_give_up(attempt).await {
                                Ok(next) => attempt = next,
                                Err(terminal) => return terminal,
                            }
                            continue;
                        }
                    }

                    // Pump frames both ways until the channel drops or the
                    // caller closes.
                    let manual_close = self.pump(conn.as_mut()).await;
                    if manual_close {
                        let event = ClientEvent::Disconnected { will_retry: false };
                        let _ = self.events_tx.send(event.clone());
                        return event;
                    }
                    let _ = self
                        .events_tx
                        .send(ClientEvent::Disconnected { will_retry: true });
                    match self.bump_or_give_up(attempt).await {
                        Ok(next) => attempt = next,
                        Err(terminal) => return terminal,
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "connect failed");
                    match self.bump_or_give_up(attempt).await {
                        Ok(next) => attempt = next,
                        Err(terminal) => return terminal,
                    }
                }
            }
        }
    }

    /// Returns true when the exit was a manual close.
    async fn pump(&mut self, conn: &mut dyn super::transport::ChannelConn) -> bool {
        enum PumpEvent {
            CloseSignal { sender_gone: bool },
            Outbound(Option<String>),
            Inbound(Option<String>),
        }

        loop {
            let event = tokio::select! {
                changed = self.close_rx.changed() => PumpEvent::CloseSignal {
                    sender_gone: changed.is_err(),
                },
                frame = self.outbound_rx.recv() => PumpEvent::Outbound(frame),
                incoming = conn.recv_text() => PumpEvent::Inbound(incoming),
            };

            match event {
                PumpEvent::CloseSignal { sender_gone } => {
                    if sender_gone || self.closed() {
                        return true;
                    }
                }
                PumpEvent::Outbound(Some(frame)) => {
                    if conn.send_text(frame).await.is_err() {
                        return false;
                    }
                }
                // Handle dropped without close(): treat as manual.
                PumpEvent::Outbound(None) => return true,
                PumpEvent::Inbound(Some(frame)) => {
                    let _ = self.events_tx.send(ClientEvent::Frame(frame));
                }
                PumpEvent::Inbound(None) => return false,
            }
        }
    }

    /// Sleeps the backoff delay and advances the attempt counter, or emits
    /// the terminal give-up event.
    async fn bump_or_give_up(&self, attempt: u32) -> Result<u32, ClientEvent> {
        if attempt + 1 >= self.policy.max_attempts {
            info!(attempts = attempt + 1, "reconnect budget exhausted");
            let _ = self.events_tx.send(ClientEvent::GaveUp);
            return Err(ClientEvent::GaveUp);
        }
        tokio::time::sleep(self.policy.delay_for(attempt)).await;
        Ok(attempt + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::{ChannelConn, ChannelTransport, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = ReconnectPolicy {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(4),
            max_attempts: 8,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // Capped from here on.
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(30), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_thirty_percent() {
        let policy = ReconnectPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 8,
            jitter: true,
        };
        for _ in 0..100 {
            let delay = policy.delay_for(0).as_millis() as f64;
            assert!((700.0..=1300.0).contains(&delay), "delay {delay} out of range");
        }
    }

    /// Transport that fails a scripted number of times, then produces
    /// connections that either hold open until closed or drop immediately.
    struct FlakyTransport {
        fail_first: u32,
        hold_open: bool,
        connects: AtomicU32,
        joins: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedConn {
        joins: Arc<Mutex<Vec<String>>>,
        hold_open: bool,
    }

    #[async_trait]
    impl ChannelConn for ScriptedConn {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.joins.lock().push(text);
            Ok(())
        }

        async fn recv_text(&mut self) -> Option<String> {
            if self.hold_open {
                std::future::pending::<()>().await;
            }
            None
        }
    }

    #[async_trait]
    impl ChannelTransport for FlakyTransport {
        async fn connect(&self) -> Result<Box<dyn ChannelConn>, TransportError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(TransportError::Connect("refused".into()));
            }
            Ok(Box::new(ScriptedConn {
                joins: self.joins.clone(),
                hold_open: self.hold_open,
            }))
        }
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(40),
            max_attempts,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let transport = FlakyTransport {
            fail_first: u32::MAX,
            hold_open: false,
            connects: AtomicU32::new(0),
            joins: Arc::new(Mutex::new(Vec::new())),
        };
        let (client, _handle, mut events) = ChatClient::new(transport, policy(3), None);

        let terminal = client.run().await;
        assert_eq!(terminal, ClientEvent::GaveUp);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen, vec![ClientEvent::GaveUp]);
    }

    #[tokio::test(start_paused = true)]
    async fn replays_join_on_every_reconnect_and_resets_attempts() {
        let joins = Arc::new(Mutex::new(Vec::new()));
        let transport = FlakyTransport {
            fail_first: 2,
            hold_open: true,
            connects: AtomicU32::new(0),
            joins: joins.clone(),
        };
        let key = "a:b".to_string();
        let (client, handle, mut events) =
            ChatClient::new(transport, policy(4), Some(key.clone()));

        let run = tokio::spawn(client.run());

        // Wait for the connection to come up, then close manually.
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::Connected => break,
                ClientEvent::Disconnected { will_retry } => assert!(will_retry),
                other => panic!("unexpected event {other:?}"),
            }
        }
        handle.close();

        let terminal = run.await.unwrap();
        assert_eq!(terminal, ClientEvent::Disconnected { will_retry: false });

        let joins = joins.lock();
        assert_eq!(joins.len(), 1);
        assert!(joins[0].contains("\"type\":\"join\""));
        assert!(joins[0].contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_close_never_retries() {
        let transport = FlakyTransport {
            fail_first: 0,
            hold_open: true,
            connects: AtomicU32::new(0),
            joins: Arc::new(Mutex::new(Vec::new())),
        };
        let (client, handle, mut events) = ChatClient::new(transport, policy(4), None);
        let run = tokio::spawn(client.run());

        assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);
        handle.close();

        let terminal = run.await.unwrap();
        assert_eq!(terminal, ClientEvent::Disconnected { will_retry: false });
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Disconnected { will_retry: false }
        );
    }
}
