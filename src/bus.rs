use log::warn;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus publish failed: {0}")]
    Publish(String),
}

/// Bus channel for a room's events.
pub fn room_channel(room_id: i64) -> String {
    format!("room:{room_id}")
}

/// Channel patterns support a single trailing `*` wildcard (`room:*`).
#[derive(Debug, Clone)]
pub struct ChannelPattern {
    prefix: String,
    wildcard: bool,
}

impl ChannelPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => ChannelPattern {
                prefix: prefix.to_string(),
                wildcard: true,
            },
            None => ChannelPattern {
                prefix: pattern.to_string(),
                wildcard: false,
            },
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        if self.wildcard {
            channel.starts_with(&self.prefix)
        } else {
            channel == self.prefix
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Cluster-wide pub/sub of room events. Best effort: no persistence, no
/// replay, FIFO per channel. Consumers must tolerate missed events around
/// subscriber churn.
pub trait Bus: Send + Sync {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError>;
    fn subscribe_pattern(&self, pattern: &str) -> BusStream;
}

/// A pattern-filtered subscription. Lagged receivers skip ahead (best
/// effort) rather than erroring out.
pub struct BusStream {
    rx: broadcast::Receiver<BusMessage>,
    pattern: ChannelPattern,
}

impl BusStream {
    pub fn new(rx: broadcast::Receiver<BusMessage>, pattern: &str) -> Self {
        BusStream {
            rx,
            pattern: ChannelPattern::parse(pattern),
        }
    }

    /// Next matching message, or `None` once the bus shuts down.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.pattern.matches(&msg.channel) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("bus subscriber lagged, missed {n} events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Single-process broker over a tokio broadcast channel. All instances in
/// one process (tests, single-node deployments) share one of these; a
/// multi-node deployment plugs an external backend in behind `Bus`.
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        InMemoryBus { sender }
    }
}

impl Bus for InMemoryBus {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        // No subscribers is not an error
        let _ = self.sender.send(BusMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe_pattern(&self, pattern: &str) -> BusStream {
        BusStream::new(self.sender.subscribe(), pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matching() {
        let p = ChannelPattern::parse("room:*");
        assert!(p.matches("room:1"));
        assert!(p.matches("room:12345"));
        assert!(!p.matches("presence:1"));

        let exact = ChannelPattern::parse("room:7");
        assert!(exact.matches("room:7"));
        assert!(!exact.matches("room:77"));
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = InMemoryBus::new();
        assert!(bus.publish("room:1", b"hello".to_vec()).is_ok());
    }

    #[tokio::test]
    async fn per_channel_fifo_order() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe_pattern("room:*");

        for i in 0..10u8 {
            bus.publish("room:9", vec![i]).unwrap();
        }

        for i in 0..10u8 {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.channel, "room:9");
            assert_eq!(msg.payload, vec![i]);
        }
    }

    #[tokio::test]
    async fn wildcard_subscription_filters_channels() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe_pattern("room:*");

        bus.publish("internal:audit", b"skip".to_vec()).unwrap();
        bus.publish("room:3", b"keep".to_vec()).unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.channel, "room:3");
        assert_eq!(msg.payload, b"keep".to_vec());
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe_pattern("room:*");
        let mut b = bus.subscribe_pattern("room:*");

        bus.publish("room:1", b"x".to_vec()).unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"x".to_vec());
        assert_eq!(b.recv().await.unwrap().payload, b"x".to_vec());
    }
}
