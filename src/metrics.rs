use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Write-only observability sink. Every instrument lives in a dedicated
/// registry so tests can assert on scrape output without global state.
pub struct Metrics {
    registry: Registry,

    pub websocket_connections: IntGauge,
    pub active_rooms: IntGauge,
    pub spawned_tasks: IntGauge,

    pub messages_sent_total: IntCounterVec,
    pub messages_received_total: IntCounter,
    pub auth_requests_total: IntCounterVec,
    pub dropped_messages_total: IntCounter,
    pub room_joins_total: IntCounter,
    pub room_leaves_total: IntCounter,

    pub message_latency_ms: Histogram,
    pub broadcast_duration_ms: Histogram,
    pub connection_duration_seconds: Histogram,
    pub users_per_room: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let websocket_connections = IntGauge::new(
            "websocket_connections",
            "Currently open WebSocket connections",
        )
        .unwrap();
        let active_rooms =
            IntGauge::new("active_rooms", "Rooms with at least one local connection").unwrap();
        let spawned_tasks =
            IntGauge::new("spawned_tasks", "Live long-running tasks (loops per connection and hub)")
                .unwrap();

        let messages_sent_total = IntCounterVec::new(
            Opts::new("messages_sent_total", "Messages accepted and published"),
            &["room_type"],
        )
        .unwrap();
        let messages_received_total = IntCounter::new(
            "messages_received_total",
            "Inbound frames received from clients",
        )
        .unwrap();
        let auth_requests_total = IntCounterVec::new(
            Opts::new("auth_requests_total", "Authentication attempts"),
            &["type", "status"],
        )
        .unwrap();
        let dropped_messages_total = IntCounter::new(
            "dropped_messages_total",
            "Frames dropped because a connection's write queue was full",
        )
        .unwrap();
        let room_joins_total =
            IntCounter::new("room_joins_total", "Successful room registrations").unwrap();
        let room_leaves_total =
            IntCounter::new("room_leaves_total", "Room unregistrations").unwrap();

        let message_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "message_latency_ms",
                "Time from send_message receipt to bus publish, in milliseconds",
            )
            .buckets(prometheus::exponential_buckets(0.5, 2.0, 12).unwrap()),
        )
        .unwrap();
        let broadcast_duration_ms = Histogram::with_opts(
            HistogramOpts::new(
                "broadcast_duration_ms",
                "Time to enqueue one event to all local members, in milliseconds",
            )
            .buckets(prometheus::exponential_buckets(0.1, 2.0, 12).unwrap()),
        )
        .unwrap();
        let connection_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "connection_duration_seconds",
                "Lifetime of closed connections",
            )
            .buckets(prometheus::exponential_buckets(1.0, 4.0, 10).unwrap()),
        )
        .unwrap();
        let users_per_room = Histogram::with_opts(
            HistogramOpts::new(
                "users_per_room",
                "Local room size observed at registration",
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 12).unwrap()),
        )
        .unwrap();

        registry.register(Box::new(websocket_connections.clone())).unwrap();
        registry.register(Box::new(active_rooms.clone())).unwrap();
        registry.register(Box::new(spawned_tasks.clone())).unwrap();
        registry.register(Box::new(messages_sent_total.clone())).unwrap();
        registry.register(Box::new(messages_received_total.clone())).unwrap();
        registry.register(Box::new(auth_requests_total.clone())).unwrap();
        registry.register(Box::new(dropped_messages_total.clone())).unwrap();
        registry.register(Box::new(room_joins_total.clone())).unwrap();
        registry.register(Box::new(room_leaves_total.clone())).unwrap();
        registry.register(Box::new(message_latency_ms.clone())).unwrap();
        registry.register(Box::new(broadcast_duration_ms.clone())).unwrap();
        registry.register(Box::new(connection_duration_seconds.clone())).unwrap();
        registry.register(Box::new(users_per_room.clone())).unwrap();

        Metrics {
            registry,
            websocket_connections,
            active_rooms,
            spawned_tasks,
            messages_sent_total,
            messages_received_total,
            auth_requests_total,
            dropped_messages_total,
            room_joins_total,
            room_leaves_total,
            message_latency_ms,
            broadcast_duration_ms,
            connection_duration_seconds,
            users_per_room,
        }
    }

    /// Prometheus text exposition of every registered instrument.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
