use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use rocket::{State, get};
use rocket_ws as ws;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, timeout};

use super::ClientIp;
use crate::config::Config;
use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, Flow};
use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::models::ServerFrame;

/// WebSocket upgrade. No authentication happens here: the first inbound
/// frame must be an `auth` frame, enforced by the dispatcher.
#[get("/ws")]
pub fn chat_socket(
    ws: ws::WebSocket,
    ip: ClientIp,
    config: &State<Config>,
    hub: &State<Arc<Hub>>,
    dispatcher: &State<Arc<Dispatcher>>,
    metrics: &State<Arc<Metrics>>,
) -> ws::Channel<'static> {
    let config = config.inner().clone();
    let hub = hub.inner().clone();
    let dispatcher = dispatcher.inner().clone();
    let metrics = metrics.inner().clone();

    ws.channel(move |stream| {
        Box::pin(async move {
            run_connection(stream, ip.0, config, hub, dispatcher, metrics).await;
            Ok(())
        })
    })
}

/// Owns the connection lifecycle: spawns the writer task, runs the reader
/// loop inline, and performs the exit contract (unregister, close, metrics)
/// when the reader ends for any reason.
async fn run_connection(
    stream: ws::stream::DuplexStream,
    remote_addr: String,
    config: Config,
    hub: Arc<Hub>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
) {
    let (conn, outbox_rx) = Connection::new(&remote_addr, config.send_queue_cap);
    metrics.websocket_connections.inc();
    metrics.spawned_tasks.inc();
    debug!("conn {} opened from {remote_addr}", conn.id());

    let (sink, source) = stream.split();
    let writer = tokio::spawn(writer_loop(
        sink,
        outbox_rx,
        Duration::from_secs(config.write_deadline_s),
        Duration::from_secs(config.ping_period_s),
        metrics.clone(),
    ));

    read_loop(
        source,
        &conn,
        &dispatcher,
        Duration::from_secs(config.read_deadline_s),
    )
    .await;

    // Reader exit contract: leave the room before the socket disappears so
    // the hub never holds a dead connection.
    let room_id = conn.room_id();
    if room_id != 0 {
        hub.unregister(conn.clone(), room_id).await;
    }
    conn.close();
    let _ = writer.await;

    metrics.websocket_connections.dec();
    metrics
        .connection_duration_seconds
        .observe(conn.connected_for().as_secs_f64());
    metrics.spawned_tasks.dec();
    debug!("conn {} closed", conn.id());
}

/// Decode side. The read deadline slides on every inbound frame, including
/// protocol pongs, so a live-but-quiet peer that answers pings stays
/// connected.
async fn read_loop(
    mut source: SplitStream<ws::stream::DuplexStream>,
    conn: &Arc<Connection>,
    dispatcher: &Dispatcher,
    read_deadline: Duration,
) {
    loop {
        let msg = match timeout(read_deadline, source.next()).await {
            Err(_) => {
                debug!("conn {} idle past read deadline", conn.id());
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                warn!("conn {} socket error: {e}", conn.id());
                return;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            ws::Message::Text(text) => {
                if dispatcher.handle(conn, text.as_str()).await == Flow::Terminate {
                    return;
                }
            }
            ws::Message::Binary(_) => {
                conn.send_frame(&ServerFrame::error("Binary frames are not supported"));
            }
            // tungstenite answers pings on our behalf; both directions of
            // the heartbeat just refresh the deadline
            ws::Message::Ping(_) | ws::Message::Pong(_) => {}
            ws::Message::Close(_) => return,
            ws::Message::Frame(_) => {}
        }

        // Soft eviction closes the write queue from the fan-out path; the
        // reader notices here instead of waiting out the deadline.
        if conn.is_closed() {
            return;
        }
    }
}

/// Encode side. Drains the write queue in FIFO order and emits protocol
/// pings so idle-killing middleboxes keep the socket open. Any write
/// error or missed deadline ends the connection.
async fn writer_loop(
    mut sink: SplitSink<ws::stream::DuplexStream, ws::Message>,
    mut outbox: mpsc::Receiver<String>,
    write_deadline: Duration,
    ping_period: Duration,
    metrics: Arc<Metrics>,
) {
    metrics.spawned_tasks.inc();
    let mut ping = interval(ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await; // the first tick is immediate

    loop {
        tokio::select! {
            frame = outbox.recv() => match frame {
                Some(json) => {
                    match timeout(write_deadline, sink.send(ws::Message::text(json))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!("socket write error: {e}");
                            break;
                        }
                        Err(_) => {
                            warn!("socket write missed {}s deadline", write_deadline.as_secs());
                            break;
                        }
                    }
                }
                // queue closed: flush a Close frame and end
                None => {
                    let _ = timeout(write_deadline, sink.send(ws::Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if timeout(write_deadline, sink.send(ws::Message::Ping(Vec::new().into())))
                    .await
                    .map(|r| r.is_err())
                    .unwrap_or(true)
                {
                    break;
                }
            }
        }
    }
    metrics.spawned_tasks.dec();
}
