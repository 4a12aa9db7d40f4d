//! Fake authorities shared by the unit tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use shared::{
    domain::{InventoryItem, Mode, SensorId},
    protocol::{ActuatorCommandRequest, AdjustStockRequest, ModeResponse, SensorReadings, SetModeRequest},
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
};

use crate::authority::DeviceAuthority;

pub(crate) fn readings(weight1: f64, temperature: f64) -> SensorReadings {
    [
        (SensorId::from("weight1"), weight1),
        (SensorId::from("weight2"), 0.0),
        (SensorId::from("weight3"), 0.0),
        (SensorId::from("temperature"), temperature),
    ]
    .into_iter()
    .collect()
}

/// In-memory authority that counts every call.
pub(crate) struct FakeAuthority {
    pub mode: Mutex<Option<ModeResponse>>,
    pub sensors: Mutex<SensorReadings>,
    pub inventory: Mutex<Vec<InventoryItem>>,
    pub sensor_delay: Duration,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub sensor_reads: AtomicUsize,
    pub mode_reads: AtomicUsize,
    pub inventory_reads: AtomicUsize,
    pub sensors_in_flight: AtomicUsize,
    pub max_sensors_in_flight: AtomicUsize,
    pub set_mode_requests: Mutex<Vec<SetModeRequest>>,
    pub commands: Mutex<Vec<ActuatorCommandRequest>>,
    pub adjustments: Mutex<Vec<(String, i64)>>,
}

impl FakeAuthority {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode: Mutex::new(Some(ModeResponse::from(mode))),
            sensors: Mutex::new(readings(10.0, 21.0)),
            inventory: Mutex::new(vec![
                InventoryItem {
                    name: "bolts".to_string(),
                    stock: 12,
                },
                InventoryItem {
                    name: "nuts".to_string(),
                    stock: 3,
                },
            ]),
            sensor_delay: Duration::ZERO,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            sensor_reads: AtomicUsize::new(0),
            mode_reads: AtomicUsize::new(0),
            inventory_reads: AtomicUsize::new(0),
            sensors_in_flight: AtomicUsize::new(0),
            max_sensors_in_flight: AtomicUsize::new(0),
            set_mode_requests: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            adjustments: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sensor_delay(mut self, delay: Duration) -> Self {
        self.sensor_delay = delay;
        self
    }

    pub fn failing_reads(self) -> Self {
        self.fail_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    pub async fn write_count(&self) -> usize {
        self.commands.lock().await.len() + self.set_mode_requests.lock().await.len()
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceAuthority for FakeAuthority {
    async fn read_inventory(&self) -> Result<Vec<InventoryItem>> {
        self.inventory_reads.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(self.inventory.lock().await.clone())
    }

    async fn adjust_stock(&self, name: &str, delta: i64) -> Result<()> {
        self.check_write()?;
        self.adjustments.lock().await.push((name.to_string(), delta));
        let mut inventory = self.inventory.lock().await;
        let item = inventory
            .iter_mut()
            .find(|item| item.name == name)
            .ok_or_else(|| anyhow!("404 Not Found"))?;
        item.stock = item.stock.saturating_add_signed(delta);
        Ok(())
    }

    async fn read_sensors(&self) -> Result<SensorReadings> {
        self.sensor_reads.fetch_add(1, Ordering::SeqCst);
        let now = self.sensors_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_sensors_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.sensor_delay.is_zero() {
            tokio::time::sleep(self.sensor_delay).await;
        }
        self.sensors_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.check_read()?;
        Ok(self.sensors.lock().await.clone())
    }

    async fn read_mode(&self) -> Result<ModeResponse> {
        self.mode_reads.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        self.mode
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("500 Internal Server Error"))
    }

    async fn set_mode(&self, request: &SetModeRequest) -> Result<()> {
        self.check_write()?;
        self.set_mode_requests.lock().await.push(request.clone());
        Ok(())
    }

    async fn send_command(&self, request: &ActuatorCommandRequest) -> Result<()> {
        self.check_write()?;
        self.commands.lock().await.push(request.clone());
        Ok(())
    }
}

/// Broadcasting this text makes the fake server close every socket.
pub(crate) const CLOSE_SOCKETS: &str = "__close__";

/// Counters and broadcast feed behind the axum fake authority.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub mode: Arc<Mutex<ModeResponse>>,
    pub commands: Arc<Mutex<Vec<serde_json::Value>>>,
    pub sensor_reads: Arc<AtomicUsize>,
    pub mode_reads: Arc<AtomicUsize>,
    pub patches: Arc<Mutex<Vec<(String, i64)>>>,
    pub updates: broadcast::Sender<String>,
    pub ws_clients: Arc<AtomicUsize>,
}

async fn http_items() -> Json<Vec<InventoryItem>> {
    Json(vec![InventoryItem {
        name: "blue crates".to_string(),
        stock: 4,
    }])
}

async fn http_patch_item(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(body): Json<AdjustStockRequest>,
) -> StatusCode {
    state.patches.lock().await.push((name, body.delta));
    StatusCode::OK
}

async fn http_sensor_data(State(state): State<ServerState>) -> Json<SensorReadings> {
    state.sensor_reads.fetch_add(1, Ordering::SeqCst);
    Json(readings(42.0, 19.5))
}

async fn http_mode(State(state): State<ServerState>) -> Json<ModeResponse> {
    state.mode_reads.fetch_add(1, Ordering::SeqCst);
    Json(state.mode.lock().await.clone())
}

async fn http_set_mode(
    State(state): State<ServerState>,
    Json(body): Json<SetModeRequest>,
) -> StatusCode {
    *state.mode.lock().await = ModeResponse {
        mode: body.mode,
        threshold: body.threshold,
    };
    StatusCode::OK
}

async fn http_send_command(
    State(state): State<ServerState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    state.commands.lock().await.push(body);
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_updates(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: ServerState, mut socket: WebSocket) {
    let mut updates = state.updates.subscribe();
    state.ws_clients.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) if text == CLOSE_SOCKETS => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    state.ws_clients.fetch_sub(1, Ordering::SeqCst);
}

pub(crate) async fn spawn_authority_server(initial_mode: Mode) -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (updates, _) = broadcast::channel(64);
    let state = ServerState {
        mode: Arc::new(Mutex::new(ModeResponse::from(initial_mode))),
        commands: Arc::new(Mutex::new(Vec::new())),
        sensor_reads: Arc::new(AtomicUsize::new(0)),
        mode_reads: Arc::new(AtomicUsize::new(0)),
        patches: Arc::new(Mutex::new(Vec::new())),
        updates,
        ws_clients: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/items", get(http_items))
        .route("/items/:name", patch(http_patch_item))
        .route("/api/sensor-data", get(http_sensor_data))
        .route("/api/mode", get(http_mode).post(http_set_mode))
        .route("/api/send-command", post(http_send_command))
        .route("/ws/updates", get(ws_updates))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

/// Re-evaluates the condition every 20ms for up to two seconds.
macro_rules! eventually {
    ($cond:expr) => {{
        let mut satisfied = false;
        for _ in 0..100 {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        satisfied
    }};
}
pub(crate) use eventually;
