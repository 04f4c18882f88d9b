use std::{
    fs,
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::Router;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
};
use tracing::{debug, info, warn};

use irbridge_common::{
    pages::networks_page, protocol, BridgeConfig, CapturedSignal, ConnectOutcome, ConnectPolicy,
    CredentialRecord, DigitalInput, IrReceiver, IrTransmit, LearnOutcome, LearningSession,
    LinkError, NonVolatileStore, OperationalSession, Radio, ReplayEngine, RestartRequest,
    ScannedNetwork, Session, StorageFault, ThreadSleeper, TransmitError,
};

use crate::routes::{operational_router, provisioning_router};

const HOST_HTTP_PORT: u16 = 8080;

enum SessionEnd {
    Restart(RestartRequest),
    Shutdown,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data = DataDir::from_env();
    let mut config = data.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load bridge config: {err:#}");
        host_default_config()
    });
    if let Some(port) = std::env::var("IRBRIDGE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.http_port = port;
    }
    config.sanitize();

    // A single capture feed outlives reboots, like the sensor on the board.
    let mut feed = CaptureFeed::default();

    loop {
        match boot(&data, &config, &mut feed).await? {
            SessionEnd::Restart(request) => {
                info!("restarting to join `{}`", request.ssid);
            }
            SessionEnd::Shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn boot(
    data: &DataDir,
    config: &BridgeConfig,
    feed: &mut CaptureFeed,
) -> anyhow::Result<SessionEnd> {
    let store = FileStore::open(data.eeprom_path(), config.store_capacity)?;
    let mut mode_switch = EnvModeSwitch;
    let session = Session::boot(
        &mut mode_switch,
        store,
        ConnectPolicy::from_config(config),
        host_replay_engine,
    );
    info!("boot mode: {}", session.mode().as_str());

    match session {
        Session::Learning(learning) => {
            let receiver = feed.receiver_or_start(spawn_stdin_captures);
            run_learning(learning, config, receiver).await
        }
        Session::Operational(operational) => run_operational(operational, config).await,
    }
}

async fn run_learning(
    mut session: LearningSession<FileStore>,
    config: &BridgeConfig,
    receiver: &mut ChannelReceiver,
) -> anyhow::Result<SessionEnd> {
    info!("learning mode: enter captures on stdin as `<hex value> <protocol>`");
    let mut ticker = tokio::time::interval(Duration::from_millis(config.learn_poll_interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => return Ok(SessionEnd::Shutdown),
        }

        match session.poll(receiver) {
            Ok(LearnOutcome::Idle) => {}
            Ok(LearnOutcome::Learned(record)) => info!(
                "learned {} frame {} ({} stored so far)",
                protocol::name(record.decode().protocol),
                record.signal_code,
                session.engine().learned_count()
            ),
            Ok(LearnOutcome::Unchanged(record)) => {
                debug!("repeat of stored frame {}", record.signal_code)
            }
            Ok(LearnOutcome::Discarded(capture)) => warn!(
                "discarded undecodable capture {:x}/{:x}",
                capture.value, capture.protocol
            ),
            Err(err) => warn!("failed to store capture: {err}"),
        }
    }
}

async fn run_operational(
    session: OperationalSession<FileStore>,
    config: &BridgeConfig,
) -> anyhow::Result<SessionEnd> {
    let radio = HostRadio::from_env();

    // The bounded wait sleeps; keep it off the reactor.
    let (mut session, mut radio, outcome) = tokio::task::spawn_blocking(move || {
        let mut session = session;
        let mut radio = radio;
        let outcome = session.connect(&mut radio, &mut ThreadSleeper);
        (session, radio, outcome)
    })
    .await
    .context("connection attempt panicked")?;

    match outcome? {
        ConnectOutcome::Connected { ssid, polls } => {
            info!("joined `{ssid}` after {polls} poll(s)");
            let shared = Arc::new(Mutex::new(session));
            serve_operational(operational_router(shared), config.http_port).await
        }
        ConnectOutcome::Fallback { ssid, polls, cause } => {
            match cause {
                Some(err) => warn!("could not start joining `{ssid}`: {err}"),
                None => warn!("`{ssid}` not reachable after {polls} poll(s)"),
            }

            let (session, ready) = tokio::task::spawn_blocking(move || {
                let ready = session.start_fallback(&mut radio, &mut ThreadSleeper);
                (session, ready)
            })
            .await
            .context("fallback start panicked")?;
            let ready = ready?;
            if let Some(err) = &ready.scan_error {
                warn!("network scan failed: {err}");
            }
            info!(
                "access point `{}` open with {} network(s) listed",
                config.access_point_ssid,
                ready.listing.networks.len()
            );

            let page = networks_page(&page_address(config.http_port), &ready.listing);
            serve_provisioning(session, page, config.http_port).await
        }
    }
}

/// Address the networks page greets with. The listener binds every
/// interface, which is not a reachable address.
fn page_address(port: u16) -> String {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port)).to_string()
}

async fn serve_operational(app: Router, port: u16) -> anyhow::Result<SessionEnd> {
    let listener = bind(port).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(SessionEnd::Shutdown)
}

async fn serve_provisioning(
    session: OperationalSession<FileStore>,
    page: String,
    port: u16,
) -> anyhow::Result<SessionEnd> {
    let (restart_tx, mut restart_rx) = mpsc::channel(1);
    let (end_tx, end_rx) = oneshot::channel();
    let app = provisioning_router(Arc::new(Mutex::new(session)), page, restart_tx);

    let listener = bind(port).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let end = tokio::select! {
                Some(request) = restart_rx.recv() => SessionEnd::Restart(request),
                _ = tokio::signal::ctrl_c() => SessionEnd::Shutdown,
            };
            let _ = end_tx.send(end);
        })
        .await?;

    Ok(end_rx.await.unwrap_or(SessionEnd::Shutdown))
}

async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bridge server at {addr}"))?;
    info!("bridge listening on http://{addr}");
    Ok(listener)
}

fn host_default_config() -> BridgeConfig {
    BridgeConfig {
        http_port: HOST_HTTP_PORT,
        ..BridgeConfig::default()
    }
}

fn host_replay_engine() -> ReplayEngine {
    ReplayEngine::new()
        .bind(protocol::NEC, LoggedTransmitter::new(protocol::NEC))
        .bind(protocol::SAMSUNG, LoggedTransmitter::new(protocol::SAMSUNG))
}

struct DataDir {
    root: PathBuf,
}

impl DataDir {
    fn from_env() -> Self {
        let root = std::env::var("IRBRIDGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.irbridge"));
        Self { root }
    }

    fn eeprom_path(&self) -> PathBuf {
        self.root.join("eeprom.bin")
    }

    async fn load_config(&self) -> anyhow::Result<BridgeConfig> {
        match tokio::fs::read(self.root.join("bridge.json")).await {
            Ok(raw) => Ok(BridgeConfig::from_json(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(host_default_config()),
            Err(err) => Err(err.into()),
        }
    }
}

/// EEPROM emulation over a single image file. Commits replace the file
/// atomically so a crash never leaves a half-written image behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    image: Vec<u8>,
    durable: Vec<u8>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> anyhow::Result<Self> {
        let path = path.into();
        irbridge_common::store::check_capacity(capacity)?;

        let mut image = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        if image.len() < capacity {
            image.resize(capacity, irbridge_common::layout::ERASED_BYTE);
        }

        Ok(Self {
            path,
            durable: image.clone(),
            image,
        })
    }

    fn write_image(path: &Path, image: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("bin.tmp");
        fs::write(&staging, image)?;
        fs::rename(&staging, path)
    }
}

impl NonVolatileStore for FileStore {
    fn image(&self) -> &[u8] {
        &self.image
    }

    fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    fn commit(&mut self) -> Result<(), StorageFault> {
        Self::write_image(&self.path, &self.image)
            .map_err(|err| StorageFault::new(format!("{}: {err}", self.path.display())))?;
        self.durable.clone_from(&self.image);
        Ok(())
    }

    fn discard(&mut self) {
        self.image.clone_from(&self.durable);
    }
}

/// `IRBRIDGE_LEARN_MODE` stands in for the mode switch pin.
struct EnvModeSwitch;

impl DigitalInput for EnvModeSwitch {
    fn is_high(&mut self) -> bool {
        std::env::var("IRBRIDGE_LEARN_MODE")
            .map(|value| is_truthy(&value))
            .unwrap_or(false)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "high" | "yes"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimulatedNetwork {
    ssid: String,
    password: String,
    rssi: i32,
}

/// Pretends to be the station radio. Reachable networks come from
/// `IRBRIDGE_HOST_NETWORKS` as `ssid:password[:rssi]` entries split by `;`.
#[derive(Debug, Default)]
struct HostRadio {
    networks: Vec<SimulatedNetwork>,
    joining: Option<CredentialRecord>,
    access_point: Option<String>,
}

impl HostRadio {
    fn from_env() -> Self {
        let networks = std::env::var("IRBRIDGE_HOST_NETWORKS")
            .map(|raw| parse_networks(&raw))
            .unwrap_or_default();
        Self {
            networks,
            ..Self::default()
        }
    }
}

fn parse_networks(raw: &str) -> Vec<SimulatedNetwork> {
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let ssid = parts.next()?.trim();
            if ssid.is_empty() {
                return None;
            }
            let password = parts.next().unwrap_or_default().to_string();
            let rssi = parts
                .next()
                .and_then(|value| value.trim().parse::<i32>().ok())
                .unwrap_or(-60);
            Some(SimulatedNetwork {
                ssid: ssid.to_string(),
                password,
                rssi,
            })
        })
        .collect()
}

impl Radio for HostRadio {
    fn begin(&mut self, credentials: &CredentialRecord) -> Result<(), LinkError> {
        if self.access_point.is_some() {
            return Err(LinkError::new("begin", "radio is in access point mode"));
        }
        debug!("joining `{}`", credentials.ssid);
        self.joining = Some(credentials.clone());
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let Some(credentials) = &self.joining else {
            return false;
        };
        self.networks.iter().any(|network| {
            network.ssid == credentials.ssid
                && (network.password.is_empty() || network.password == credentials.password)
        })
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.joining = None;
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        Ok(self
            .networks
            .iter()
            .map(|network| ScannedNetwork {
                ssid: network.ssid.clone(),
                rssi: network.rssi,
                secured: !network.password.is_empty(),
            })
            .collect())
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError> {
        info!("open access point `{ssid}` up");
        self.access_point = Some(ssid.to_string());
        Ok(())
    }
}

/// Stands in for an IR LED: logs each frame instead of pulsing it.
struct LoggedTransmitter {
    protocol: u32,
    sent: u64,
}

impl LoggedTransmitter {
    fn new(protocol: u32) -> Self {
        Self { protocol, sent: 0 }
    }
}

impl IrTransmit for LoggedTransmitter {
    fn transmit(&mut self, value: u64) -> Result<(), TransmitError> {
        self.sent += 1;
        info!(
            "ir tx {} 0x{value:x} (#{})",
            protocol::name(self.protocol),
            self.sent
        );
        Ok(())
    }
}

struct ChannelReceiver {
    captures: mpsc::UnboundedReceiver<CapturedSignal>,
}

impl IrReceiver for ChannelReceiver {
    fn poll_capture(&mut self) -> Option<CapturedSignal> {
        self.captures.try_recv().ok()
    }
}

/// Capture feed shared by every learning boot. Nothing reads stdin until
/// the first one starts it.
#[derive(Default)]
struct CaptureFeed {
    receiver: Option<ChannelReceiver>,
}

impl CaptureFeed {
    fn receiver_or_start(
        &mut self,
        start: impl FnOnce() -> mpsc::UnboundedReceiver<CapturedSignal>,
    ) -> &mut ChannelReceiver {
        self.receiver.get_or_insert_with(|| ChannelReceiver {
            captures: start(),
        })
    }
}

fn spawn_stdin_captures() -> mpsc::UnboundedReceiver<CapturedSignal> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_capture_line(&line) {
                    Some(capture) => {
                        if tx.send(capture).is_err() {
                            return;
                        }
                    }
                    None => warn!("ignoring capture line `{line}`"),
                },
                Ok(None) => return,
                Err(err) => {
                    warn!("stdin capture feed failed: {err}");
                    return;
                }
            }
        }
    });
    rx
}

/// `<hex value> <protocol>`; the protocol is a numeric id or a name such
/// as `NEC`.
fn parse_capture_line(line: &str) -> Option<CapturedSignal> {
    let mut parts = line.split_whitespace();
    let value = parts.next()?;
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let value = u64::from_str_radix(value, 16).ok()?;

    let protocol = parts.next()?;
    let protocol = protocol.parse::<u32>().ok().or_else(|| {
        (protocol::UNUSED..=protocol::DENON)
            .find(|id| protocol::name(*id).eq_ignore_ascii_case(protocol))
    })?;

    if parts.next().is_some() {
        return None;
    }
    Some(CapturedSignal { value, protocol })
}
