use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::{AnyInputPin, AnyOutputPin, PinDriver},
        prelude::Peripherals,
        rmt::RMT,
    },
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use irbridge_common::{
    layout::ERASED_BYTE,
    pages::{
        connect_error_json, connect_success_json, networks_page, ProvisioningForm,
        CONNECT_REJECTED_MESSAGE, CONNECT_STORAGE_MESSAGE, NOT_FOUND_BODY, ROOT_PAGE,
    },
    protocol,
    store::check_capacity,
    BridgeConfig, ConnectOutcome, ConnectPolicy, CredentialRecord, IrHardwareConfig,
    LearnOutcome, LearningSession, LinkError, NonVolatileStore, OperationalSession,
    ProvisionError, Radio, ReplayEngine, ReplayOutcome, ScannedNetwork, Session, StorageFault,
    Submission, ThreadSleeper,
};

use crate::ir::{RmtReceiver, SharedTx};

const NVS_NAMESPACE: &str = "irbridge";
const NVS_IMAGE_KEY: &str = "eeprom";
const MAX_HTTP_BODY: usize = 1024;
const RESTART_DELAY_MS: u64 = 500;

type SharedSession = Arc<Mutex<OperationalSession<NvsImageStore>>>;
type HttpRequest<'r, 'c> = Request<&'r mut EspHttpConnection<'c>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = BridgeConfig::default();
    config.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let store = NvsImageStore::open(nvs_partition.clone(), config.store_capacity)?;

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;

    let mut mode_switch = unsafe { PinDriver::input(AnyInputPin::new(config.pins.mode_switch)) }
        .context("failed to configure mode switch pin")?;
    let mut rmt = Some(rmt);
    let session = Session::boot(
        &mut || mode_switch.is_high(),
        store,
        ConnectPolicy::from_config(&config),
        || device_replay_engine(rmt.take(), &config),
    );
    info!("boot mode: {}", session.mode().as_str());
    // The mode is fixed until the next restart.
    drop(mode_switch);

    match session {
        Session::Learning(learning) => {
            let rmt = rmt.ok_or_else(|| anyhow!("RMT peripheral already claimed"))?;
            let receiver = init_ir_receiver(rmt, &config)?;
            run_learning(learning, receiver, &config)
        }
        Session::Operational(operational) => {
            let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
            let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
            run_operational(operational, EspRadio { wifi }, &config)
        }
    }
}

fn run_learning(
    mut session: LearningSession<NvsImageStore>,
    mut receiver: RmtReceiver,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    info!("learning mode: point a remote at the receiver");
    let interval = Duration::from_millis(config.learn_poll_interval_ms);

    loop {
        match session.poll(&mut receiver) {
            Ok(LearnOutcome::Idle) => {}
            Ok(LearnOutcome::Learned(record)) => info!(
                "learned {} frame {}",
                protocol::name(record.decode().protocol),
                record.signal_code
            ),
            Ok(LearnOutcome::Unchanged(_)) => {}
            Ok(LearnOutcome::Discarded(capture)) => {
                warn!("discarded undecodable capture (protocol {:x})", capture.protocol)
            }
            Err(err) => warn!("failed to store capture: {err}"),
        }
        thread::sleep(interval);
    }
}

fn run_operational(
    mut session: OperationalSession<NvsImageStore>,
    mut radio: EspRadio,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    match session.connect(&mut radio, &mut ThreadSleeper)? {
        ConnectOutcome::Connected { ssid, polls } => {
            info!("wifi joined `{ssid}` after {polls} poll(s)");
            let server = create_operational_http_server(Arc::new(Mutex::new(session)))?;

            // Keep services alive for the program lifetime.
            let _radio = radio;
            let _server = server;
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
        ConnectOutcome::Fallback { ssid, polls, cause } => {
            match cause {
                Some(err) => warn!("could not start joining `{ssid}`: {err}"),
                None => warn!("`{ssid}` not reachable after {polls} poll(s)"),
            }

            let ready = session.start_fallback(&mut radio, &mut ThreadSleeper)?;
            if let Some(err) = &ready.scan_error {
                warn!("network scan failed: {err}");
            }
            let ap_ip = radio.access_point_ip();
            info!(
                "access point `{}` open at {ap_ip} with {} network(s) listed",
                config.access_point_ssid,
                ready.listing.networks.len()
            );

            let page = networks_page(&ap_ip, &ready.listing);
            let server = create_provisioning_http_server(Arc::new(Mutex::new(session)), page)?;

            let _radio = radio;
            let _server = server;
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
    }
}

fn new_http_server() -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };
    Ok(EspHttpServer::new(&conf)?)
}

fn create_operational_http_server(
    session: SharedSession,
) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = new_http_server()?;

    server.fn_handler::<anyhow::Error, _>("/root", Method::Get, |req| {
        req.into_ok_response()?.write_all(ROOT_PAGE.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/toggle", Method::Post, move |req| {
        let outcome = session
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?
            .replay();
        match outcome {
            ReplayOutcome::Sent(command) => info!(
                "replayed {} frame 0x{:x}",
                protocol::name(command.protocol),
                command.value
            ),
            ReplayOutcome::Unbound(command) => {
                info!("no transmitter bound for protocol {}", command.protocol)
            }
            ReplayOutcome::TransmitFailed(_, err) => warn!("transmit failed: {err}"),
            ReplayOutcome::StoreUnreadable(err) => warn!("learned command unreadable: {err}"),
        }
        req.into_response(303, Some("See Other"), &[("Location", "/root")])?;
        Ok(())
    })?;

    register_not_found(&mut server)?;
    Ok(server)
}

fn create_provisioning_http_server(
    session: SharedSession,
    page: String,
) -> anyhow::Result<EspHttpServer<'static>> {
    let mut server = new_http_server()?;

    server.fn_handler::<anyhow::Error, _>("/networks", Method::Get, move |req| {
        req.into_ok_response()?.write_all(page.as_bytes())?;
        Ok(())
    })?;

    server.fn_handler::<anyhow::Error, _>("/connect", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let query = req.uri().split_once('?').map(|(_, query)| query.to_string());
        let form = ProvisioningForm::parse(query.as_deref(), &body);

        let submission = session
            .lock()
            .map_err(|_| anyhow!("session lock poisoned"))?
            .submit_credentials(&form.ssid, &form.password);

        match submission {
            Ok(Submission::Persisted(request)) => {
                info!("credentials for `{}` saved; restarting", request.ssid);
                write_connect(req, 200, &connect_success_json())?;
                schedule_restart();
                Ok(())
            }
            Ok(Submission::Rejected(reason)) => {
                warn!("rejected credential submission: {reason}");
                write_connect(req, 404, &connect_error_json(CONNECT_REJECTED_MESSAGE))
            }
            Err(ProvisionError::InvalidTransition { state, .. }) => {
                warn!("credential submission ignored while {state}");
                write_connect(req, 404, &connect_error_json(CONNECT_REJECTED_MESSAGE))
            }
            Err(err) => {
                error!("failed to persist credentials: {err}");
                write_connect(req, 500, &connect_error_json(CONNECT_STORAGE_MESSAGE))
            }
        }
    })?;

    register_not_found(&mut server)?;
    Ok(server)
}

/// Catch-all routes; registered last so the real endpoints match first.
fn register_not_found(server: &mut EspHttpServer<'static>) -> anyhow::Result<()> {
    for method in [Method::Get, Method::Post] {
        server.fn_handler::<anyhow::Error, _>("/*", method, |req| {
            req.into_response(404, Some("Not Found"), &[("Content-Type", "text/plain")])?
                .write_all(NOT_FOUND_BODY.as_bytes())?;
            Ok(())
        })?;
    }
    Ok(())
}

fn schedule_restart() {
    let spawned = thread::Builder::new()
        .name("prov-restart".into())
        .spawn(|| {
            thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
            unsafe { esp_idf_svc::sys::esp_restart() };
        });
    if let Err(err) = spawned {
        warn!("failed to spawn restart thread ({err}); restarting now");
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_connect(req: HttpRequest<'_, '_>, status: u16, body: &str) -> anyhow::Result<()> {
    req.into_response(
        status,
        None,
        &[
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
        ],
    )?
    .write_all(body.as_bytes())?;
    Ok(())
}

fn device_replay_engine(rmt: Option<RMT>, config: &BridgeConfig) -> ReplayEngine {
    let tx = match rmt.map(|rmt| init_ir_transmitter(rmt, config)) {
        Some(Ok(tx)) => {
            info!(
                "IR transmitter on RMT channel{} / GPIO{} @ {}kHz",
                config.ir.tx_channel, config.pins.ir_transmit, config.ir.carrier_khz
            );
            tx
        }
        Some(Err(err)) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            SharedTx::disabled()
        }
        None => SharedTx::disabled(),
    };

    let mut engine = ReplayEngine::new();
    for id in [protocol::NEC, protocol::SAMSUNG] {
        if let Some(transmitter) = tx.for_protocol(id) {
            engine = engine.bind(id, transmitter);
        }
    }
    engine
}

fn init_ir_transmitter(rmt: RMT, config: &BridgeConfig) -> anyhow::Result<SharedTx> {
    let IrHardwareConfig {
        tx_channel,
        carrier_khz,
        ..
    } = config.ir;
    let pin = config.pins.ir_transmit;
    if pin < 0 {
        return Err(anyhow!("invalid tx pin: {pin}"));
    }

    match tx_channel {
        0 => unsafe { SharedTx::new(rmt.channel0, AnyOutputPin::new(pin), carrier_khz) },
        1 => unsafe { SharedTx::new(rmt.channel1, AnyOutputPin::new(pin), carrier_khz) },
        2 => unsafe { SharedTx::new(rmt.channel2, AnyOutputPin::new(pin), carrier_khz) },
        3 => unsafe { SharedTx::new(rmt.channel3, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { SharedTx::new(rmt.channel4, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { SharedTx::new(rmt.channel5, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { SharedTx::new(rmt.channel6, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { SharedTx::new(rmt.channel7, AnyOutputPin::new(pin), carrier_khz) },
        _ => Err(anyhow!("unsupported RMT channel: {tx_channel}")),
    }
}

fn init_ir_receiver(rmt: RMT, config: &BridgeConfig) -> anyhow::Result<RmtReceiver> {
    let channel = config.ir.rx_channel;
    let pin = config.pins.ir_receive;
    if pin < 0 {
        return Err(anyhow!("invalid rx pin: {pin}"));
    }

    let receiver = match channel {
        0 => unsafe { RmtReceiver::new(rmt.channel0, AnyInputPin::new(pin)) },
        1 => unsafe { RmtReceiver::new(rmt.channel1, AnyInputPin::new(pin)) },
        2 => unsafe { RmtReceiver::new(rmt.channel2, AnyInputPin::new(pin)) },
        3 => unsafe { RmtReceiver::new(rmt.channel3, AnyInputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { RmtReceiver::new(rmt.channel4, AnyInputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { RmtReceiver::new(rmt.channel5, AnyInputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { RmtReceiver::new(rmt.channel6, AnyInputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { RmtReceiver::new(rmt.channel7, AnyInputPin::new(pin)) },
        _ => Err(anyhow!("unsupported RMT channel: {channel}")),
    }?;
    info!("IR receiver on RMT channel{channel} / GPIO{pin}");
    Ok(receiver)
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

impl EspRadio {
    fn access_point_ip(&self) -> String {
        self.wifi
            .wifi()
            .ap_netif()
            .get_ip_info()
            .map(|info| info.ip.to_string())
            .unwrap_or_else(|_| "192.168.4.1".to_string())
    }
}

fn link_error(operation: &'static str) -> impl Fn(esp_idf_svc::sys::EspError) -> LinkError {
    move |err| LinkError::new(operation, err.to_string())
}

impl Radio for EspRadio {
    fn begin(&mut self, credentials: &CredentialRecord) -> Result<(), LinkError> {
        let auth_method = if credentials.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::new("begin", "ssid too long"))?,
                password: credentials
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::new("begin", "password too long"))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(link_error("configure station"))?;

        if !self.wifi.is_started().map_err(link_error("begin"))? {
            self.wifi.start().map_err(link_error("start station"))?;
        }
        info!("wifi started, connecting to `{}`", credentials.ssid);
        // Non-blocking; the provisioner polls for the association.
        self.wifi
            .wifi_mut()
            .connect()
            .map_err(link_error("connect"))
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
            && self.wifi.wifi().sta_netif().is_up().unwrap_or(false)
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if !self.wifi.is_started().unwrap_or(false) {
            return Ok(());
        }
        self.wifi
            .wifi_mut()
            .disconnect()
            .map_err(link_error("disconnect"))
    }

    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        if !self.wifi.is_started().map_err(link_error("scan"))? {
            self.wifi.start().map_err(link_error("start station"))?;
        }
        let found = self.wifi.scan().map_err(link_error("scan"))?;
        Ok(found
            .into_iter()
            .map(|ap| ScannedNetwork {
                ssid: ap.ssid.to_string(),
                rssi: i32::from(ap.signal_strength),
                secured: !matches!(ap.auth_method, None | Some(AuthMethod::None)),
            })
            .collect())
    }

    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError> {
        let _ = self.wifi.stop();
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| LinkError::new("start access point", "ssid too long"))?,
                auth_method: AuthMethod::None,
                channel: 1,
                ..Default::default()
            }))
            .map_err(link_error("configure access point"))?;
        self.wifi.start().map_err(link_error("start access point"))?;
        self.wifi
            .wait_netif_up()
            .map_err(link_error("access point netif"))?;
        info!("open access point `{ssid}` started");
        Ok(())
    }
}

/// Store image kept as one NVS blob; commits rewrite the blob.
struct NvsImageStore {
    nvs: EspNvs<NvsDefault>,
    image: Vec<u8>,
    durable: Vec<u8>,
}

impl NvsImageStore {
    fn open(partition: EspDefaultNvsPartition, capacity: usize) -> anyhow::Result<Self> {
        check_capacity(capacity)?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .context("failed to open NVS namespace")?;

        let mut buffer = vec![ERASED_BYTE; capacity];
        let stored_len = match nvs.get_raw(NVS_IMAGE_KEY, &mut buffer) {
            Ok(Some(stored)) => stored.len(),
            Ok(None) => 0,
            Err(err) => {
                warn!("failed to read store image from NVS, starting erased: {err}");
                0
            }
        };
        if stored_len < capacity {
            buffer[stored_len..].fill(ERASED_BYTE);
        }

        Ok(Self {
            nvs,
            durable: buffer.clone(),
            image: buffer,
        })
    }
}

impl NonVolatileStore for NvsImageStore {
    fn image(&self) -> &[u8] {
        &self.image
    }

    fn image_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    fn commit(&mut self) -> Result<(), StorageFault> {
        self.nvs
            .set_raw(NVS_IMAGE_KEY, &self.image)
            .map_err(|err| StorageFault::new(format!("nvs write: {err}")))?;
        self.durable.clone_from(&self.image);
        Ok(())
    }

    fn discard(&mut self) {
        self.image.clone_from(&self.durable);
    }
}
