use std::time::Duration;

use crate::{
    config::BridgeConfig,
    error::{CredentialError, LinkError, ProvisionError},
    pages::escape_html,
    record::CredentialRecord,
    store::NonVolatileStore,
};

/// Station/AP radio as seen by the provisioner.
pub trait Radio {
    /// Starts associating with the given network; does not wait.
    fn begin(&mut self, credentials: &CredentialRecord) -> Result<(), LinkError>;

    fn is_connected(&mut self) -> bool;

    fn disconnect(&mut self) -> Result<(), LinkError>;

    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError>;

    /// Starts an open access point named `ssid`.
    fn start_access_point(&mut self, ssid: &str) -> Result<(), LinkError>;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNetwork {
    pub ssid: String,
    pub rssi: i32,
    pub secured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPolicy {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub settle: Duration,
    pub access_point_ssid: String,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

impl ConnectPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            poll_attempts: config.connect_poll_attempts,
            poll_interval: Duration::from_millis(config.connect_poll_interval_ms),
            settle: Duration::from_millis(config.scan_settle_ms),
            access_point_ssid: config.access_point_ssid.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    Connecting,
    Connected,
    ScanningNetworks,
    BroadcastingAp,
    AwaitingCredentials,
    PersistedRestartPending,
}

impl ProvisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::ScanningNetworks => "SCANNING_NETWORKS",
            Self::BroadcastingAp => "BROADCASTING_AP",
            Self::AwaitingCredentials => "AWAITING_CREDENTIALS",
            Self::PersistedRestartPending => "PERSISTED_RESTART_PENDING",
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(
            self,
            Self::ScanningNetworks
                | Self::BroadcastingAp
                | Self::AwaitingCredentials
                | Self::PersistedRestartPending
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected {
        ssid: String,
        polls: u32,
    },
    Fallback {
        ssid: String,
        polls: u32,
        cause: Option<LinkError>,
    },
}

/// Scanned networks, rendered for the provisioning page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkListing {
    pub networks: Vec<ScannedNetwork>,
}

impl NetworkListing {
    /// `<ol>` of `ssid (rssi)` items; secured networks are starred.
    pub fn to_html(&self) -> String {
        let mut html = String::from("<ol>");
        for network in &self.networks {
            html.push_str("<li>");
            html.push_str(&escape_html(&network.ssid));
            html.push_str(&format!(" ({})", network.rssi));
            html.push(if network.secured { '*' } else { ' ' });
            html.push_str("</li>");
        }
        html.push_str("</ol>");
        html
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointReady {
    pub listing: NetworkListing,
    pub scan_error: Option<LinkError>,
}

/// Asks the caller to reboot into the freshly stored credentials.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    pub ssid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Rejected(CredentialError),
    Persisted(RestartRequest),
}

#[derive(Debug, Clone)]
pub struct NetworkProvisioner {
    policy: ConnectPolicy,
    state: ProvisionState,
}

impl NetworkProvisioner {
    pub fn new(policy: ConnectPolicy) -> Self {
        Self {
            policy,
            state: ProvisionState::Idle,
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Tries the stored credentials, polling at most `poll_attempts` times.
    /// Runs to completion; there is no cancellation.
    pub fn connect(
        &mut self,
        store: &impl NonVolatileStore,
        radio: &mut impl Radio,
        sleeper: &mut impl Sleeper,
    ) -> Result<ConnectOutcome, ProvisionError> {
        self.expect_state(ProvisionState::Idle, "connect")?;
        let credentials = CredentialRecord::load(store)?;
        self.state = ProvisionState::Connecting;

        let _ = radio.disconnect();
        if let Err(err) = radio.begin(&credentials) {
            self.state = ProvisionState::ScanningNetworks;
            return Ok(ConnectOutcome::Fallback {
                ssid: credentials.ssid,
                polls: 0,
                cause: Some(err),
            });
        }

        for poll in 1..=self.policy.poll_attempts {
            if radio.is_connected() {
                self.state = ProvisionState::Connected;
                return Ok(ConnectOutcome::Connected {
                    ssid: credentials.ssid,
                    polls: poll,
                });
            }
            sleeper.sleep(self.policy.poll_interval);
        }

        self.state = ProvisionState::ScanningNetworks;
        Ok(ConnectOutcome::Fallback {
            ssid: credentials.ssid,
            polls: self.policy.poll_attempts,
            cause: None,
        })
    }

    /// Scans, then brings up the open access point. A failed scan leaves
    /// the listing empty; a failed AP start is returned.
    pub fn start_fallback(
        &mut self,
        radio: &mut impl Radio,
        sleeper: &mut impl Sleeper,
    ) -> Result<AccessPointReady, ProvisionError> {
        self.expect_state(ProvisionState::ScanningNetworks, "start fallback")?;

        let _ = radio.disconnect();
        sleeper.sleep(self.policy.settle);
        let (networks, scan_error) = match radio.scan() {
            Ok(networks) => (networks, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        sleeper.sleep(self.policy.settle);

        self.state = ProvisionState::BroadcastingAp;
        radio.start_access_point(&self.policy.access_point_ssid)?;
        self.state = ProvisionState::AwaitingCredentials;

        Ok(AccessPointReady {
            listing: NetworkListing { networks },
            scan_error,
        })
    }

    /// Validates and stores a submitted pair. Invalid pairs change nothing.
    pub fn submit_credentials(
        &mut self,
        store: &mut impl NonVolatileStore,
        ssid: &str,
        password: &str,
    ) -> Result<Submission, ProvisionError> {
        self.expect_state(ProvisionState::AwaitingCredentials, "accept credentials")?;

        let record = match CredentialRecord::new(ssid, password) {
            Ok(record) => record,
            Err(err) => return Ok(Submission::Rejected(err)),
        };
        record.persist(store)?;

        self.state = ProvisionState::PersistedRestartPending;
        Ok(Submission::Persisted(RestartRequest { ssid: record.ssid }))
    }

    fn expect_state(
        &self,
        expected: ProvisionState,
        operation: &'static str,
    ) -> Result<(), ProvisionError> {
        if self.state != expected {
            return Err(ProvisionError::InvalidTransition {
                state: self.state.as_str(),
                operation,
            });
        }
        Ok(())
    }
}
