use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    layout::{Field, DEFAULT_STORE_CAPACITY, RECORD_LEN},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinConfig {
    pub mode_switch: i32,
    pub ir_receive: i32,
    pub ir_transmit: i32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            mode_switch: 5,
            ir_receive: 0,
            ir_transmit: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrHardwareConfig {
    pub tx_channel: u8,
    pub rx_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_channel: 0,
            rx_channel: 4,
            carrier_khz: 38,
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_channel > 7 {
            self.tx_channel = 0;
        }
        if self.rx_channel > 7 || self.rx_channel == self.tx_channel {
            self.rx_channel = if self.tx_channel == 4 { 5 } else { 4 };
        }
        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub access_point_ssid: String,
    pub http_port: u16,
    pub connect_poll_attempts: u32,
    pub connect_poll_interval_ms: u64,
    pub scan_settle_ms: u64,
    pub learn_poll_interval_ms: u64,
    pub store_capacity: usize,
    pub pins: PinConfig,
    pub ir: IrHardwareConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            access_point_ssid: "IR_Controller".to_string(),
            http_port: 80,
            connect_poll_attempts: 20,
            connect_poll_interval_ms: 500,
            scan_settle_ms: 100,
            learn_poll_interval_ms: 20,
            store_capacity: DEFAULT_STORE_CAPACITY,
            pins: PinConfig::default(),
            ir: IrHardwareConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        let ssid = self.access_point_ssid.trim();
        if ssid.is_empty() || ssid.len() > Field::Ssid.max_len() {
            self.access_point_ssid = Self::default().access_point_ssid;
        }

        if self.http_port == 0 {
            self.http_port = 80;
        }

        self.connect_poll_attempts = self.connect_poll_attempts.clamp(1, 600);
        self.connect_poll_interval_ms = self.connect_poll_interval_ms.clamp(50, 10_000);
        self.scan_settle_ms = self.scan_settle_ms.min(5_000);
        self.learn_poll_interval_ms = self.learn_poll_interval_ms.clamp(1, 1_000);
        self.store_capacity = self.store_capacity.max(RECORD_LEN);
        self.ir.sanitize();
    }
}
