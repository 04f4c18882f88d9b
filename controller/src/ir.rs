use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::Context;
use esp_idf_hal::{
    gpio::{InputPin, OutputPin},
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, ReceiveConfig, TransmitConfig},
        PinState, Pulse, PulseTicks, Receive, RmtChannel, RxRmtDriver, TxRmtDriver,
        VariableLengthSignal,
    },
    units::FromValueType,
};
use log::warn;

use irbridge_common::{frame, protocol, CapturedSignal, IrReceiver, IrTransmit, TransmitError};

/// 80 MHz APB clock / 80 = one tick per microsecond.
const IR_TICK_DIVIDER: u8 = 80;
const RX_IDLE_THRESHOLD_US: u16 = 12_000;
const RX_FILTER_TICKS: u8 = 100;
const RX_RING_BUFFER: usize = 1_024;
const RX_MAX_PULSE_PAIRS: usize = 128;
const INTER_FRAME_GAP_MS: u64 = 40;

enum TxBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

/// One RMT TX channel shared by every protocol bound to the replay engine.
#[derive(Clone)]
pub struct SharedTx {
    backend: Arc<Mutex<TxBackend>>,
}

impl SharedTx {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;
        Ok(Self {
            backend: Arc::new(Mutex::new(TxBackend::Rmt(tx))),
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: Arc::new(Mutex::new(TxBackend::Disabled)),
        }
    }

    /// Binds `protocol` to this channel, if the bridge knows its framing.
    pub fn for_protocol(&self, protocol: u32) -> Option<ProtocolTransmitter> {
        Some(ProtocolTransmitter {
            protocol,
            encode: frame::encoder(protocol)?,
            tx: self.clone(),
        })
    }

    fn send_raw(&self, raw: &[u16]) -> Result<(), TransmitError> {
        let mut backend = self.backend.lock().map_err(|_| TransmitError::Busy)?;
        let TxBackend::Rmt(tx) = &mut *backend else {
            warn!("IR disabled, dropping frame with {} timings", raw.len());
            return Ok(());
        };

        let mut pulses = Vec::with_capacity(raw.len());
        for (index, duration) in raw.iter().enumerate() {
            let level = if index % 2 == 0 {
                PinState::High
            } else {
                PinState::Low
            };
            let ticks = PulseTicks::new(*duration)
                .map_err(|err| TransmitError::Hardware(format!("pulse {duration}us: {err}")))?;
            pulses.push(Pulse::new(level, ticks));
        }

        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .map_err(|err| TransmitError::Hardware(format!("rmt signal: {err}")))?;

        tx.start_blocking(&signal)
            .map_err(|err| TransmitError::Hardware(format!("rmt transmit: {err}")))?;
        thread::sleep(Duration::from_millis(INTER_FRAME_GAP_MS));
        Ok(())
    }
}

pub struct ProtocolTransmitter {
    protocol: u32,
    encode: fn(u64) -> Vec<u16>,
    tx: SharedTx,
}

impl IrTransmit for ProtocolTransmitter {
    fn transmit(&mut self, value: u64) -> Result<(), TransmitError> {
        log::info!("ir tx {} 0x{value:x}", protocol::name(self.protocol));
        self.tx.send_raw(&(self.encode)(value))
    }
}

/// Demodulating IR receiver on an RMT RX channel. The sensor output idles
/// high, so low pulses are marks.
pub struct RmtReceiver {
    rx: RxRmtDriver<'static>,
    pairs: Vec<(Pulse, Pulse)>,
}

impl RmtReceiver {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: InputPin,
    {
        let config = ReceiveConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .idle_threshold(RX_IDLE_THRESHOLD_US)
            .filter_ticks_thresh(RX_FILTER_TICKS);
        let rx = RxRmtDriver::new(channel, pin, &config, RX_RING_BUFFER)
            .context("failed to init RMT IR receiver")?;
        rx.start().context("failed to start RMT IR receiver")?;

        Ok(Self {
            rx,
            pairs: vec![(Pulse::zero(), Pulse::zero()); RX_MAX_PULSE_PAIRS],
        })
    }
}

impl IrReceiver for RmtReceiver {
    fn poll_capture(&mut self) -> Option<CapturedSignal> {
        let read = match self.rx.receive(&mut self.pairs, 0) {
            Ok(Receive::Read(len)) => len,
            Ok(Receive::Overflow(len)) => {
                warn!("IR receive buffer overflowed after {len} pulse pairs");
                len
            }
            Ok(Receive::Timeout) => return None,
            Err(err) => {
                warn!("IR receive failed: {err}");
                return None;
            }
        };

        let mut raw = Vec::with_capacity(read * 2);
        for (first, second) in &self.pairs[..read] {
            for pulse in [first, second] {
                let ticks = pulse.ticks.ticks();
                if ticks == 0 {
                    break;
                }
                let is_mark = pulse.pin_state == PinState::Low;
                // Keep strict mark/space alternation starting with a mark.
                if raw.len() % 2 == 0 && !is_mark {
                    continue;
                }
                raw.push(ticks);
            }
        }

        frame::decode(&raw)
    }
}
