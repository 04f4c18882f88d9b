use std::collections::BTreeMap;

use crate::{
    error::{StoreError, TransmitError},
    record::{LearnedCommand, SignalRecord},
    store::NonVolatileStore,
};

/// Sends one command value using a single vendor protocol.
pub trait IrTransmit: Send {
    fn transmit(&mut self, value: u64) -> Result<(), TransmitError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Sent(LearnedCommand),
    /// No transmitter is bound to the stored protocol id.
    Unbound(LearnedCommand),
    TransmitFailed(LearnedCommand, TransmitError),
    StoreUnreadable(StoreError),
}

/// Protocol id to transmitter map. Ids without an entry replay as a no-op.
#[derive(Default)]
pub struct ReplayEngine {
    transmitters: BTreeMap<u32, Box<dyn IrTransmit>>,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, protocol: u32, transmitter: impl IrTransmit + 'static) -> Self {
        self.transmitters.insert(protocol, Box::new(transmitter));
        self
    }

    /// Reads the learned command and fires it. Never fails from the
    /// caller's side; the outcome is only informational.
    pub fn replay(&mut self, store: &impl NonVolatileStore) -> ReplayOutcome {
        let command = match SignalRecord::load(store) {
            Ok(record) => record.decode(),
            Err(err) => return ReplayOutcome::StoreUnreadable(err),
        };
        self.dispatch(command)
    }

    pub fn dispatch(&mut self, command: LearnedCommand) -> ReplayOutcome {
        let Some(transmitter) = self.transmitters.get_mut(&command.protocol) else {
            return ReplayOutcome::Unbound(command);
        };
        match transmitter.transmit(command.value) {
            Ok(()) => ReplayOutcome::Sent(command),
            Err(err) => ReplayOutcome::TransmitFailed(command, err),
        }
    }
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("bound", &self.transmitters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{layout::Field, record::protocol, store::MemoryStore};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u64>>>);

    impl IrTransmit for Recorder {
        fn transmit(&mut self, value: u64) -> Result<(), TransmitError> {
            self.0.lock().unwrap().push(value);
            Ok(())
        }
    }

    struct Broken;

    impl IrTransmit for Broken {
        fn transmit(&mut self, _value: u64) -> Result<(), TransmitError> {
            Err(TransmitError::Hardware("rmt timeout".to_string()))
        }
    }

    fn store_with(signal: &str, brand: &str) -> MemoryStore {
        let mut store = MemoryStore::default();
        SignalRecord {
            signal_code: signal.to_string(),
            brand_code: brand.to_string(),
        }
        .persist(&mut store)
        .unwrap();
        store
    }

    #[test]
    fn dispatches_to_bound_protocol() {
        let nec = Recorder::default();
        let samsung = Recorder::default();
        let mut engine = ReplayEngine::new()
            .bind(protocol::NEC, nec.clone())
            .bind(protocol::SAMSUNG, samsung.clone());

        let outcome = engine.replay(&store_with("20df10ef", "3"));

        assert_eq!(
            outcome,
            ReplayOutcome::Sent(LearnedCommand {
                value: 0x20DF_10EF,
                protocol: 3,
            })
        );
        assert_eq!(*nec.0.lock().unwrap(), vec![0x20DF_10EF]);
        assert!(samsung.0.lock().unwrap().is_empty());
    }

    #[test]
    fn unbound_protocol_is_a_no_op() {
        let nec = Recorder::default();
        let mut engine = ReplayEngine::new().bind(protocol::NEC, nec.clone());

        let outcome = engine.replay(&store_with("20df10ef", "99"));

        assert!(matches!(
            outcome,
            ReplayOutcome::Unbound(LearnedCommand { protocol: 99, .. })
        ));
        assert!(nec.0.lock().unwrap().is_empty());
    }

    #[test]
    fn never_written_store_replays_nothing() {
        let nec = Recorder::default();
        let mut engine = ReplayEngine::new().bind(protocol::NEC, nec.clone());

        let outcome = engine.replay(&MemoryStore::default());

        assert_eq!(outcome, ReplayOutcome::Unbound(LearnedCommand::default()));
        assert!(nec.0.lock().unwrap().is_empty());
    }

    #[test]
    fn transmit_failure_is_reported_not_raised() {
        let mut engine = ReplayEngine::new().bind(protocol::SAMSUNG, Broken);

        let outcome = engine.replay(&store_with("e0e040bf", "7"));

        assert!(matches!(outcome, ReplayOutcome::TransmitFailed(_, _)));
    }

    #[test]
    fn undersized_store_is_reported() {
        struct Tiny(Vec<u8>);

        impl NonVolatileStore for Tiny {
            fn image(&self) -> &[u8] {
                &self.0
            }

            fn image_mut(&mut self) -> &mut [u8] {
                &mut self.0
            }

            fn commit(&mut self) -> Result<(), crate::error::StorageFault> {
                Ok(())
            }

            fn discard(&mut self) {}
        }

        let mut engine = ReplayEngine::new();
        let outcome = engine.replay(&Tiny(vec![0; Field::BrandCode.offset()]));

        assert!(matches!(outcome, ReplayOutcome::StoreUnreadable(_)));
    }
}
