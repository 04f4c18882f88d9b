use crate::{
    error::StoreError,
    record::{CapturedSignal, SignalRecord},
    store::NonVolatileStore,
};

/// IR receiver polled by the learning loop.
pub trait IrReceiver {
    /// Returns the next decoded frame, if one arrived since the last poll,
    /// and re-arms the receiver.
    fn poll_capture(&mut self) -> Option<CapturedSignal>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    Idle,
    Discarded(CapturedSignal),
    Unchanged(SignalRecord),
    Learned(SignalRecord),
}

/// Persists the last valid capture; sentinel frames are dropped.
#[derive(Debug, Default)]
pub struct LearningEngine {
    learned: u64,
    discarded: u64,
}

impl LearningEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_once(
        &mut self,
        receiver: &mut impl IrReceiver,
        store: &mut impl NonVolatileStore,
    ) -> Result<LearnOutcome, StoreError> {
        match receiver.poll_capture() {
            Some(capture) => self.learn(capture, store),
            None => Ok(LearnOutcome::Idle),
        }
    }

    pub fn learn(
        &mut self,
        capture: CapturedSignal,
        store: &mut impl NonVolatileStore,
    ) -> Result<LearnOutcome, StoreError> {
        if capture.is_sentinel() {
            self.discarded = self.discarded.saturating_add(1);
            return Ok(LearnOutcome::Discarded(capture));
        }

        let record = SignalRecord::from_capture(&capture);
        // Held buttons repeat the same frame; skip the flash write.
        if SignalRecord::load(store)? == record {
            return Ok(LearnOutcome::Unchanged(record));
        }

        record.persist(store)?;
        self.learned = self.learned.saturating_add(1);
        Ok(LearnOutcome::Learned(record))
    }

    pub fn learned_count(&self) -> u64 {
        self.learned
    }

    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        record::{protocol, CredentialRecord},
        store::MemoryStore,
    };

    struct QueuedReceiver(VecDeque<CapturedSignal>);

    impl IrReceiver for QueuedReceiver {
        fn poll_capture(&mut self) -> Option<CapturedSignal> {
            self.0.pop_front()
        }
    }

    fn nec(value: u64) -> CapturedSignal {
        CapturedSignal {
            value,
            protocol: protocol::NEC,
        }
    }

    #[test]
    fn valid_capture_is_persisted() {
        let mut store = MemoryStore::default();
        let mut engine = LearningEngine::new();

        let outcome = engine.learn(nec(0x20DF_10EF), &mut store).unwrap();

        let expected = SignalRecord {
            signal_code: "20df10ef".to_string(),
            brand_code: "3".to_string(),
        };
        assert_eq!(outcome, LearnOutcome::Learned(expected.clone()));
        store.power_cycle();
        assert_eq!(SignalRecord::load(&store).unwrap(), expected);
    }

    #[test]
    fn sentinel_captures_never_write() {
        let mut store = MemoryStore::default();
        CredentialRecord::new("home", "secret")
            .unwrap()
            .persist(&mut store)
            .unwrap();
        let image = store.durable_image().to_vec();
        let commits = store.commit_count();
        let mut engine = LearningEngine::new();

        for capture in [
            nec(u64::MAX),
            nec(0xFFFF_FFFF),
            CapturedSignal {
                value: 0x20DF_10EF,
                protocol: u32::MAX,
            },
        ] {
            let outcome = engine.learn(capture, &mut store).unwrap();
            assert_eq!(outcome, LearnOutcome::Discarded(capture));
        }

        assert_eq!(store.commit_count(), commits);
        assert_eq!(store.image(), image.as_slice());
        assert_eq!(engine.discarded_count(), 3);
    }

    #[test]
    fn last_valid_capture_wins() {
        let mut store = MemoryStore::default();
        let mut engine = LearningEngine::new();
        let mut receiver = QueuedReceiver(VecDeque::from([
            nec(0x20DF_10EF),
            nec(u64::MAX),
            CapturedSignal {
                value: 0xE0E0_40BF,
                protocol: protocol::SAMSUNG,
            },
            nec(0xFFFF_FFFF),
        ]));

        while !matches!(
            engine.poll_once(&mut receiver, &mut store).unwrap(),
            LearnOutcome::Idle
        ) {}

        let stored = SignalRecord::load(&store).unwrap();
        assert_eq!(stored.signal_code, "e0e040bf");
        assert_eq!(stored.brand_code, "7");
        assert_eq!(engine.learned_count(), 2);
    }

    #[test]
    fn repeated_frame_skips_commit() {
        let mut store = MemoryStore::default();
        let mut engine = LearningEngine::new();

        engine.learn(nec(0x20DF_10EF), &mut store).unwrap();
        let outcome = engine.learn(nec(0x20DF_10EF), &mut store).unwrap();

        assert!(matches!(outcome, LearnOutcome::Unchanged(_)));
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn shorter_capture_overwrites_cleanly() {
        let mut store = MemoryStore::default();
        let mut engine = LearningEngine::new();

        engine
            .learn(nec(0x1234_5678_9ABC_DEF0), &mut store)
            .unwrap();
        engine.learn(nec(0xAB), &mut store).unwrap();

        let raw = store.read_field(96, 64).unwrap();
        assert_eq!(&raw[..2], b"ab");
        assert!(raw[2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn storage_fault_is_reported() {
        let mut store = MemoryStore::default();
        store.fail_commits(true);
        let mut engine = LearningEngine::new();

        let err = engine.learn(nec(0x20DF_10EF), &mut store).unwrap_err();
        assert!(matches!(err, StoreError::Fault(_)));
    }

    #[test]
    fn capture_is_retried_after_storage_fault_clears() {
        let mut store = MemoryStore::default();
        let mut engine = LearningEngine::new();

        store.fail_commits(true);
        assert!(engine.learn(nec(0x20DF_10EF), &mut store).is_err());

        store.fail_commits(false);
        let outcome = engine.learn(nec(0x20DF_10EF), &mut store).unwrap();

        assert!(matches!(outcome, LearnOutcome::Learned(_)));
        assert_eq!(store.commit_count(), 1);
        assert_eq!(engine.learned_count(), 1);
        store.power_cycle();
        assert_eq!(SignalRecord::load(&store).unwrap().signal_code, "20df10ef");
    }
}
