pub mod config;
pub mod error;
pub mod frame;
pub mod layout;
pub mod learn;
pub mod mode;
pub mod pages;
pub mod provision;
pub mod record;
pub mod replay;
pub mod session;
pub mod store;

pub use config::{BridgeConfig, IrHardwareConfig, PinConfig};
pub use error::{
    ConfigError, CredentialError, LinkError, ProvisionError, StorageFault, StoreError,
    TransmitError,
};
pub use layout::{Field, DEFAULT_STORE_CAPACITY, RECORD_LEN};
pub use learn::{IrReceiver, LearnOutcome, LearningEngine};
pub use mode::{select_mode, BootMode, DigitalInput};
pub use provision::{
    AccessPointReady, ConnectOutcome, ConnectPolicy, NetworkListing, NetworkProvisioner,
    ProvisionState, Radio, RestartRequest, ScannedNetwork, Sleeper, Submission, ThreadSleeper,
};
pub use record::{protocol, CapturedSignal, CredentialRecord, LearnedCommand, SignalRecord};
pub use replay::{IrTransmit, ReplayEngine, ReplayOutcome};
pub use session::{LearningSession, OperationalSession, Session};
pub use store::{MemoryStore, NonVolatileStore};
