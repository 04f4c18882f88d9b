use crate::{
    error::{ProvisionError, StoreError},
    learn::{IrReceiver, LearnOutcome, LearningEngine},
    mode::{select_mode, BootMode, DigitalInput},
    provision::{
        AccessPointReady, ConnectOutcome, ConnectPolicy, NetworkProvisioner, ProvisionState,
        Radio, Sleeper, Submission,
    },
    replay::{ReplayEngine, ReplayOutcome},
    store::NonVolatileStore,
};

/// Everything one boot owns. The variant is chosen once from the mode
/// switch; there is no way to move between them short of a restart.
#[derive(Debug)]
pub enum Session<S> {
    Learning(LearningSession<S>),
    Operational(OperationalSession<S>),
}

impl<S: NonVolatileStore> Session<S> {
    pub fn boot(
        mode_switch: &mut impl DigitalInput,
        store: S,
        policy: ConnectPolicy,
        replay: impl FnOnce() -> ReplayEngine,
    ) -> Self {
        match select_mode(mode_switch) {
            BootMode::Learning => Self::Learning(LearningSession {
                store,
                engine: LearningEngine::new(),
            }),
            BootMode::Operational => Self::Operational(OperationalSession {
                store,
                replay: replay(),
                provisioner: NetworkProvisioner::new(policy),
            }),
        }
    }

    pub fn mode(&self) -> BootMode {
        match self {
            Self::Learning(_) => BootMode::Learning,
            Self::Operational(_) => BootMode::Operational,
        }
    }

    pub fn into_operational(self) -> Option<OperationalSession<S>> {
        match self {
            Self::Operational(session) => Some(session),
            Self::Learning(_) => None,
        }
    }

    pub fn into_learning(self) -> Option<LearningSession<S>> {
        match self {
            Self::Learning(session) => Some(session),
            Self::Operational(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct LearningSession<S> {
    store: S,
    engine: LearningEngine,
}

impl<S: NonVolatileStore> LearningSession<S> {
    pub fn poll(&mut self, receiver: &mut impl IrReceiver) -> Result<LearnOutcome, StoreError> {
        self.engine.poll_once(receiver, &mut self.store)
    }

    pub fn engine(&self) -> &LearningEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Operational boot: the provisioner owns the credential fields, the
/// replay engine only reads the signal fields.
#[derive(Debug)]
pub struct OperationalSession<S> {
    store: S,
    replay: ReplayEngine,
    provisioner: NetworkProvisioner,
}

impl<S: NonVolatileStore> OperationalSession<S> {
    pub fn connect(
        &mut self,
        radio: &mut impl Radio,
        sleeper: &mut impl Sleeper,
    ) -> Result<ConnectOutcome, ProvisionError> {
        self.provisioner.connect(&self.store, radio, sleeper)
    }

    pub fn start_fallback(
        &mut self,
        radio: &mut impl Radio,
        sleeper: &mut impl Sleeper,
    ) -> Result<AccessPointReady, ProvisionError> {
        self.provisioner.start_fallback(radio, sleeper)
    }

    pub fn submit_credentials(
        &mut self,
        ssid: &str,
        password: &str,
    ) -> Result<Submission, ProvisionError> {
        self.provisioner
            .submit_credentials(&mut self.store, ssid, password)
    }

    pub fn replay(&mut self) -> ReplayOutcome {
        self.replay.replay(&self.store)
    }

    pub fn provision_state(&self) -> ProvisionState {
        self.provisioner.state()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
