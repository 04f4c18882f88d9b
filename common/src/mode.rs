/// Session mode, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    Learning,
    Operational,
}

impl BootMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Learning => "LEARNING",
            Self::Operational => "OPERATIONAL",
        }
    }
}

/// A digital input line such as the mode switch.
pub trait DigitalInput {
    fn is_high(&mut self) -> bool;
}

impl<F: FnMut() -> bool> DigitalInput for F {
    fn is_high(&mut self) -> bool {
        self()
    }
}

/// Reads the mode switch exactly once. Asserted selects learning.
pub fn select_mode(input: &mut impl DigitalInput) -> BootMode {
    if input.is_high() {
        BootMode::Learning
    } else {
        BootMode::Operational
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asserted_switch_selects_learning() {
        assert_eq!(select_mode(&mut || true), BootMode::Learning);
        assert_eq!(select_mode(&mut || false), BootMode::Operational);
    }

    #[test]
    fn switch_is_read_once() {
        let mut reads = 0;
        let mut input = || {
            reads += 1;
            true
        };
        let _ = select_mode(&mut input);
        assert_eq!(reads, 1);
    }
}
