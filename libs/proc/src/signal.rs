/// Number of signals, including the null signal.
pub const NR_SIGNALS: usize = 32;

#[derive(Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct Signal(pub u8);

impl Signal {
    /// Existence probe. Never delivered.
    pub const NULL: Self = Self(0);
    pub const HUP: Self = Self(1);
    pub const INT: Self = Self(2);
    pub const QUIT: Self = Self(3);
    pub const ILL: Self = Self(4);
    pub const TRAP: Self = Self(5);
    pub const ABRT: Self = Self(6);
    pub const BUS: Self = Self(7);
    pub const FPE: Self = Self(8);
    pub const KILL: Self = Self(9);
    pub const USR1: Self = Self(10);
    pub const SEGV: Self = Self(11);
    pub const USR2: Self = Self(12);
    pub const PIPE: Self = Self(13);
    pub const ALRM: Self = Self(14);
    pub const TERM: Self = Self(15);
    pub const CHLD: Self = Self(17);
    pub const CONT: Self = Self(18);
    pub const STOP: Self = Self(19);
    pub const TSTP: Self = Self(20);
    pub const URG: Self = Self(23);

    #[inline]
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < NR_SIGNALS
    }

    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.0
    }

    /// SIGKILL and SIGSTOP can be neither caught nor ignored.
    #[inline]
    pub fn is_catchable(self) -> bool {
        self != Signal::KILL && self != Signal::STOP
    }

    pub fn default_action(self) -> SigAction {
        match self {
            Signal::CHLD | Signal::URG | Signal::NULL => SigAction::Ignore,
            Signal::STOP | Signal::TSTP => SigAction::Stop,
            Signal::CONT => SigAction::Continue,
            _ => SigAction::Terminate,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum SigAction {
    Terminate,
    Ignore,
    Stop,
    Continue,
}

/// Signal disposition installed by a process.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum SigHandler {
    #[default]
    Default,
    Ignore,
    /// User-space handler entry point.
    Handler(usize),
}
