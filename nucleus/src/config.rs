use anyhow::ensure;
use log_crate::LevelFilter;
use proc::CoreId;

/// Boot-time kernel parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cores brought up at boot. More than one selects the SMP yield path.
    pub num_cores: usize,
    /// The core allowed to mutate kernel tables.
    pub master: CoreId,
    pub proc_max: usize,
    pub thrd_max: usize,
    pub sem_open_max: usize,
    pub sem_value_max: i32,
    pub sem_name_max: usize,
    /// Open-file slots per process.
    pub open_max: usize,
    /// Clock ticks per dispatch.
    pub quantum: usize,
    pub log_level: LevelFilter,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            num_cores: 1,
            master: CoreId::BOOT,
            proc_max: 64,
            thrd_max: 128,
            sem_open_max: 64,
            sem_value_max: 32767,
            sem_name_max: 32,
            open_max: 20,
            quantum: 50,
            log_level: LevelFilter::Info,
        }
    }

    pub const fn with_cores(mut self, num_cores: usize) -> Self {
        self.num_cores = num_cores;
        self
    }

    pub const fn with_master(mut self, master: CoreId) -> Self {
        self.master = master;
        self
    }

    pub const fn with_quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum;
        self
    }

    pub const fn with_proc_max(mut self, proc_max: usize) -> Self {
        self.proc_max = proc_max;
        self
    }

    pub const fn with_thrd_max(mut self, thrd_max: usize) -> Self {
        self.thrd_max = thrd_max;
        self
    }

    pub const fn with_sem_open_max(mut self, sem_open_max: usize) -> Self {
        self.sem_open_max = sem_open_max;
        self
    }

    pub const fn with_log_level(mut self, log_level: LevelFilter) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.num_cores >= 1, "at least one core is required");
        ensure!(
            self.master.0 < self.num_cores,
            "master {:?} is not one of the {} cores",
            self.master,
            self.num_cores
        );
        ensure!(self.proc_max >= 2, "process table must hold idle and init");
        ensure!(self.thrd_max >= 2, "thread table must hold idle and init");
        ensure!(self.sem_value_max > 0, "semaphore value bound must be positive");
        ensure!(self.sem_name_max > 0, "semaphore names must be allowed");
        ensure!(self.quantum > 0, "quantum must be at least one tick");
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantum, 50);
        assert_eq!(config.sem_value_max, 32767);
    }

    #[test]
    fn master_must_exist() {
        let config = Config::new().with_cores(2).with_master(CoreId(2));
        assert!(config.validate().is_err());
        assert!(Config::new().with_quantum(0).validate().is_err());
        assert!(Config::new().with_proc_max(1).validate().is_err());
    }
}
