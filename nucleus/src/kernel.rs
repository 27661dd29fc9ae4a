use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};

use interrupt::InterruptLine;
use memory::{RegionManager, RegionSlot, PAGE_SIZE};
use proc::{CoreId, Credentials, ProcId, ProcState, TaskId, ThreadState};
use vfs::FileSystem;

use crate::config::Config;
use crate::sem::SemTable;
use crate::smp::{self, CoreRegistry, RelayEnvelope, SlaveCore, YieldMode};
use crate::task::proc::{PRegion, Process, USER_BASE};
use crate::task::scheduler::{Policy, SchedulerPolicy};
use crate::task::sync::SleepChains;
use crate::task::table::SlotTable;
use crate::task::thread::Thread;

/// The shared kernel state. Owned by the master core; every table mutation goes through it.
pub struct Kernel {
    pub(crate) config: Config,
    pub(crate) procs: SlotTable<Process>,
    pub(crate) threads: SlotTable<Thread>,
    pub(crate) next_pid: usize,
    pub(crate) next_tid: usize,
    pub(crate) cores: CoreRegistry,
    pub(crate) policy: Policy,
    pub(crate) yield_mode: YieldMode,
    pub(crate) chains: SleepChains,
    pub(crate) sems: SemTable,
    pub(crate) fs: Box<dyn FileSystem>,
    pub(crate) regions: Box<dyn RegionManager>,
    pub(crate) relay: Arc<InterruptLine<RelayEnvelope>>,
    /// The core on whose behalf the master is executing. Differs from the
    /// master only while a relayed request is being serviced.
    pub(crate) curr_core: CoreId,
    /// Requests accepted but neither completed nor parked.
    pub(crate) outstanding: usize,
    pub(crate) ticks: u64,
}

impl Kernel {
    pub fn boot(
        config: Config,
        fs: impl FileSystem + 'static,
        regions: impl RegionManager + 'static,
    ) -> anyhow::Result<Kernel> {
        crate::log::init(config.log_level);
        config.validate()?;
        let cores = CoreRegistry::new(config.num_cores, config.master);
        smp::bring_up(&cores);
        let mut kernel = Kernel {
            procs: SlotTable::new(config.proc_max, 2),
            threads: SlotTable::new(config.thrd_max, 2),
            next_pid: 2,
            next_tid: 2,
            yield_mode: if config.num_cores == 1 {
                YieldMode::Up
            } else {
                YieldMode::Smp
            },
            policy: Policy::default(),
            chains: SleepChains::default(),
            sems: SemTable::new(&config),
            fs: Box::new(fs),
            regions: Box::new(regions),
            relay: Arc::new(InterruptLine::new()),
            curr_core: config.master,
            outstanding: 0,
            ticks: 0,
            cores,
            config,
        };
        kernel.spawn_idle();
        kernel.spawn_init()?;
        kernel.sched_blocking_thread();
        info!(
            "kernel up: {} core(s), master {}, {:?} yield",
            kernel.cores.len(),
            kernel.master().0,
            kernel.yield_mode
        );
        Ok(kernel)
    }

    /// Idle process and thread, running on the master.
    fn spawn_idle(&mut self) {
        let master = self.master();
        let mut idle = Process::new(ProcId::IDLE, None, Credentials::ROOT, String::from("idle"));
        idle.state = ProcState::Running;
        idle.ofiles.resize(self.config.open_max, None);
        idle.threads.push(TaskId::IDLE);
        self.procs.install(0, idle);
        let mut thread = Thread::new(TaskId::IDLE, ProcId::IDLE);
        thread.state = ThreadState::Running;
        thread.core = Some(master);
        self.threads.install(0, thread);
        let core = self.cores.get_mut(master);
        core.curr_thread = Some(TaskId::IDLE);
        core.curr_proc = Some(ProcId::IDLE);
    }

    /// Init process with a main thread ready to run and one page per region.
    fn spawn_init(&mut self) -> anyhow::Result<()> {
        let mut init = Process::new(ProcId::INIT, None, Credentials::ROOT, String::from("init"));
        init.is_new = true;
        init.ofiles.resize(self.config.open_max, None);
        for slot in RegionSlot::ALL {
            let region = self
                .regions
                .alloc_region(PAGE_SIZE)
                .map_err(|e| anyhow::anyhow!("init region: {:?}", e))?;
            let start = USER_BASE[slot.index()];
            self.regions
                .attach_region(ProcId::INIT, slot, start, region)
                .map_err(|e| anyhow::anyhow!("init region: {:?}", e))?;
            init.pregs[slot.index()] = Some(PRegion { region, start });
        }
        init.threads.push(TaskId(1));
        self.procs.install(1, init);
        let mut thread = Thread::new(TaskId(1), ProcId::INIT);
        thread.is_new = true;
        self.threads.install(1, thread);
        self.sched(TaskId(1));
        Ok(())
    }

    /// A handle for a secondary core, to be driven by that core.
    pub fn slave(&self, core: CoreId) -> SlaveCore {
        assert_ne!(core, self.master(), "the master has no slave handle");
        SlaveCore::new(self.cores.get(core).link.clone(), self.relay.clone())
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn master(&self) -> CoreId {
        self.cores.master()
    }

    #[inline]
    pub fn curr_core(&self) -> CoreId {
        self.curr_core
    }

    #[inline]
    pub fn cores(&self) -> &CoreRegistry {
        &self.cores
    }

    #[inline]
    pub fn yield_mode(&self) -> YieldMode {
        self.yield_mode
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn fs(&self) -> &dyn FileSystem {
        &*self.fs
    }

    /// Process ids of every valid slot, in table order.
    pub fn pids(&self) -> Vec<ProcId> {
        self.procs.ids()
    }

    /// Threads ready to run, excluding idle.
    pub fn ready_len(&self) -> usize {
        self.policy.len()
    }
}
