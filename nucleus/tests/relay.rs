use core::sync::atomic::{AtomicUsize, Ordering};

use interrupt::IpiMessage;
use memory::RegionTable;
use nucleus::sem::OpenFlags;
use nucleus::smp::ipi::IpiSource;
use nucleus::{Config, CoreId, Exception, KResult, Kernel, KernelError, ProcId, SlaveCore, Syscall, TaskId};
use proc::{SigHandler, Signal, ThreadState};
use vfs::RamFs;

fn boot(cores: usize) -> Kernel {
    Kernel::boot(Config::new().with_cores(cores), RamFs::new(1), RegionTable::new()).unwrap()
}

/// Fork `n` children of init and hand them to the slaves in core order.
fn spread(k: &mut Kernel, n: usize) -> Vec<(ProcId, TaskId, SlaveCore)> {
    let pids: Vec<ProcId> = (0..n).map(|_| k.create_process(ProcId::INIT).unwrap()).collect();
    k.sched_blocking_thread();
    pids.into_iter()
        .enumerate()
        .map(|(i, pid)| {
            let tid = k.process(pid).unwrap().threads[0];
            let mut core = k.slave(CoreId(i + 1));
            assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(tid)));
            (pid, tid, core)
        })
        .collect()
}

fn call(k: &mut Kernel, core: &SlaveCore, op: Syscall) -> Option<nucleus::SysResult> {
    let ticket = core.submit(op);
    k.service();
    ticket.result()
}

#[test]
fn semaphore_hand_off_between_cores() {
    let mut k = boot(3);
    let mut cores = spread(&mut k, 2);
    let (_, q_tid, mut q) = cores.pop().unwrap();
    let (_, _, p) = cores.pop().unwrap();

    let open = |flags, value| Syscall::SemOpen {
        name: "sem1".into(),
        flags,
        mode: 0o644,
        value,
    };
    let idx = call(&mut k, &p, open(OpenFlags::CREATE, 1)).unwrap().unwrap();
    assert_eq!(call(&mut k, &q, open(OpenFlags::NONE, 0)), Some(Ok(idx)));
    assert_eq!(k.sems().get(idx).unwrap().procs.len(), 2);

    assert_eq!(call(&mut k, &p, Syscall::SemWait(idx)), Some(Ok(0)));
    assert_eq!(k.sems().get(idx).unwrap().value, 0);

    let q_wait = q.submit(Syscall::SemWait(idx));
    k.service();
    assert!(!q_wait.is_released());
    assert_eq!(k.thread(q_tid).unwrap().state, ThreadState::Waiting);
    assert_eq!(q.handle_ipi(), Some(IpiMessage::Idle));

    assert_eq!(call(&mut k, &p, Syscall::SemPost(idx)), Some(Ok(0)));
    assert_eq!(q_wait.result(), Some(Ok(0)));
    assert_eq!(k.sems().get(idx).unwrap().value, 0);
    assert_eq!(q.handle_ipi(), Some(IpiMessage::Schedule(q_tid)));
    assert_eq!(k.outstanding(), 0);
}

#[test]
fn every_waiter_wakes_and_one_wins() {
    let mut k = boot(4);
    let mut cores = spread(&mut k, 3);
    let (_, _, c) = cores.pop().unwrap();
    let (_, _, b) = cores.pop().unwrap();
    let (_, _, a) = cores.pop().unwrap();
    let open = |flags| Syscall::SemOpen {
        name: "/herd".into(),
        flags,
        mode: 0,
        value: 0,
    };
    let idx = call(&mut k, &a, open(OpenFlags::CREATE)).unwrap().unwrap();
    call(&mut k, &b, open(OpenFlags::NONE)).unwrap().unwrap();
    call(&mut k, &c, open(OpenFlags::NONE)).unwrap().unwrap();

    let wait_b = b.submit(Syscall::SemWait(idx));
    let wait_c = c.submit(Syscall::SemWait(idx));
    k.service();
    assert_eq!(k.waiters(nucleus::Chain::Semaphore(idx)).len(), 2);

    call(&mut k, &a, Syscall::SemPost(idx)).unwrap().unwrap();
    let released = [&wait_b, &wait_c].iter().filter(|t| t.is_released()).count();
    assert_eq!(released, 1);
    assert_eq!(k.waiters(nucleus::Chain::Semaphore(idx)).len(), 1);
    assert_eq!(k.sems().get(idx).unwrap().value, 0);
}

static EXCEPTIONS: AtomicUsize = AtomicUsize::new(0);

fn count_exception(_: &mut Kernel) -> KResult<()> {
    EXCEPTIONS.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn duplicate_relay_interrupt_is_discarded() {
    let mut k = boot(2);
    let (_, tid, core) = spread(&mut k, 1).pop().unwrap();
    let ticket = core.submit(Exception::new(count_exception));
    assert_eq!(k.service(), 1);
    assert_eq!(ticket.result(), Some(Ok(0)));
    assert_eq!(EXCEPTIONS.load(Ordering::SeqCst), 1);

    assert!(!k.handle_ipi(IpiSource::Interrupt));
    assert!(!k.handle_ipi(IpiSource::Recheck));
    assert_eq!(EXCEPTIONS.load(Ordering::SeqCst), 1);
    let record = &k.thread(tid).unwrap().relay;
    assert!(record.released);
    assert!(!record.pending);
    assert_eq!(k.curr_core(), k.master());
}

#[test]
fn slave_ticks_expire_the_quantum() {
    let mut k = Kernel::boot(
        Config::new().with_cores(2).with_quantum(2),
        RamFs::new(1),
        RegionTable::new(),
    )
    .unwrap();
    let (_, p_tid, mut core) = spread(&mut k, 1).pop().unwrap();
    let r = k.create_process(ProcId::INIT).unwrap();
    let r_tid = k.process(r).unwrap().threads[0];

    let ticket = core.tick();
    k.service();
    assert_eq!(ticket.result(), Some(Ok(1)));
    let ticket = core.tick();
    k.service();
    assert_eq!(ticket.result(), Some(Ok(0)));
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(r_tid)));
    assert_eq!(k.thread(p_tid).unwrap().state, ThreadState::Ready);
    assert_eq!(k.thread(r_tid).unwrap().counter, 2);
    assert_eq!(k.ticks(), 0);
}

#[test]
fn caught_signal_interrupts_relayed_wait() {
    let mut k = boot(2);
    let (pid, tid, mut core) = spread(&mut k, 1).pop().unwrap();
    let idx = call(
        &mut k,
        &core,
        Syscall::SemOpen {
            name: "gate".into(),
            flags: OpenFlags::CREATE,
            mode: 0,
            value: 0,
        },
    )
    .unwrap()
    .unwrap();
    let handler = Syscall::Sigaction {
        sig: Signal::USR1,
        handler: SigHandler::Handler(0x4000),
    };
    assert_eq!(call(&mut k, &core, handler), Some(Ok(0)));
    let wait = core.submit(Syscall::SemWait(idx));
    k.service();
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Idle));

    k.send_signal(ProcId::INIT, pid, Signal::USR1).unwrap();
    k.service();
    assert_eq!(wait.result(), Some(Err(KernelError::Interrupted)));
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(tid)));
    assert_eq!(k.issig(pid), Some(Signal::USR1));
    assert!(!k.thread(tid).unwrap().interrupted);
}

#[test]
fn killed_waiter_is_released() {
    let mut k = boot(2);
    let (pid, _, core) = spread(&mut k, 1).pop().unwrap();
    let join = core.submit(Syscall::Wait { pid: None });
    k.service();
    assert_eq!(join.result(), Some(Err(KernelError::NoChildren)));

    call(&mut k, &core, Syscall::Fork).unwrap().unwrap();
    let wait = core.submit(Syscall::Wait { pid: None });
    k.service();
    assert!(!wait.is_released());
    k.send_signal(ProcId::INIT, pid, Signal::KILL).unwrap();
    assert_eq!(wait.result(), Some(Err(KernelError::Interrupted)));
    assert_eq!(k.outstanding(), 0);
}

#[test]
fn stale_request_after_reschedule() {
    let mut k = boot(2);
    let (pid, _, core) = spread(&mut k, 1).pop().unwrap();
    k.send_signal(ProcId::INIT, pid, Signal::STOP).unwrap();
    let ticket = core.submit(Syscall::GetPid);
    k.service();
    assert_eq!(ticket.result(), Some(Err(KernelError::Interrupted)));
}

#[test]
fn relayed_yield_waits_for_redispatch() {
    let mut k = boot(2);
    let (_, t, mut core) = spread(&mut k, 1).pop().unwrap();
    let r = k.create_process(ProcId::INIT).unwrap();
    let r_tid = k.process(r).unwrap().threads[0];

    let yielded = core.submit(Syscall::Yield);
    k.service();
    assert!(!yielded.is_released());
    assert_eq!(k.thread(t).unwrap().state, ThreadState::Ready);
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(r_tid)));
    assert_eq!(k.cores().get(CoreId(1)).curr_thread, Some(r_tid));

    let r_yield = core.submit(Syscall::Yield);
    k.service();
    assert_eq!(yielded.result(), Some(Ok(0)));
    assert!(!r_yield.is_released());
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(t)));
    assert_eq!(k.thread(t).unwrap().state, ThreadState::Running);
    assert_eq!(k.outstanding(), 0);
}

#[test]
fn wait_for_one_child_ignores_other_zombies() {
    let mut k = boot(2);
    let (pid, tid, mut core) = spread(&mut k, 1).pop().unwrap();
    let a = ProcId(call(&mut k, &core, Syscall::Fork).unwrap().unwrap());
    let b = ProcId(call(&mut k, &core, Syscall::Fork).unwrap().unwrap());
    k.send_signal(ProcId::INIT, b, Signal::STOP).unwrap();
    k.send_signal(ProcId::INIT, a, Signal::KILL).unwrap();

    let wait = core.submit(Syscall::Wait { pid: Some(b) });
    assert_eq!(k.service(), 1);
    assert!(!wait.is_released());
    assert_eq!(k.waiters(nucleus::Chain::Children(pid)), [tid]);
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Idle));

    k.send_signal(ProcId::INIT, b, Signal::KILL).unwrap();
    k.sched_blocking_thread();
    k.service();
    assert_eq!(wait.result(), Some(Ok(b.0)));
    assert!(k.process(a).is_some());
    assert!(k.process(b).is_none());
    assert_eq!(core.handle_ipi(), Some(IpiMessage::Schedule(tid)));
}
