//! Test helper utilities and common functionality.

use crate::arch::SimHal;
use crate::config::NucleusConfig;
use crate::kernel::Nucleus;
use crate::sched::Pod;
use crate::synch::SynchFlags;
use crate::thread::{BlockCondition, ThreadBuilder, ThreadFlags, ThreadId, ThreadState};
use alloc::sync::Arc;
use alloc::vec::Vec;

/// IRQ line the clock interrupt is attached to.
pub(crate) const CLOCK_LINE: usize = 0;

pub(crate) fn noop(_: usize) {}

/// Test environment: a simulated HAL and a nucleus with the clock attached.
pub(crate) struct TestEnvironment {
    pub(crate) hal: Arc<SimHal>,
    pub(crate) nucleus: Nucleus<SimHal>,
}

impl TestEnvironment {
    pub(crate) fn new(config: NucleusConfig) -> Self {
        let hal = Arc::new(SimHal::new(config.cpus));
        let nucleus = Nucleus::new(hal.clone(), config).expect("nucleus");
        nucleus
            .with(|pod| pod.attach_clock(CLOCK_LINE))
            .expect("clock");
        hal.take_events();
        Self { hal, nucleus }
    }

    pub(crate) fn periodic() -> Self {
        Self::new(NucleusConfig::periodic(1))
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Pod<SimHal>) -> R) -> R {
        self.nucleus.with(f)
    }

    /// Create and start a thread.
    pub(crate) fn spawn(&self, name: &str, prio: u8) -> ThreadId {
        self.spawn_with(ThreadBuilder::new().name(name).priority(prio))
    }

    pub(crate) fn spawn_with(&self, builder: ThreadBuilder) -> ThreadId {
        self.with(|pod| {
            let tid = pod.thread_init(builder).expect("thread_init");
            pod.thread_start(tid, noop, 0).expect("thread_start");
            tid
        })
    }

    /// Create and start a thread left suspended.
    pub(crate) fn spawn_suspended(&self, name: &str, prio: u8) -> ThreadId {
        self.spawn_with(ThreadBuilder::new().name(name).priority(prio).suspended(true))
    }

    pub(crate) fn resume(&self, tid: ThreadId) {
        self.with(|pod| pod.resume(tid, BlockCondition::SUSPENDED))
            .expect("resume");
    }

    /// Suspend a thread indefinitely.
    pub(crate) fn park(&self, tid: ThreadId) {
        self.with(|pod| {
            pod.suspend(tid, BlockCondition::SUSPENDED, crate::thread::Timeout::Infinite)
        })
        .expect("suspend");
    }

    /// Deliver `n` clock interrupts on the calling CPU.
    pub(crate) fn tick(&self, n: u64) {
        for _ in 0..n {
            self.nucleus.handle_irq(CLOCK_LINE);
        }
    }

    pub(crate) fn current(&self) -> Option<ThreadId> {
        self.with(|pod| pod.current())
    }

    pub(crate) fn priority(&self, tid: ThreadId) -> u8 {
        self.with(|pod| pod.thread(tid).expect("thread").priority())
    }

    pub(crate) fn state(&self, tid: ThreadId) -> ThreadState {
        self.with(|pod| pod.thread(tid).expect("thread").state())
    }
}

/// Check the structural invariants of a pod.
///
/// Panics with a description of the first violation found.
pub(crate) fn check_invariants(pod: &Pod<SimHal>) {
    for (cpu, slot) in pod.cpus.iter().enumerate() {
        let queued: Vec<_> = slot.rq.iter().collect();
        for &(tid, prio) in &queued {
            let thread = pod.threads.get(tid).expect("queued thread is alive");
            assert_eq!(thread.state, ThreadState::Ready, "{:?} queued but not ready", tid);
            assert_eq!(thread.cur_prio, prio, "{:?} queued at a stale priority", tid);
            assert_eq!(thread.cpu, cpu);
        }

        if let Some(curr) = slot.curr {
            let thread = pod.threads.get(curr).expect("current thread is alive");
            assert!(
                matches!(thread.state, ThreadState::Running | ThreadState::Zombie)
                    || slot.resched,
                "{:?} current on CPU {} in state {:?}",
                curr,
                cpu,
                thread.state
            );
            assert!(queued.iter().all(|&(tid, _)| tid != curr));

            let settled = slot.nesting == 0
                && !slot.resched
                && !thread.flags.contains(ThreadFlags::LOCKED);
            if settled {
                if let Some(top) = slot.rq.top_priority() {
                    assert!(
                        top <= thread.cur_prio,
                        "CPU {} runs priority {} with {} ready",
                        cpu,
                        thread.cur_prio,
                        top
                    );
                }
            }
        } else if slot.nesting == 0 && !slot.resched {
            assert!(slot.rq.is_empty(), "CPU {} idle with ready threads", cpu);
        }
    }

    for (tid, thread) in pod.threads.iter() {
        if thread.state == ThreadState::Running {
            assert_eq!(
                pod.cpus[thread.cpu].curr,
                Some(tid),
                "{:?} running but not current on CPU {}",
                tid,
                thread.cpu
            );
        }
        if thread.state == ThreadState::Ready {
            let slot = &pod.cpus[thread.cpu];
            assert_eq!(
                slot.rq.iter().filter(|&(queued, _)| queued == tid).count(),
                1,
                "{:?} ready but not queued exactly once",
                tid
            );
        }

        if thread.is_blocked_on(BlockCondition::PENDING) {
            let sid = thread.wchan.expect("pending thread has a wait channel");
            let synch = pod.synchs.get(sid).expect("wait channel is alive");
            assert!(synch.waiters.contains(tid), "{:?} missing from {:?}", tid, sid);
        }

        let inherited = thread
            .claims
            .iter()
            .filter_map(|&sid| pod.synchs.get(sid))
            .filter_map(|synch| synch.waiters.top_priority())
            .max()
            .unwrap_or(0);
        if thread.state != ThreadState::Zombie {
            assert_eq!(
                thread.cur_prio,
                thread.base_prio.max(inherited),
                "{:?} priority out of line with its claims",
                tid
            );
            assert_eq!(
                thread.flags.contains(ThreadFlags::BOOSTED),
                thread.cur_prio > thread.base_prio
            );
        }
    }

    for (sid, synch) in pod.synchs.iter() {
        for waiter in synch.waiters.threads() {
            let thread = pod.threads.get(waiter).expect("waiter is alive");
            assert_eq!(thread.wchan, Some(sid));
        }
        if !synch.flags.contains(SynchFlags::PIP) {
            continue;
        }
        match synch.owner {
            Some(owner) => {
                let thread = pod.threads.get(owner).expect("owner is alive");
                let wants = synch
                    .waiters
                    .top_priority()
                    .map_or(false, |top| top > thread.base_prio);
                assert_eq!(synch.flags.contains(SynchFlags::CLAIMED), wants);
                assert_eq!(thread.claims.contains(&sid), wants);
            }
            None => assert!(!synch.flags.contains(SynchFlags::CLAIMED)),
        }
    }
}
