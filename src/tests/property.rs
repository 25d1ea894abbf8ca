//! Property-based tests for verifying system invariants.

#[cfg(test)]
mod property_tests {
    use crate::config::NucleusConfig;
    use crate::synch::{SynchFlags, SynchId};
    use crate::tests::helpers::{check_invariants, TestEnvironment};
    use crate::thread::{BlockCondition, ThreadBuilder, ThreadId, Timeout, WakeReason};
    use alloc::vec::Vec;

    /// Simple linear congruential generator for property testing.
    struct SimpleRng {
        state: u64,
    }

    impl SimpleRng {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            self.state = self
                .state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.state >> 33
        }

        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            min + (self.next_u64() % (max - min))
        }

        fn gen_bool(&mut self) -> bool {
            self.next_u64() & 1 == 0
        }

        fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
            if items.is_empty() {
                None
            } else {
                Some(items[self.gen_range(0, items.len() as u64) as usize])
            }
        }
    }

    struct World {
        env: TestEnvironment,
        threads: Vec<ThreadId>,
        pip: Vec<SynchId>,
        plain: Vec<SynchId>,
    }

    impl World {
        fn new(config: NucleusConfig) -> Self {
            let env = TestEnvironment::new(config);
            let (pip, plain) = env.with(|pod| {
                let pip = (0..3)
                    .map(|_| pod.synch_init(SynchFlags::PIP).unwrap())
                    .collect();
                let plain = (0..2)
                    .map(|i| {
                        let flags = if i == 0 { SynchFlags::PRIO } else { SynchFlags::empty() };
                        pod.synch_init(flags).unwrap()
                    })
                    .collect();
                (pip, plain)
            });
            Self {
                env,
                threads: Vec::new(),
                pip,
                plain,
            }
        }

        fn timeout(rng: &mut SimpleRng) -> Timeout {
            if rng.gen_bool() {
                Timeout::Infinite
            } else {
                Timeout::After(rng.gen_range(1, 6))
            }
        }

        fn step(&mut self, rng: &mut SimpleRng) {
            let cpus = self.env.with(|pod| pod.config().cpus);
            let target = rng.pick(&self.threads);
            let pip = rng.pick(&self.pip);
            let plain = rng.pick(&self.plain);
            let prio = rng.gen_range(0, 40) as u8;

            match rng.gen_range(0, 15) {
                0 | 1 if self.threads.len() < 8 => {
                    let cpu = rng.gen_range(0, cpus as u64) as usize;
                    let tid = self.env.with(|pod| {
                        let tid = pod
                            .thread_init(ThreadBuilder::new().priority(prio).cpu(cpu))
                            .unwrap();
                        pod.thread_start(tid, crate::tests::helpers::noop, 0).unwrap();
                        tid
                    });
                    self.threads.push(tid);
                }
                2 => {
                    if let Some(tid) = target {
                        let timeout = Self::timeout(rng);
                        let _ = self
                            .env
                            .with(|pod| pod.suspend(tid, BlockCondition::SUSPENDED, timeout));
                    }
                }
                3 => {
                    if let Some(tid) = target {
                        let _ = self
                            .env
                            .with(|pod| pod.resume(tid, BlockCondition::SUSPENDED));
                    }
                }
                4 | 5 => {
                    let timeout = Self::timeout(rng);
                    if let Some(sid) = pip {
                        let _ = self.env.with(|pod| pod.acquire(sid, timeout));
                    }
                }
                6 => {
                    let owned: Vec<SynchId> = self.env.with(|pod| {
                        let me = pod.current();
                        self.pip
                            .iter()
                            .copied()
                            .filter(|&sid| me.is_some() && pod.synch_owner(sid) == Ok(me))
                            .collect()
                    });
                    if let Some(sid) = rng.pick(&owned) {
                        self.env.with(|pod| pod.release(sid)).unwrap();
                    }
                }
                7 => {
                    let timeout = Self::timeout(rng);
                    if let Some(sid) = plain {
                        let _ = self.env.with(|pod| pod.sleep_on(sid, timeout));
                    }
                }
                8 => {
                    if let Some(sid) = plain {
                        let _ = self.env.with(|pod| pod.wakeup_one(sid));
                    }
                }
                9 => {
                    if let Some(tid) = target {
                        let _ = self.env.with(|pod| pod.set_priority(tid, prio));
                    }
                }
                10 => {
                    if let Some(tid) = target {
                        let _ = self.env.with(|pod| pod.unblock(tid));
                    }
                }
                11 => {
                    if let Some(tid) = target {
                        if rng.gen_range(0, 4) == 0 {
                            let _ = self.env.with(|pod| pod.thread_delete(tid));
                        }
                    }
                }
                12 => {
                    let _ = self.env.with(|pod| pod.yield_now());
                }
                13 => {
                    let ticks = rng.gen_range(1, 4);
                    let _ = self.env.with(|pod| pod.delay(ticks));
                }
                _ => self.env.tick(rng.gen_range(1, 4)),
            }

            // Let remote CPUs act on their IPIs.
            for cpu in 1..cpus {
                self.env.hal.set_cpu(cpu);
                self.env.nucleus.handle_ipi();
            }
            self.env.hal.set_cpu(0);

            self.threads
                .retain(|&tid| self.env.with(|pod| pod.thread(tid).is_ok()));
        }

        fn check(&self) {
            self.env.with(|pod| {
                check_invariants(pod);

                // Every thread owns two timers, every CPU one.
                assert_eq!(
                    pod.timers.len(),
                    pod.threads.len() * 2 + pod.config().cpus
                );

                // Sleepers of an inheritance object always have someone to boost.
                for &sid in &self.pip {
                    if pod.synch_pending(sid).unwrap() {
                        assert!(pod.synch_owner(sid).unwrap().is_some());
                    }
                }
            });
        }
    }

    fn run(config: NucleusConfig, seed: u64, steps: usize) {
        let mut rng = SimpleRng::new(seed);
        let mut world = World::new(config);
        for _ in 0..steps {
            world.step(&mut rng);
            world.check();
        }
    }

    #[test]
    fn property_random_operations_keep_invariants() {
        for seed in [0x12345678, 0x87654321, 0xdeadbeef, 42] {
            run(NucleusConfig::periodic(1), seed, 400);
        }
    }

    #[test]
    fn property_random_operations_on_two_cpus() {
        for seed in [7, 0xabcdef] {
            run(NucleusConfig::periodic(2), seed, 400);
        }
    }

    #[test]
    fn property_random_operations_tickless() {
        let config = NucleusConfig::aperiodic(1, 10).min_alarm_latency(0);
        let mut rng = SimpleRng::new(0x5eed);
        let mut world = World::new(config);
        for _ in 0..300 {
            world.env.hal.advance_clock(rng.gen_range(0, 8));
            world.step(&mut rng);
            world.check();

            // Whatever is left on the wheel is announced by the alarm.
            world.env.with(|pod| {
                let head = pod.wheel.head().map(|(date, _)| date);
                let alarm = world.env.hal.alarm();
                assert_eq!(alarm.is_some(), head.is_some());
                if let (Some(alarm), Some(head)) = (alarm, head) {
                    assert!(head <= alarm && alarm <= head.max(pod.now()));
                }
            });
        }
    }

    #[test]
    fn property_timed_waits_always_end() {
        let mut rng = SimpleRng::new(0xfeed);
        for _ in 0..20 {
            let env = TestEnvironment::periodic();
            let sid = env.with(|pod| pod.synch_init(SynchFlags::PRIO)).unwrap();
            let mut sleepers = Vec::new();
            for _ in 0..rng.gen_range(1, 6) {
                let prio = rng.gen_range(1, 50) as u8;
                let tid = env.spawn("sleeper", prio);
                let timeout = rng.gen_range(1, 20);
                env.with(|pod| pod.sleep_on(sid, Timeout::After(timeout))).unwrap();
                sleepers.push(tid);
            }

            env.tick(20);
            env.with(|pod| {
                assert!(!pod.synch_pending(sid).unwrap());
                for &tid in &sleepers {
                    assert_eq!(pod.wake_reason(tid).unwrap(), Some(WakeReason::TimedOut));
                }
                check_invariants(pod);
            });
        }
    }
}
