//! Unit tests for the public building blocks.

#[cfg(test)]
mod thread_tests {
    use crate::config::priority;
    use crate::tests::helpers::TestEnvironment;
    use crate::thread::{BlockCondition, ThreadBuilder, ThreadFlags, ThreadState, Timeout};

    #[test]
    fn test_builder_attributes() {
        let env = TestEnvironment::periodic();
        let tid = env.with(|pod| {
            pod.thread_init(
                ThreadBuilder::new()
                    .name("worker")
                    .priority(priority::HIGH)
                    .fpu(true)
                    .round_robin(0),
            )
        });
        let tid = tid.expect("thread_init");

        env.with(|pod| {
            let thread = pod.thread(tid).unwrap();
            assert_eq!(thread.name(), "worker");
            assert_eq!(thread.state(), ThreadState::Dormant);
            assert_eq!(thread.base_priority(), priority::HIGH);
            assert!(thread.flags().contains(ThreadFlags::FPU | ThreadFlags::ROUND_ROBIN));
            assert_eq!(thread.cpu(), 0);
            assert!(thread.entry().is_none());
        });
    }

    #[test]
    fn test_thread_snapshot() {
        let env = TestEnvironment::periodic();
        let tid = env.spawn("snap", priority::LOW);
        let infos = env.nucleus.threads();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, tid);
        assert_eq!(infos[0].name, "snap");
        assert_eq!(infos[0].state, ThreadState::Running);
        assert_eq!(infos[0].wait_channel, None);
    }

    #[test]
    fn test_thread_table_limit() {
        let env = TestEnvironment::new(crate::config::NucleusConfig::periodic(1).max_threads(2));
        env.with(|pod| {
            pod.thread_init(ThreadBuilder::new()).unwrap();
            pod.thread_init(ThreadBuilder::new()).unwrap();
            assert_eq!(
                pod.thread_init(ThreadBuilder::new()),
                Err(crate::errors::ResourceError::TooManyThreads.into())
            );
        });
    }

    #[test]
    fn test_suspend_rejects_pending_mask() {
        let env = TestEnvironment::periodic();
        let tid = env.spawn("t", 1);
        assert_eq!(
            env.with(|pod| pod.suspend(tid, BlockCondition::PENDING, Timeout::Infinite)),
            Err(crate::errors::InvalidOperationError::NotSupported.into())
        );
        assert_eq!(env.state(tid), ThreadState::Running);
    }

    #[test]
    fn test_stale_thread_handle() {
        let env = TestEnvironment::periodic();
        let tid = env.spawn("short-lived", 1);
        env.with(|pod| pod.thread_delete(tid)).unwrap();
        let again = env.spawn("reuses-slot", 1);
        assert_ne!(tid, again);
        assert_eq!(
            env.with(|pod| pod.resume(tid, BlockCondition::SUSPENDED)),
            Err(crate::errors::NucleusError::bad_thread())
        );
    }
}

#[cfg(test)]
mod config_tests {
    use crate::config::{NucleusConfig, TimerMode, DEFAULT_RR_QUANTUM, DEFAULT_WHEEL_SIZE};

    #[test]
    fn test_periodic_defaults() {
        let config = NucleusConfig::default();
        assert_eq!(config.cpus, 1);
        assert_eq!(
            config.timer_mode,
            TimerMode::Periodic {
                wheel_size: DEFAULT_WHEEL_SIZE
            }
        );
        assert_eq!(config.rr_period, 1);
        assert_eq!(config.rr_quantum, DEFAULT_RR_QUANTUM);
        assert_eq!(config.min_alarm_latency, 0);
    }

    #[test]
    fn test_aperiodic_scales_round_robin() {
        let config = NucleusConfig::aperiodic(2, 1_000).wheel_size(8);
        assert_eq!(config.timer_mode, TimerMode::Aperiodic);
        assert_eq!(config.rr_period, 1_000);
        assert_eq!(config.rr_quantum, DEFAULT_RR_QUANTUM * 1_000);
        assert_eq!(config.clock_hz, 1_000_000_000);
    }

    #[test]
    fn test_zero_rr_period_rejected() {
        let mut config = NucleusConfig::periodic(1);
        config.rr_period = 0;
        let err = crate::kernel::Nucleus::new(
            alloc::sync::Arc::new(crate::arch::SimHal::new(1)),
            config,
        )
        .err();
        assert_eq!(
            err,
            Some(crate::errors::InvalidOperationError::ZeroInterval.into())
        );
    }
}

#[cfg(test)]
mod time_tests {
    use crate::config::NucleusConfig;
    use crate::tests::helpers::TestEnvironment;
    use core::time::Duration;

    #[test]
    fn test_pod_tick_rate_follows_mode() {
        let periodic = TestEnvironment::periodic();
        let rate = periodic.with(|pod| pod.tick_rate());
        assert_eq!(rate.frequency(), 1000);
        assert_eq!(rate.duration_to_ticks(Duration::from_millis(15)), 15);

        let tickless = TestEnvironment::new(NucleusConfig::aperiodic(1, 1_000));
        let rate = tickless.with(|pod| pod.tick_rate());
        assert_eq!(rate.nanos_to_ticks(1_500), 1_500);
        assert_eq!(rate.ticks_to_nanos(2), 2);
    }

    #[test]
    fn test_now_tracks_mode() {
        let periodic = TestEnvironment::periodic();
        periodic.tick(3);
        assert_eq!(periodic.with(|pod| pod.now()), 3);

        let tickless = TestEnvironment::new(NucleusConfig::aperiodic(1, 1_000));
        tickless.hal.set_clock(12_345);
        assert_eq!(tickless.with(|pod| (pod.now(), pod.jiffies())), (12_345, 0));
    }
}

#[cfg(test)]
mod lock_tests {
    use crate::arch::SimHal;
    use crate::lock::NkLock;

    #[test]
    fn test_lock_masks_and_restores_interrupts() {
        let hal = SimHal::new(1);
        let lock = NkLock::new();
        let outer = lock.acquire(&hal);
        assert!(!hal.irqs_enabled(0));
        let inner = lock.acquire(&hal);
        assert!(inner.is_nested());
        lock.release(&hal, inner);
        assert!(!hal.irqs_enabled(0));
        assert_eq!(lock.owner(), Some(0));
        lock.release(&hal, outer);
        assert!(hal.irqs_enabled(0));
        assert_eq!(lock.owner(), None);
    }
}

#[cfg(test)]
mod error_tests {
    use crate::errors::{NucleusError, WaitError};
    use crate::synch::SynchFlags;
    use crate::tests::helpers::TestEnvironment;
    use crate::thread::{Timeout, WakeReason};

    #[test]
    fn test_destroyed_object_reports_removed() {
        let env = TestEnvironment::periodic();
        let sid = env.with(|pod| pod.synch_init(SynchFlags::empty())).unwrap();
        let waiter = env.spawn("waiter", 3);
        env.with(|pod| pod.sleep_on(sid, Timeout::Infinite)).unwrap();

        assert_eq!(env.with(|pod| pod.synch_destroy(sid)), Ok(true));
        let reason = env.with(|pod| pod.wake_reason(waiter)).unwrap();
        assert_eq!(reason, Some(WakeReason::Removed));
        assert_eq!(
            reason.map(WakeReason::into_result),
            Some(Err(NucleusError::Wait(WaitError::Removed)))
        );
        assert_eq!(
            env.with(|pod| pod.sleep_on(sid, Timeout::Infinite)),
            Err(NucleusError::bad_synch())
        );
    }

    #[test]
    fn test_blocking_from_interrupt_is_refused() {
        let env = TestEnvironment::periodic();
        env.spawn("t", 3);
        let refused = env.with(|pod| {
            let id = pod
                .intr_init(8, crate::intr::IntrFlags::empty(), 0, |pod, _, _| {
                    assert_eq!(pod.delay(5), Err(NucleusError::wrong_context()));
                    crate::intr::IsrStatus::HANDLED | crate::intr::IsrStatus::ENABLE
                })
                .unwrap();
            pod.intr_attach(id).unwrap();
            id
        });
        env.nucleus.handle_irq(8);
        assert_eq!(env.with(|pod| pod.intr_hits(refused)), Ok(1));
    }
}
