use log::{debug, info, warn};
use tokio::runtime;

use super::{DeviceBackend, DistributedParams, EntryPoint, LauncherConfig, Result, WorkerCohort};

/// How a launch was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch<R> {
    /// The callback ran in this process and returned `R`.
    Local(R),
    /// This process spawned `workers` processes which all finished successfully.
    Spawned { workers: usize },
}

/// Runs a callback either in-process or on one spawned process per device.
pub struct Launcher<D> {
    config: LauncherConfig,
    devices: D,
    entry: EntryPoint,
}

impl<D: DeviceBackend> Launcher<D> {
    /// Creates a new `Launcher`.
    ///
    /// # Args
    /// * `config` - Launcher settings.
    /// * `devices` - The device backend of this host.
    /// * `entry` - The program spawned workers re-execute, usually `EntryPoint::current()`.
    pub fn new(config: LauncherConfig, devices: D, entry: EntryPoint) -> Self {
        Self {
            config,
            devices,
            entry,
        }
    }

    /// Returns the device backend this launcher binds workers with.
    pub fn devices(&self) -> &D {
        &self.devices
    }

    /// Runs `worker` according to the distributed layout in `params`.
    ///
    /// * not distributed, or a world of at most one process: `worker` runs here.
    /// * `params.local_rank` is set: this process is a spawned worker, so it binds
    ///   its device, joins the process group and runs `worker`.
    /// * otherwise one worker per device is spawned and awaited. Workers still
    ///   running when this returns, successfully or not, are killed.
    ///
    /// Must not be called from within an async runtime.
    pub fn run<F, R>(
        &mut self,
        distributed: bool,
        params: &DistributedParams,
        worker: F,
    ) -> Result<Launch<R>>
    where
        F: FnOnce() -> R,
    {
        if !distributed || params.world_size <= 1 {
            debug!(world_size = params.world_size; "running in-process");
            return Ok(Launch::Local(worker()));
        }

        if let Some(local_rank) = params.local_rank {
            self.devices.set_device(local_rank)?;
            self.devices.init_process_group(params)?;
            return Ok(Launch::Local(worker()));
        }

        let workers = self.spawn_workers(params)?;
        Ok(Launch::Spawned { workers })
    }

    fn spawn_workers(&self, params: &DistributedParams) -> Result<usize> {
        let device_count = self.devices.device_count();
        if device_count == 0 {
            warn!("no devices visible, no workers will be spawned");
        }

        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let mut cohort = WorkerCohort::default();
            let outcome = self.launch_cohort(&mut cohort, params, device_count).await;

            let killed = cohort.shutdown().await;
            if killed > 0 {
                warn!("terminated {killed} worker(s) still running");
            }

            outcome.map(|()| cohort.len())
        })
    }

    async fn launch_cohort(
        &self,
        cohort: &mut WorkerCohort,
        params: &DistributedParams,
        device_count: usize,
    ) -> Result<()> {
        for local_rank in 0..device_count {
            let pinned = self
                .config
                .pin_visible_devices
                .then(|| self.devices.device_label(local_rank));
            let vars = params.worker_env(local_rank, pinned.as_deref());

            cohort.spawn(&self.entry, local_rank, params.start_rank + local_rank, &vars)?;
        }

        info!(
            workers = cohort.len(),
            world_size = params.world_size,
            start_rank = params.start_rank;
            "waiting on workers"
        );

        cohort.join().await
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::distributed::LaunchErr;

    #[derive(Default)]
    struct CountingDevices {
        count: usize,
        set_device: Vec<usize>,
        init_calls: usize,
    }

    impl DeviceBackend for CountingDevices {
        fn device_count(&self) -> usize {
            self.count
        }

        fn set_device(&mut self, local_rank: usize) -> Result<()> {
            self.set_device.push(local_rank);
            Ok(())
        }

        fn init_process_group(&mut self, _params: &DistributedParams) -> Result<()> {
            self.init_calls += 1;
            Ok(())
        }
    }

    fn params(local_rank: Option<usize>, world_size: usize) -> DistributedParams {
        DistributedParams {
            local_rank,
            rank: local_rank,
            start_rank: 0,
            world_size,
            master_addr: "127.0.0.1".into(),
            master_port: 29500,
        }
    }

    fn launcher(count: usize) -> Launcher<CountingDevices> {
        let devices = CountingDevices {
            count,
            ..Default::default()
        };
        // Never spawned by these tests.
        let entry = EntryPoint::new("/nonexistent/worker", Vec::<String>::new());
        Launcher::new(LauncherConfig::default(), devices, entry)
    }

    #[test]
    fn not_distributed_runs_once_in_process() {
        let mut launcher = launcher(4);
        let calls = Cell::new(0);

        for world_size in [1, 8] {
            let launch = launcher
                .run(false, &params(None, world_size), || calls.set(calls.get() + 1))
                .unwrap();
            assert_eq!(launch, Launch::Local(()));
        }

        assert_eq!(calls.get(), 2);
        assert!(launcher.devices().set_device.is_empty());
        assert_eq!(launcher.devices().init_calls, 0);
    }

    #[test]
    fn single_process_world_runs_in_process() {
        let mut launcher = launcher(4);
        let launch = launcher.run(true, &params(None, 1), || 42).unwrap();

        assert_eq!(launch, Launch::Local(42));
        assert_eq!(launcher.devices().init_calls, 0);
    }

    #[test]
    fn spawned_worker_binds_device_then_runs() {
        let mut launcher = launcher(4);
        let calls = Cell::new(0);

        let launch = launcher
            .run(true, &params(Some(3), 4), || calls.set(calls.get() + 1))
            .unwrap();

        assert_eq!(launch, Launch::Local(()));
        assert_eq!(calls.get(), 1);
        assert_eq!(launcher.devices().set_device, vec![3]);
        assert_eq!(launcher.devices().init_calls, 1);
    }

    #[test]
    fn device_failure_skips_worker() {
        struct NoDevices;

        impl DeviceBackend for NoDevices {
            fn device_count(&self) -> usize {
                0
            }

            fn set_device(&mut self, local_rank: usize) -> Result<()> {
                Err(LaunchErr::Device {
                    local_rank,
                    msg: "no devices".into(),
                })
            }

            fn init_process_group(&mut self, _params: &DistributedParams) -> Result<()> {
                unreachable!("init after failed set_device")
            }
        }

        let entry = EntryPoint::new("/nonexistent/worker", Vec::<String>::new());
        let mut launcher = Launcher::new(LauncherConfig::default(), NoDevices, entry);
        let calls = Cell::new(0);

        let res = launcher.run(true, &params(Some(0), 2), || calls.set(calls.get() + 1));

        assert!(matches!(res, Err(LaunchErr::Device { local_rank: 0, .. })));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn zero_devices_spawn_nothing() {
        let mut launcher = launcher(0);
        let calls = Cell::new(0);

        let launch = launcher
            .run(true, &params(None, 2), || calls.set(calls.get() + 1))
            .unwrap();

        assert_eq!(launch, Launch::Spawned { workers: 0 });
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn spawn_failure_is_reported_with_rank() {
        let mut launcher = launcher(2);
        let res = launcher.run(true, &params(None, 2), || ());

        assert!(matches!(res, Err(LaunchErr::Spawn { local_rank: 0, .. })));
    }
}
