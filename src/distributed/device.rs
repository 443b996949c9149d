use std::{process::Command, time::Duration};

use log::{debug, info};
use tokio::runtime;

use super::{
    CUDA_VISIBLE_DEVICES, DistributedParams, EnvSource, LaunchErr, ProcessGroup, Result,
    rendezvous,
};

/// Access to the accelerators of this host and to the collective backend.
pub trait DeviceBackend {
    /// Number of devices this process may use.
    fn device_count(&self) -> usize;

    /// The label a child process should see for device `index`.
    fn device_label(&self, index: usize) -> String {
        index.to_string()
    }

    /// Binds the current process to device `local_rank`.
    fn set_device(&mut self, local_rank: usize) -> Result<()>;

    /// Initializes the process group this process belongs to.
    fn init_process_group(&mut self, params: &DistributedParams) -> Result<()>;
}

/// Devices discovered on the local host.
///
/// `init_process_group` performs the TCP rendezvous and keeps its result.
#[derive(Debug)]
pub struct HostDevices {
    labels: Vec<String>,
    rendezvous_timeout: Duration,
    current: Option<usize>,
    group: Option<ProcessGroup>,
}

impl HostDevices {
    /// Creates a backend over an explicit list of device labels.
    pub fn new(labels: Vec<String>, rendezvous_timeout: Duration) -> Self {
        Self {
            labels,
            rendezvous_timeout,
            current: None,
            group: None,
        }
    }

    /// Discovers the devices visible to this process.
    ///
    /// `CUDA_VISIBLE_DEVICES` wins when set, otherwise `nvidia-smi -L` is asked.
    /// No driver means no devices.
    pub fn discover<E: EnvSource>(env: &E, rendezvous_timeout: Duration) -> Self {
        let labels = match env.var(CUDA_VISIBLE_DEVICES) {
            Some(visible) => parse_visible_devices(&visible),
            None => query_nvidia_smi(),
        };

        info!("discovered {} device(s): {labels:?}", labels.len());
        Self::new(labels, rendezvous_timeout)
    }

    /// Returns the device this process is bound to.
    pub fn current_device(&self) -> Option<usize> {
        self.current
    }

    /// Returns the process group once initialized.
    pub fn process_group(&self) -> Option<ProcessGroup> {
        self.group
    }
}

impl DeviceBackend for HostDevices {
    fn device_count(&self) -> usize {
        self.labels.len()
    }

    fn device_label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    fn set_device(&mut self, local_rank: usize) -> Result<()> {
        if local_rank >= self.labels.len() {
            return Err(LaunchErr::Device {
                local_rank,
                msg: format!("only {} device(s) are visible", self.labels.len()),
            });
        }

        debug!(local_rank = local_rank; "binding to device {}", self.labels[local_rank]);
        self.current = Some(local_rank);
        Ok(())
    }

    fn init_process_group(&mut self, params: &DistributedParams) -> Result<()> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let group = runtime.block_on(rendezvous::rendezvous(params, self.rendezvous_timeout))?;

        info!(rank = group.rank, world_size = group.world_size; "process group ready");
        self.group = Some(group);
        Ok(())
    }
}

fn parse_visible_devices(visible: &str) -> Vec<String> {
    visible
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn query_nvidia_smi() -> Vec<String> {
    let Ok(output) = Command::new("nvidia-smi").arg("-L").output() else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    let count = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.starts_with("GPU "))
        .count();

    (0..count).map(|i| i.to_string()).collect()
}
