use std::{collections::HashMap, env, ops::Range, str::FromStr};

use rand::Rng;

use super::{LaunchErr, LauncherConfig, Result};

pub const LOCAL_RANK: &str = "LOCAL_RANK";
pub const RANK: &str = "RANK";
pub const WORLD_SIZE: &str = "WORLD_SIZE";
pub const MASTER_ADDR: &str = "MASTER_ADDR";
pub const MASTER_PORT: &str = "MASTER_PORT";
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

const SLURM_JOB_ID: &str = "SLURM_JOB_ID";
const SLURM_NODEID: &str = "SLURM_NODEID";
const SLURM_JOB_NUM_NODES: &str = "SLURM_JOB_NUM_NODES";
const SLURM_JOB_NODELIST: &str = "SLURM_JOB_NODELIST";

/// A read-only view of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Distributed layout of the current process, resolved once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedParams {
    /// Set when this process is itself a spawned worker.
    pub local_rank: Option<usize>,
    pub rank: Option<usize>,
    /// Global rank of this node's first worker.
    pub start_rank: usize,
    pub world_size: usize,
    pub master_addr: String,
    pub master_port: u16,
}

impl DistributedParams {
    /// Resolves the distributed parameters of this process.
    ///
    /// # Args
    /// * `env` - Where to read the variables from.
    /// * `device_count` - Devices visible to this node.
    /// * `config` - Fallbacks for the rendezvous address.
    ///
    /// # Returns
    /// The resolved parameters, or `LaunchErr::InvalidParams` if a variable holds
    /// garbage or no port can be drawn from `config.master_port_range`.
    pub fn resolve<E: EnvSource>(
        env: &E,
        device_count: usize,
        config: &LauncherConfig,
    ) -> Result<Self> {
        let (cur_node, num_nodes, slurm_addr) = match env.var(SLURM_JOB_ID) {
            Some(_) => {
                let cur_node = parse_var(env, SLURM_NODEID)?.unwrap_or(0);
                let num_nodes = parse_var(env, SLURM_JOB_NUM_NODES)?.unwrap_or(1);
                let addr = env
                    .var(SLURM_JOB_NODELIST)
                    .and_then(|nodes| first_slurm_host(&nodes));
                (cur_node, num_nodes, addr)
            }
            None => (0, 1, None),
        };

        let master_addr = env
            .var(MASTER_ADDR)
            .or(slurm_addr)
            .unwrap_or_else(|| config.master_addr.clone());

        let master_port = match parse_var(env, MASTER_PORT)? {
            Some(port) => port,
            None => default_port(env.var(SLURM_JOB_ID).as_deref(), &config.master_port_range)?,
        };

        let world_size = parse_var(env, WORLD_SIZE)?.unwrap_or(num_nodes * device_count);

        Ok(Self {
            local_rank: parse_var(env, LOCAL_RANK)?,
            rank: parse_var(env, RANK)?,
            start_rank: cur_node * device_count,
            world_size,
            master_addr,
            master_port,
        })
    }

    /// Returns the global rank of this process.
    ///
    /// Falls back to `start_rank + local_rank` when `RANK` was not given.
    pub fn global_rank(&self) -> Option<usize> {
        self.rank
            .or_else(|| self.local_rank.map(|local_rank| self.start_rank + local_rank))
    }

    /// Builds the variables that turn a child process into worker `local_rank`.
    ///
    /// # Args
    /// * `local_rank` - The worker's index on this node.
    /// * `pinned_device` - When given, the child only sees this device and becomes local rank 0.
    ///
    /// # Returns
    /// The variables to add on top of the inherited environment.
    pub fn worker_env(
        &self,
        local_rank: usize,
        pinned_device: Option<&str>,
    ) -> HashMap<String, String> {
        let rank = self.start_rank + local_rank;
        let mut vars = HashMap::from([
            (RANK.to_string(), rank.to_string()),
            (WORLD_SIZE.to_string(), self.world_size.to_string()),
            (LOCAL_RANK.to_string(), local_rank.to_string()),
            (MASTER_ADDR.to_string(), self.master_addr.clone()),
            (MASTER_PORT.to_string(), self.master_port.to_string()),
        ]);

        if let Some(device) = pinned_device {
            vars.insert(LOCAL_RANK.to_string(), "0".to_string());
            vars.insert(CUDA_VISIBLE_DEVICES.to_string(), device.to_string());
        }

        vars
    }
}

/// Picks `MASTER_PORT` when the environment has none.
///
/// Every node of a SLURM job derives the same port from the job id, a single
/// node draws one at random.
fn default_port(slurm_job_id: Option<&str>, range: &Range<u16>) -> Result<u16> {
    if range.is_empty() {
        return Err(LaunchErr::InvalidParams {
            var: MASTER_PORT,
            value: format!("empty port range {range:?}"),
        });
    }

    let port = match slurm_job_id {
        Some(job_id) => {
            let span = u64::from(range.end - range.start);
            let hash = job_id
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
            // hash % span < span <= u16::MAX
            range.start + (hash % span) as u16
        }
        None => rand::rng().random_range(range.clone()),
    };

    Ok(port)
}

fn parse_var<E, T>(env: &E, var: &'static str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
{
    let Some(value) = env.var(var) else {
        return Ok(None);
    };

    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| LaunchErr::InvalidParams { var, value })
}

/// Expands the first host of a compressed SLURM node list, e.g. `gpu[03-05,09],cpu1` -> `gpu03`.
fn first_slurm_host(nodelist: &str) -> Option<String> {
    let mut depth = 0usize;
    let end = nodelist
        .char_indices()
        .find_map(|(i, c)| {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => return Some(i),
                _ => {}
            }
            None
        })
        .unwrap_or(nodelist.len());

    let entry = nodelist[..end].trim();
    if entry.is_empty() {
        return None;
    }

    let Some((prefix, rest)) = entry.split_once('[') else {
        return Some(entry.to_string());
    };
    let (ranges, suffix) = rest.split_once(']').unwrap_or((rest, ""));
    let first = ranges.split(',').next()?.split('-').next()?;

    Some(format!("{prefix}{first}{suffix}"))
}
