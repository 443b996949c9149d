use std::{
    collections::HashMap,
    ffi::OsString,
    io,
    path::PathBuf,
};

use futures::{StreamExt, stream::FuturesUnordered};
use log::{debug, info, warn};
use tokio::{
    process::{Child, Command},
    signal,
};

use super::{LaunchErr, Result};

/// The program invocation every worker re-executes.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    program: PathBuf,
    args: Vec<OsString>,
}

impl EntryPoint {
    /// Creates an entry point from an explicit program and argument vector.
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The current executable with the arguments it was started with.
    pub fn current() -> io::Result<Self> {
        Ok(Self::new(
            std::env::current_exe()?,
            std::env::args_os().skip(1),
        ))
    }
}

/// A spawned worker process.
#[derive(Debug)]
struct WorkerProcess {
    local_rank: usize,
    rank: usize,
    child: Child,
}

/// The set of worker processes owned by a launcher.
///
/// Every worker still running when the cohort goes away is killed.
#[derive(Debug, Default)]
pub struct WorkerCohort {
    workers: Vec<WorkerProcess>,
}

impl WorkerCohort {
    /// Spawns a worker running `entry` with `vars` on top of the inherited environment.
    ///
    /// # Args
    /// * `entry` - The program to run.
    /// * `local_rank` - The worker's index on this node.
    /// * `rank` - The worker's global rank.
    /// * `vars` - Extra environment variables.
    pub fn spawn(
        &mut self,
        entry: &EntryPoint,
        local_rank: usize,
        rank: usize,
        vars: &HashMap<String, String>,
    ) -> Result<()> {
        let child = Command::new(&entry.program)
            .args(&entry.args)
            .envs(vars)
            .spawn()
            .map_err(|source| LaunchErr::Spawn { local_rank, source })?;

        debug!(
            local_rank = local_rank,
            rank = rank,
            pid = child.id().unwrap_or_default();
            "spawned worker"
        );

        self.workers.push(WorkerProcess {
            local_rank,
            rank,
            child,
        });

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits until every worker exited successfully.
    ///
    /// Returns at the first unsuccessful exit, wait failure or Ctrl-C, leaving
    /// the remaining workers running for `shutdown`.
    pub async fn join(&mut self) -> Result<()> {
        let mut pending: FuturesUnordered<_> = self
            .workers
            .iter_mut()
            .map(|worker| async move {
                let status = worker.child.wait().await;
                (worker.local_rank, worker.rank, status)
            })
            .collect();

        let interrupt = signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    None => return Ok(()),
                    Some((local_rank, rank, Ok(status))) if status.success() => {
                        debug!(local_rank = local_rank, rank = rank; "worker finished");
                    }
                    Some((local_rank, _, Ok(status))) => {
                        return Err(LaunchErr::WorkerFailed { local_rank, status });
                    }
                    Some((local_rank, _, Err(source))) => {
                        return Err(LaunchErr::Wait { local_rank, source });
                    }
                },
                Ok(()) = &mut interrupt => {
                    info!("interrupt received, stopping workers");
                    return Err(LaunchErr::Interrupted);
                }
            }
        }
    }

    /// Kills and reaps every worker that is still running.
    ///
    /// # Returns
    /// How many workers had to be killed.
    pub async fn shutdown(&mut self) -> usize {
        let mut killed = 0;

        for worker in &mut self.workers {
            if !matches!(worker.child.try_wait(), Ok(None)) {
                continue;
            }

            match worker.child.kill().await {
                Ok(()) => killed += 1,
                Err(e) => warn!("failed to kill worker {}: {e}", worker.local_rank),
            }
        }

        killed
    }
}

impl Drop for WorkerCohort {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            if matches!(worker.child.try_wait(), Ok(None)) {
                let _ = worker.child.start_kill();
            }
        }
    }
}
