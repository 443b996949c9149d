use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use catalyst::{
    demo,
    dict::Dict,
    distributed::{
        DeviceBackend, DistributedParams, EntryPoint, HostDevices, Launch, Launcher,
        LauncherConfig, ProcessEnv,
    },
    plugin::PluginRegistry,
    snapshot::{DEFAULT_SOURCE_EXTENSIONS, dump_base_experiment_code},
};
use log::{debug, info};

const USAGE: &str =
    "usage: catalyst-run [--distributed] [--logdir DIR] [--launcher-config FILE] EXPDIR";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, PartialEq, Eq)]
struct Args {
    distributed: bool,
    logdir: Option<PathBuf>,
    launcher_config: Option<PathBuf>,
    expdir: PathBuf,
}

impl Args {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut args = args.into_iter();
        let mut distributed = false;
        let mut logdir: Option<PathBuf> = None;
        let mut launcher_config: Option<PathBuf> = None;
        let mut expdir = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--distributed" => distributed = true,
                "--logdir" => logdir = Some(args.next().context(USAGE)?.into()),
                "--launcher-config" => launcher_config = Some(args.next().context(USAGE)?.into()),
                flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
                _ if expdir.is_some() => bail!("more than one experiment directory\n{USAGE}"),
                path => expdir = Some(PathBuf::from(path)),
            }
        }

        Ok(Self {
            distributed,
            logdir,
            launcher_config,
            expdir: expdir.context(USAGE)?,
        })
    }
}

/// Reads `expdir/config.json` when present.
fn read_experiment_config(expdir: &Path) -> Result<Dict> {
    let path = expdir.join(CONFIG_FILE);
    if !path.exists() {
        debug!("no {} found, using defaults", path.display());
        return Ok(Dict::new());
    }

    let content =
        fs::read_to_string(&path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse(env::args().skip(1))?;

    let config = match &args.launcher_config {
        Some(path) => LauncherConfig::from_json_file(path)?,
        None => LauncherConfig::default(),
    };
    let devices = HostDevices::discover(&ProcessEnv, config.rendezvous_timeout());
    let params = DistributedParams::resolve(&ProcessEnv, devices.device_count(), &config)?;

    let mut registry = PluginRegistry::new();
    demo::register(&mut registry)?;
    let (experiment, runner) = registry.import_experiment_and_runner(&args.expdir)?;

    let experiment = experiment(demo::merged_config(&read_experiment_config(&args.expdir)?))?;
    let mut runner = runner();

    // Spawned workers re-run this binary, only the first node's launcher snapshots.
    if let Some(logdir) = &args.logdir
        && params.local_rank.is_none()
        && params.start_rank == 0
    {
        dump_base_experiment_code(&args.expdir, logdir, DEFAULT_SOURCE_EXTENSIONS)?;
    }

    let mut launcher = Launcher::new(config, devices, EntryPoint::current()?);
    match launcher.run(args.distributed, &params, || {
        runner.run_experiment(experiment.as_ref())
    })? {
        Launch::Local(outcome) => outcome?,
        Launch::Spawned { workers } => info!("all {workers} worker(s) finished"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn parses_flags_in_any_order() {
        let args = parse(&["--logdir", "logs", "exp", "--distributed"]).unwrap();
        assert_eq!(
            args,
            Args {
                distributed: true,
                logdir: Some("logs".into()),
                launcher_config: None,
                expdir: "exp".into(),
            }
        );
    }

    #[test]
    fn rejects_bad_command_lines() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["exp", "other"]).is_err());
        assert!(parse(&["--logdir"]).is_err());
        assert!(parse(&["--verbose", "exp"]).is_err());
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_experiment_config(dir.path()).unwrap().is_empty());

        fs::write(dir.path().join(CONFIG_FILE), r#"{"seed": 3}"#).unwrap();
        assert_eq!(read_experiment_config(dir.path()).unwrap()["seed"], 3);

        fs::write(dir.path().join(CONFIG_FILE), "[1, 2]").unwrap();
        assert!(read_experiment_config(dir.path()).is_err());
    }
}
