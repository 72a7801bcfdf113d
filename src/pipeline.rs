//! Measurement pipeline: simulate, convert, estimate power, scrape.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use log::{debug, warn};

use crate::{
    config::{Configuration, ExplorerConfig, ToolCommand, Workload},
    error::{ExploreError, Result},
    metrics::TrialResult,
    report::{PowerReport, StatsReport},
};

/// Objective function of the drivers.
///
/// `Ok` carries a measured or unmeasurable result; `Err` is reserved for
/// conditions that make every later evaluation pointless as well.
pub trait Evaluator {
    fn evaluate(
        &mut self,
        workload: &Workload,
        candidate: &Configuration,
        tag: &str,
    ) -> Result<TrialResult>;
}

/// Simulation without power estimation. `None` when the simulator left no usable statistics.
pub trait Profiler {
    fn profile(
        &mut self,
        workload: &Workload,
        candidate: &Configuration,
        tag: &str,
    ) -> Result<Option<StatsReport>>;
}

const STATS_FILE: &str = "stats.txt";
const CONFIG_DUMP: &str = "config.json";
const POWER_INPUT: &str = "config.xml";
const POWER_REPORT: &str = "power_report.txt";
const SIMULATOR_LOG: &str = "simulator.log";

/// Runs the external simulator, converter and power tool for each candidate,
/// each trial inside its own directory under the output root.
pub struct ToolchainEvaluator<'a> {
    config: &'a ExplorerConfig,
}

impl<'a> ToolchainEvaluator<'a> {
    pub fn new(config: &'a ExplorerConfig) -> Self {
        Self { config }
    }

    pub fn trial_dir(&self, tag: &str) -> PathBuf {
        self.config.output_dir.join(tag)
    }

    // Tools run from `working_dir`, so they are handed an absolute trial path.
    fn create_trial_dir(&self, tag: &str) -> Result<PathBuf> {
        let dir = self.trial_dir(tag);
        fs::create_dir_all(&dir).map_err(|e| ExploreError::io(&dir, e))?;
        fs::canonicalize(&dir).map_err(|e| ExploreError::io(&dir, e))
    }

    fn tool(&self, command: &ToolCommand) -> Command {
        let mut cmd = command.command();
        cmd.current_dir(&self.config.tools.working_dir);
        cmd
    }

    fn run_tools(&self, workload: &Workload, candidate: &Configuration, dir: &Path) -> Result<Step> {
        if let failed @ Step::Failed(_) = self.simulate(workload, candidate, dir)? {
            return Ok(failed);
        }
        if let failed @ Step::Failed(_) = self.convert(dir)? {
            return Ok(failed);
        }
        self.estimate_power(dir)
    }

    fn simulate(&self, workload: &Workload, candidate: &Configuration, dir: &Path) -> Result<Step> {
        let log_path = dir.join(SIMULATOR_LOG);
        let log = File::create(&log_path).map_err(|e| ExploreError::io(&log_path, e))?;
        let log_err = log.try_clone().map_err(|e| ExploreError::io(&log_path, e))?;

        let tools = &self.config.tools;
        let mut cmd = self.tool(&tools.simulator);
        cmd.arg(format!("--outdir={}", dir.display()))
            .arg(&tools.simulator_script)
            .arg("-c")
            .arg(&workload.binary)
            .arg("-o")
            .arg(&workload.args)
            .args(candidate.simulator_args())
            .stdout(log)
            .stderr(log_err);
        let status = spawn_status("simulator", &tools.simulator, &mut cmd)?;
        if !status.success() {
            return Ok(Step::Failed(format!(
                "simulator exited with {status} (see {})",
                log_path.display()
            )));
        }

        for artifact in [STATS_FILE, CONFIG_DUMP] {
            if !dir.join(artifact).is_file() {
                return Ok(Step::Failed(format!(
                    "simulator produced no {artifact} in {}",
                    dir.display()
                )));
            }
        }
        Ok(Step::Done)
    }

    fn convert(&self, dir: &Path) -> Result<Step> {
        let tools = &self.config.tools;
        let xml = dir.join(POWER_INPUT);
        let mut cmd = self.tool(&tools.converter);
        cmd.arg(dir.join(STATS_FILE))
            .arg(dir.join(CONFIG_DUMP))
            .arg(&tools.power_template);
        let output = run_captured("converter", &tools.converter, &mut cmd)?;
        if !output.status.success() {
            return Ok(Step::Failed(failure_note("converter", &output)));
        }

        // Converters either print the XML or drop it in their working directory
        // next to their progress output. A dropped file wins.
        let dropped = tools.working_dir.join(POWER_INPUT);
        if dropped.is_file() {
            debug!("converter wrote {}", dropped.display());
            fs::rename(&dropped, &xml).map_err(|e| ExploreError::io(&dropped, e))?;
        } else if !output.stdout.is_empty() {
            debug!("converter printed the power-model input");
            fs::write(&xml, &output.stdout).map_err(|e| ExploreError::io(&xml, e))?;
        }
        if !xml.is_file() {
            return Ok(Step::Failed("converter produced no power-model input".to_string()));
        }
        Ok(Step::Done)
    }

    fn estimate_power(&self, dir: &Path) -> Result<Step> {
        let tools = &self.config.tools;
        let mut cmd = self.tool(&tools.power_tool);
        cmd.arg("-infile")
            .arg(dir.join(POWER_INPUT))
            .arg("-print_level")
            .arg("1");
        let output = run_captured("power tool", &tools.power_tool, &mut cmd)?;

        let report = dir.join(POWER_REPORT);
        fs::write(&report, &output.stdout).map_err(|e| ExploreError::io(&report, e))?;
        if !output.status.success() {
            return Ok(Step::Failed(failure_note("power tool", &output)));
        }
        Ok(Step::Done)
    }
}

impl Evaluator for ToolchainEvaluator<'_> {
    fn evaluate(
        &mut self,
        workload: &Workload,
        candidate: &Configuration,
        tag: &str,
    ) -> Result<TrialResult> {
        let dir = self.create_trial_dir(tag)?;
        if let Step::Failed(reason) = self.run_tools(workload, candidate, &dir)? {
            warn!("{tag}: {reason}");
            return Ok(TrialResult::unmeasurable(reason));
        }

        let stats = StatsReport::load(dir.join(STATS_FILE))?;
        if let Some(seconds) = stats.sim_seconds {
            debug!("{tag}: {seconds} s simulated");
        }
        let power = PowerReport::load(dir.join(POWER_REPORT))?;
        let result = TrialResult::from_reports(&stats, &power);
        if let Some(reason) = result.failure() {
            warn!("{tag}: {reason}");
        }
        Ok(result)
    }
}

impl Profiler for ToolchainEvaluator<'_> {
    fn profile(
        &mut self,
        workload: &Workload,
        candidate: &Configuration,
        tag: &str,
    ) -> Result<Option<StatsReport>> {
        let dir = self.create_trial_dir(tag)?;
        if let Step::Failed(reason) = self.simulate(workload, candidate, &dir)? {
            warn!("{tag}: {reason}");
            return Ok(None);
        }
        StatsReport::load(dir.join(STATS_FILE)).map(Some)
    }
}

enum Step {
    Done,
    Failed(String),
}

fn spawn_status(
    tool: &'static str,
    command: &ToolCommand,
    cmd: &mut Command,
) -> Result<std::process::ExitStatus> {
    debug!("{tool}: {cmd:?}");
    cmd.status().map_err(|source| launch_error(tool, command, source))
}

fn run_captured(tool: &'static str, command: &ToolCommand, cmd: &mut Command) -> Result<Output> {
    debug!("{tool}: {cmd:?}");
    cmd.stdin(Stdio::null())
        .output()
        .map_err(|source| launch_error(tool, command, source))
}

fn launch_error(tool: &'static str, command: &ToolCommand, source: io::Error) -> ExploreError {
    ExploreError::ToolLaunch {
        tool,
        program: command.program.clone(),
        source,
    }
}

fn failure_note(tool: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
    match last {
        Some(line) => format!("{tool} exited with {}: {}", output.status, line.trim()),
        None => format!("{tool} exited with {}", output.status),
    }
}
