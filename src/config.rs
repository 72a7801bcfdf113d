use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    path::{Path, PathBuf},
    process::Command,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::{ExploreError, Result};

/// Declaration order is the order configurations are labelled and passed to the simulator in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parameter {
    L1iSize,
    L1dSize,
    L2Size,
    FetchWidth,
    CommitWidth,
    BranchPredictorType,
    L1iAssoc,
    L1dAssoc,
    L2Assoc,
    RobEntries,
    IssueWidth,
    DecodeWidth,
}

impl Parameter {
    pub const ALL: [Parameter; 12] = [
        Parameter::L1iSize,
        Parameter::L1dSize,
        Parameter::L2Size,
        Parameter::FetchWidth,
        Parameter::CommitWidth,
        Parameter::BranchPredictorType,
        Parameter::L1iAssoc,
        Parameter::L1dAssoc,
        Parameter::L2Assoc,
        Parameter::RobEntries,
        Parameter::IssueWidth,
        Parameter::DecodeWidth,
    ];

    /// Name of the simulator option, also used as the key in config files and the ledger.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::L1iSize => "l1i_size",
            Parameter::L1dSize => "l1d_size",
            Parameter::L2Size => "l2_size",
            Parameter::FetchWidth => "fetch_width",
            Parameter::CommitWidth => "commit_width",
            Parameter::BranchPredictorType => "branch_predictor_type",
            Parameter::L1iAssoc => "l1i_assoc",
            Parameter::L1dAssoc => "l1d_assoc",
            Parameter::L2Assoc => "l2_assoc",
            Parameter::RobEntries => "rob_entries",
            Parameter::IssueWidth => "issue_width",
            Parameter::DecodeWidth => "decode_width",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Parameter {
    type Err = ExploreError;

    fn from_str(s: &str) -> Result<Self> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ExploreError::config(format!("unknown parameter '{s}'")))
    }
}

impl TryFrom<String> for Parameter {
    type Error = ExploreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Parameter> for String {
    fn from(value: Parameter) -> Self {
        value.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<Parameter, ParamValue>);

impl Configuration {
    pub fn get(&self, parameter: Parameter) -> Option<&ParamValue> {
        self.0.get(&parameter)
    }

    pub fn set(&mut self, parameter: Parameter, value: ParamValue) {
        self.0.insert(parameter, value);
    }

    pub fn with(&self, parameter: Parameter, value: ParamValue) -> Self {
        let mut next = self.clone();
        next.set(parameter, value);
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &ParamValue)> {
        self.0.iter().map(|(p, v)| (*p, v))
    }

    /// `l1i_size64kB_l1d_size64kB_...`, used to name trial directories.
    pub fn label(&self) -> String {
        self.iter()
            .map(|(p, v)| format!("{p}{v}"))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// `--l1i_size=64kB --fetch_width=4 ...` overrides for the simulator script.
    pub fn simulator_args(&self) -> Vec<String> {
        self.iter().map(|(p, v)| format!("--{p}={v}")).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<(Parameter, ParamValue)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (Parameter, ParamValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    #[serde(rename = "name")]
    pub parameter: Parameter,
    pub values: Vec<ParamValue>,
}

impl Axis {
    pub fn new(parameter: Parameter, values: impl IntoIterator<Item = ParamValue>) -> Self {
        Self {
            parameter,
            values: values.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace(Vec<Axis>);

impl ParameterSpace {
    pub fn axes(&self) -> &[Axis] {
        &self.0
    }

    pub fn point_count(&self) -> usize {
        self.0.iter().map(|axis| axis.values.len()).product()
    }
}

impl From<Vec<Axis>> for ParameterSpace {
    fn from(axes: Vec<Axis>) -> Self {
        Self(axes)
    }
}

impl Default for ParameterSpace {
    fn default() -> Self {
        let sizes = |vals: &[&str]| vals.iter().map(|&v| ParamValue::from(v)).collect::<Vec<_>>();
        let ints = |vals: &[i64]| vals.iter().map(|&v| ParamValue::from(v)).collect::<Vec<_>>();
        Self(vec![
            Axis::new(Parameter::L1iSize, sizes(&["32kB", "64kB", "128kB"])),
            Axis::new(Parameter::L1dSize, sizes(&["32kB", "64kB", "128kB"])),
            Axis::new(Parameter::L2Size, sizes(&["256kB", "512kB", "1MB"])),
            Axis::new(Parameter::FetchWidth, ints(&[2, 4, 6])),
            Axis::new(Parameter::CommitWidth, ints(&[2, 4, 6])),
            Axis::new(Parameter::BranchPredictorType, ints(&[7, 10])),
        ])
    }
}

/// An external program plus the arguments that always precede ours
/// (`python3 convert.py`, `sh wrapper.sh`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub simulator: ToolCommand,
    pub simulator_script: PathBuf,
    pub converter: ToolCommand,
    pub power_tool: ToolCommand,
    pub power_template: PathBuf,
    /// Every tool is launched from here; relative tool and workload paths resolve against it.
    pub working_dir: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            simulator: ToolCommand::new("./build/ARM/gem5.fast"),
            simulator_script: PathBuf::from("scripts/CortexA76_scripts_gem5/CortexA76.py"),
            converter: ToolCommand::with_args("python3", &["McPAT/gem5toMcPAT_cortexA76.py"]),
            power_tool: ToolCommand::new("./mcpat/mcpat"),
            power_template: PathBuf::from("McPAT/ARM_A76_2.1GHz.xml"),
            working_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub args: String, // passed to the simulator as one `-o` argument
}

impl Workload {
    pub fn new(name: &str, binary: &str, args: &str) -> Self {
        Self {
            name: name.to_string(),
            binary: PathBuf::from(binary),
            args: args.to_string(),
        }
    }

    /// Leading part of the name, `h264` for `h264_enc`.
    pub fn group(&self) -> &str {
        self.name.split('_').next().unwrap_or(&self.name)
    }
}

fn default_workloads() -> Vec<Workload> {
    let codec = |name: &str, input: &str, output: &str| {
        Workload::new(
            name,
            &format!("workloads/{name}/{}", binary_name(name)),
            &format!("-i workloads/{name}/{input} -o {output}"),
        )
    };
    vec![
        codec("jpeg2k_dec", "jpg2kdec_testfile.j2k", "image.pgm"),
        codec("jpeg2k_enc", "jpg2kenc_testfile.ppm", "compressed.j2k"),
        codec("mp3_enc", "sample.wav", "out.mp3"),
        codec("mp3_dec", "sample.mp3", "out.wav"),
        codec("h264_enc", "sample.yuv", "out.h264"),
        codec("h264_dec", "sample.h264", "out.yuv"),
    ]
}

// jpeg2k binaries are installed as jpg2k_*.
fn binary_name(workload: &str) -> String {
    workload.replacen("jpeg2k", "jpg2k", 1)
}

/// A named set of overrides applied on top of the baseline for profiling runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub settings: Configuration,
}

impl Profile {
    pub fn configuration(&self, baseline: &Configuration) -> Configuration {
        let mut configuration = baseline.clone();
        for (parameter, value) in self.settings.iter() {
            configuration.set(parameter, value.clone());
        }
        configuration
    }
}

fn default_profiles() -> Vec<Profile> {
    let profile = |name: &str, cache: [&str; 3], rob: i64, issue: i64| Profile {
        name: name.to_string(),
        settings: [
            (Parameter::L1iSize, ParamValue::from(cache[0])),
            (Parameter::L1dSize, ParamValue::from(cache[1])),
            (Parameter::L2Size, ParamValue::from(cache[2])),
            (Parameter::RobEntries, ParamValue::Int(rob)),
            (Parameter::IssueWidth, ParamValue::Int(issue)),
        ]
        .into_iter()
        .collect(),
    };
    vec![
        profile("small", ["32kB", "32kB", "256kB"], 64, 2),
        profile("medium", ["64kB", "64kB", "512kB"], 128, 4),
        profile("large", ["128kB", "128kB", "1MB"], 192, 6),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Root for trial directories and every CSV the explorer writes.
    pub output_dir: PathBuf,
    pub tools: Tools,
    pub workloads: Vec<Workload>, // the first one is the greedy default
    pub baseline: Configuration,
    pub parameters: ParameterSpace,
    pub profiles: Vec<Profile>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let baseline = [
            (Parameter::L1iSize, ParamValue::from("64kB")),
            (Parameter::L1dSize, ParamValue::from("64kB")),
            (Parameter::L2Size, ParamValue::from("512kB")),
            (Parameter::FetchWidth, ParamValue::Int(4)),
            (Parameter::CommitWidth, ParamValue::Int(4)),
            (Parameter::BranchPredictorType, ParamValue::Int(10)),
        ]
        .into_iter()
        .collect();
        Self {
            output_dir: PathBuf::from("greedy_results"),
            tools: Tools::default(),
            workloads: default_workloads(),
            baseline,
            parameters: ParameterSpace::default(),
            profiles: default_profiles(),
        }
    }
}

impl ExplorerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ExploreError::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ExploreError::config(format!("cannot render configuration: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for axis in self.parameters.axes() {
            if !seen.insert(axis.parameter) {
                return Err(ExploreError::config(format!(
                    "parameter '{}' has more than one axis",
                    axis.parameter
                )));
            }
            if axis.values.is_empty() {
                return Err(ExploreError::config(format!(
                    "parameter '{}' has no candidate values",
                    axis.parameter
                )));
            }
            if self.baseline.get(axis.parameter).is_none() {
                return Err(ExploreError::config(format!(
                    "parameter '{}' is explored but missing from the baseline",
                    axis.parameter
                )));
            }
            let mut values = HashSet::new();
            if let Some(dup) = axis.values.iter().find(|v| !values.insert(*v)) {
                return Err(ExploreError::config(format!(
                    "parameter '{}' lists value '{dup}' twice",
                    axis.parameter
                )));
            }
        }

        if self.workloads.is_empty() {
            return Err(ExploreError::config("no workloads configured"));
        }
        unique_names("workload", self.workloads.iter().map(|w| w.name.as_str()))?;
        unique_names("profile", self.profiles.iter().map(|p| p.name.as_str()))?;
        Ok(())
    }

    pub fn workload(&self, name: Option<&str>) -> Result<&Workload> {
        match name {
            Some(name) => self.find_workload(name),
            None => self
                .workloads
                .first()
                .ok_or_else(|| ExploreError::config("no workloads configured")),
        }
    }

    /// The named workloads in the given order, or all of them when `names` is empty.
    pub fn select_workloads(&self, names: &[String]) -> Result<Vec<&Workload>> {
        if names.is_empty() {
            return Ok(self.workloads.iter().collect());
        }
        names.iter().map(|name| self.find_workload(name)).collect()
    }

    fn find_workload(&self, name: &str) -> Result<&Workload> {
        self.workloads
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| ExploreError::config(format!("unknown workload '{name}'")))
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.csv")
    }

    pub fn sweep_results_path(&self) -> PathBuf {
        self.output_dir.join("dse_results.csv")
    }

    pub fn profiling_path(&self) -> PathBuf {
        self.output_dir.join("profiling.csv")
    }
}

fn unique_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ExploreError::config(format!("{kind} without a name")));
        }
        if !seen.insert(name) {
            return Err(ExploreError::config(format!("{kind} '{name}' is defined twice")));
        }
    }
    Ok(())
}
