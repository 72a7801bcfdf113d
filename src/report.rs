use std::{collections::HashMap, fs, path::Path, sync::LazyLock};

use regex::Regex;

use crate::error::{ExploreError, Result};

static STAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<name>[A-Za-z_][\w.:]*)\s+(?<value>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)(?:\s|$)")
        .expect("stat line pattern compiles")
});

const CPI: &[&str] = &["system.cpu.cpi"];
const IPC: &[&str] = &["system.cpu.ipc"];
const SIM_SECONDS: &[&str] = &["simSeconds", "sim_seconds"];
const L1I_MISS_RATE: &[&str] = &[
    "system.cpu.icache.overallMissRate::total",
    "system.cpu.icache.overall_miss_rate::total",
];
const L1D_MISS_RATE: &[&str] = &[
    "system.cpu.dcache.overallMissRate::total",
    "system.cpu.dcache.overall_miss_rate::total",
];
const L2_MISS_RATE: &[&str] = &[
    "system.cpu.l2cache.overallMissRate::total",
    "system.cpu.l2cache.overall_miss_rate::total",
    "system.l2cache.overallMissRate::total",
    "system.l2cache.overall_miss_rate::total",
    "system.l2.overallMissRate::total",
    "system.l2.overall_miss_rate::total",
];
const COMMITTED_INSTS: &[&str] = &["system.cpu.commitStats0.numInsts", "system.cpu.committedInsts"];
const COMMITTED_OPS: &[&str] = &["system.cpu.commitStats0.numOps", "system.cpu.committedOps"];
const BRANCH_MISPREDICTS: &[&str] = &["system.cpu.commit.branchMispredicts"];
const INT_ALU_ACCESSES: &[&str] = &["system.cpu.intAluAccesses"];
const FP_ALU_ACCESSES: &[&str] = &["system.cpu.fpAluAccesses"];
const VEC_ALU_ACCESSES: &[&str] = &["system.cpu.vecAluAccesses"];
// Committed op-class counters, `...committedInstType0IntAlu` or `...committedInstType_0::IntAlu`.
const OP_CLASS_PREFIXES: &[&str] = &[
    "system.cpu.commit.committedInstType_0::",
    "system.cpu.commit.committedInstType0",
];

/// Committed operations per class, as counted by the commit stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpMix {
    pub int_alu: f64,
    pub int_mult: f64,
    pub int_div: f64,
    pub float: f64, // every Float* class except memory accesses
    pub simd: f64,
    pub mem_read: f64,
    pub mem_write: f64,
}

impl OpMix {
    fn add(&mut self, class: &str, count: f64) {
        match class {
            "IntAlu" => self.int_alu += count,
            "IntMult" => self.int_mult += count,
            "IntDiv" => self.int_div += count,
            "MemRead" => self.mem_read += count,
            "MemWrite" => self.mem_write += count,
            c if c.starts_with("Float") && !c.ends_with("MemRead") && !c.ends_with("MemWrite") => {
                self.float += count
            }
            c if c.starts_with("Simd") => self.simd += count,
            _ => {}
        }
    }

    /// Shares in percent of `total_ops`; all zero when the total is unknown or zero.
    pub fn shares(&self, total_ops: Option<f64>) -> OpShares {
        let Some(total) = total_ops.filter(|t| *t > 0.0) else {
            return OpShares::default();
        };
        let pct = |count: f64| count / total * 100.0;
        OpShares {
            int_alu: pct(self.int_alu),
            int_mult: pct(self.int_mult),
            int_div: pct(self.int_div),
            float: pct(self.float),
            simd: pct(self.simd),
            mem_read: pct(self.mem_read),
            mem_write: pct(self.mem_write),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpShares {
    pub int_alu: f64,
    pub int_mult: f64,
    pub int_div: f64,
    pub float: f64,
    pub simd: f64,
    pub mem_read: f64,
    pub mem_write: f64,
}

impl OpShares {
    pub fn integer(&self) -> f64 {
        self.int_alu + self.int_mult + self.int_div
    }

    pub fn fp_simd(&self) -> f64 {
        self.float + self.simd
    }

    pub fn memory(&self) -> f64 {
        self.mem_read + self.mem_write
    }
}

/// Values scraped from the simulator's `stats.txt`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub cpi: Option<f64>,
    pub ipc: Option<f64>,
    pub sim_seconds: Option<f64>,
    pub l1i_miss_rate: Option<f64>,
    pub l1d_miss_rate: Option<f64>,
    pub l2_miss_rate: Option<f64>,
    pub committed_insts: Option<f64>,
    pub committed_ops: Option<f64>,
    pub op_mix: OpMix,
    pub branch_mispredicts: Option<f64>,
    pub int_alu_accesses: Option<f64>,
    pub fp_alu_accesses: Option<f64>,
    pub vec_alu_accesses: Option<f64>,
}

impl StatsReport {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ExploreError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let stats = first_values(text);
        let lookup = |names: &[&str]| names.iter().find_map(|n| stats.get(*n).copied());
        let cpi = lookup(CPI);
        // Older stat dumps carry CPI only.
        let ipc = lookup(IPC).or_else(|| cpi.filter(|c| *c != 0.0).map(|c| 1.0 / c));

        let mut op_mix = OpMix::default();
        for (name, count) in &stats {
            let class = OP_CLASS_PREFIXES
                .iter()
                .find_map(|prefix| name.strip_prefix(prefix));
            if let Some(class) = class {
                op_mix.add(class, *count);
            }
        }

        Self {
            cpi,
            ipc,
            sim_seconds: lookup(SIM_SECONDS),
            l1i_miss_rate: lookup(L1I_MISS_RATE),
            l1d_miss_rate: lookup(L1D_MISS_RATE),
            l2_miss_rate: lookup(L2_MISS_RATE),
            committed_insts: lookup(COMMITTED_INSTS),
            committed_ops: lookup(COMMITTED_OPS),
            op_mix,
            branch_mispredicts: lookup(BRANCH_MISPREDICTS),
            int_alu_accesses: lookup(INT_ALU_ACCESSES),
            fp_alu_accesses: lookup(FP_ALU_ACCESSES),
            vec_alu_accesses: lookup(VEC_ALU_ACCESSES),
        }
    }

    pub fn op_shares(&self) -> OpShares {
        self.op_mix.shares(self.committed_ops)
    }
}

/// First value of every stat in the dump. Later dumps of the same stat are ignored.
fn first_values(text: &str) -> HashMap<&str, f64> {
    let mut values = HashMap::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(caps) = STAT_LINE.captures(trimmed) else {
            continue;
        };
        let (Some(name), Some(value)) = (caps.name("name"), caps.name("value")) else {
            continue;
        };
        if let Ok(value) = value.as_str().parse::<f64>() {
            if value.is_finite() {
                values.entry(name.as_str()).or_insert(value);
            }
        }
    }
    values
}

/// Processor-level figures from the power tool's report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerReport {
    pub total_leakage: Option<f64>,
    pub runtime_dynamic: Option<f64>,
}

impl PowerReport {
    const SECTION: &'static str = "Processor:";
    const LEAKAGE: &'static str = "Total Leakage =";
    const DYNAMIC: &'static str = "Runtime Dynamic =";

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ExploreError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Reads the first `Total Leakage` and `Runtime Dynamic` lines after the
    /// `Processor:` header. Per-component sections further down repeat both
    /// labels, so the scan ends at the next `****` separator.
    pub fn parse(text: &str) -> Self {
        let mut leakage = None;
        let mut dynamic = None;
        let lines = text
            .lines()
            .skip_while(|line| !line.contains(Self::SECTION))
            .skip(1);
        for line in lines {
            if line.trim_start().starts_with('*') {
                break;
            }
            if leakage.is_none() && line.contains(Self::LEAKAGE) {
                leakage = Some(labelled_value(line));
            } else if dynamic.is_none() && line.contains(Self::DYNAMIC) {
                dynamic = Some(labelled_value(line));
            }
            if leakage.is_some() && dynamic.is_some() {
                break;
            }
        }
        Self {
            total_leakage: leakage.flatten(),
            runtime_dynamic: dynamic.flatten(),
        }
    }
}

/// `  Runtime Dynamic = 2.71 W` -> 2.71
fn labelled_value(line: &str) -> Option<f64> {
    line.split_once('=')
        .and_then(|(_, rhs)| rhs.split_whitespace().next())
        .and_then(|token| token.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}
