//! Workload characterisation: every workload under a few named configurations,
//! simulator only, then a ranking of workload groups by how much a design-space
//! exploration is likely to move them.

use std::{fmt, io::Write, path::Path};

use log::{info, warn};

use crate::{
    config::{Configuration, Parameter, Profile, Workload},
    error::Result,
    pipeline::Profiler,
    report::StatsReport,
};

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub workload: String,
    pub group: String, // codec, `mp3` for `mp3_dec`
    pub profile: String,
    pub tag: String,
    pub configuration: Configuration,
    pub stats: StatsReport,
}

/// Workloads whose binary is present under `working_dir`, in configured order.
pub fn available<'a>(workloads: &[&'a Workload], working_dir: &Path) -> Vec<&'a Workload> {
    workloads
        .iter()
        .copied()
        .filter(|w| {
            let found = working_dir.join(&w.binary).is_file();
            if !found {
                warn!("{}: binary {} not found, skipped", w.name, w.binary.display());
            }
            found
        })
        .collect()
}

/// Simulates every workload under every profile. Simulations that fail are left out.
pub fn run_profiling<P: Profiler>(
    workloads: &[&Workload],
    profiles: &[Profile],
    baseline: &Configuration,
    profiler: &mut P,
) -> Result<Vec<ProfileRow>> {
    let total = workloads.len() * profiles.len();
    let mut rows = Vec::with_capacity(total);
    let mut done = 0;
    for workload in workloads {
        for profile in profiles {
            done += 1;
            let tag = format!("profile_{}_{}", workload.name, profile.name);
            let configuration = profile.configuration(baseline);
            info!("[{done}/{total}] {} - {}", workload.name, profile.name);

            let Some(stats) = profiler.profile(workload, &configuration, &tag)? else {
                continue;
            };
            let shares = stats.op_shares();
            info!(
                "  CPI={} integer={:.1}% fp+simd={:.1}% memory={:.1}%",
                stats.cpi.map_or_else(|| "NaN".to_string(), |c| format!("{c:.4}")),
                shares.integer(),
                shares.fp_simd(),
                shares.memory()
            );
            rows.push(ProfileRow {
                workload: workload.name.clone(),
                group: workload.group().to_string(),
                profile: profile.name.clone(),
                tag,
                configuration,
                stats,
            });
        }
    }
    Ok(rows)
}

/// One row per simulation. Parameter columns are the ones any profile overrides.
pub fn write_profiles<W: Write>(rows: &[ProfileRow], profiles: &[Profile], writer: W) -> Result<()> {
    let columns: Vec<Parameter> = Parameter::ALL
        .into_iter()
        .filter(|p| profiles.iter().any(|profile| profile.settings.get(*p).is_some()))
        .collect();

    let mut out = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = ["Workload", "Group", "Profile", "Tag"].map(String::from).into();
    header.extend(columns.iter().map(|p| p.to_string()));
    header.extend(
        [
            "CPI",
            "IPC",
            "SimSeconds",
            "CommittedInsts",
            "CommittedOps",
            "IntAluPct",
            "IntMultPct",
            "IntDivPct",
            "FloatPct",
            "SimdPct",
            "MemReadPct",
            "MemWritePct",
            "IntegerPct",
            "FpSimdPct",
            "MemoryPct",
            "BranchMispredicts",
            "L1I_MissRate",
            "L1D_MissRate",
            "L2_MissRate",
            "IntAluAccesses",
            "FpAluAccesses",
            "VecAluAccesses",
        ]
        .map(String::from),
    );
    out.write_record(&header)?;

    let number = |v: Option<f64>| v.map_or_else(|| "NaN".to_string(), |v| v.to_string());
    for row in rows {
        let s = &row.stats;
        let shares = s.op_shares();
        let mut record = vec![
            row.workload.clone(),
            row.group.clone(),
            row.profile.clone(),
            row.tag.clone(),
        ];
        record.extend(columns.iter().map(|p| {
            row.configuration
                .get(*p)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        record.extend([s.cpi, s.ipc, s.sim_seconds, s.committed_insts, s.committed_ops].map(number));
        record.extend(
            [
                shares.int_alu,
                shares.int_mult,
                shares.int_div,
                shares.float,
                shares.simd,
                shares.mem_read,
                shares.mem_write,
                shares.integer(),
                shares.fp_simd(),
                shares.memory(),
            ]
            .map(|v| v.to_string()),
        );
        record.extend(
            [
                s.branch_mispredicts,
                s.l1i_miss_rate,
                s.l1d_miss_rate,
                s.l2_miss_rate,
                s.int_alu_accesses,
                s.fp_alu_accesses,
                s.vec_alu_accesses,
            ]
            .map(number),
        );
        out.write_record(&record)?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Averages of one workload group over all its profiled runs, with a score
/// for how promising the group is as an exploration target.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupScore {
    pub group: String,
    pub avg_ipc: f64,
    pub avg_cpi: f64,
    pub ipc_range: f64, // sensitivity to the configuration
    pub integer_pct: f64,
    pub fp_simd_pct: f64,
    pub memory_pct: f64,
    pub l1d_miss_rate: f64,
    pub score: u32,
    pub reasons: Vec<String>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// First threshold (checked highest first) that `value` exceeds.
fn tier(value: f64, tiers: &[(f64, u32)]) -> Option<u32> {
    tiers
        .iter()
        .find(|(threshold, _)| value > *threshold)
        .map(|(_, points)| *points)
}

impl GroupScore {
    fn from_rows(group: &str, rows: &[&ProfileRow]) -> Self {
        let ipcs: Vec<f64> = rows.iter().filter_map(|r| r.stats.ipc).collect();
        let cpis: Vec<f64> = rows.iter().filter_map(|r| r.stats.cpi).collect();
        let shares: Vec<_> = rows.iter().map(|r| r.stats.op_shares()).collect();
        let l1d: Vec<f64> = rows.iter().filter_map(|r| r.stats.l1d_miss_rate).collect();

        let ipc_range = if ipcs.len() > 1 {
            let max = ipcs.iter().copied().fold(f64::MIN, f64::max);
            let min = ipcs.iter().copied().fold(f64::MAX, f64::min);
            max - min
        } else {
            0.0
        };

        let mut score = Self {
            group: group.to_string(),
            avg_ipc: mean(&ipcs),
            avg_cpi: mean(&cpis),
            ipc_range,
            integer_pct: mean(&shares.iter().map(|s| s.integer()).collect::<Vec<_>>()),
            fp_simd_pct: mean(&shares.iter().map(|s| s.fp_simd()).collect::<Vec<_>>()),
            memory_pct: mean(&shares.iter().map(|s| s.memory()).collect::<Vec<_>>()),
            l1d_miss_rate: mean(&l1d),
            score: 0,
            reasons: Vec::new(),
        };
        score.rate();
        score
    }

    fn rate(&mut self) {
        let mut add = |points: Option<u32>, reason: String| {
            if let Some(points) = points {
                self.score += points;
                self.reasons.push(reason);
            }
        };
        add(
            tier(self.integer_pct, &[(60.0, 4), (40.0, 3), (25.0, 2)]),
            format!("integer heavy ({:.1}%)", self.integer_pct),
        );
        add(
            tier(self.memory_pct, &[(35.0, 3), (20.0, 2)]),
            format!("memory intensive ({:.1}%)", self.memory_pct),
        );
        add(
            tier(self.fp_simd_pct, &[(25.0, 3), (15.0, 2), (5.0, 1)]),
            format!("FP/SIMD use ({:.1}%)", self.fp_simd_pct),
        );
        add(
            tier(self.l1d_miss_rate, &[(0.5, 3), (0.2, 2), (0.05, 1)]),
            format!("L1D miss rate {:.3}", self.l1d_miss_rate),
        );
        add(
            tier(self.ipc_range, &[(0.5, 3), (0.2, 2), (0.1, 1)]),
            format!("IPC range {:.3} across profiles", self.ipc_range),
        );
        let balanced = [self.integer_pct, self.fp_simd_pct, self.memory_pct]
            .iter()
            .filter(|pct| **pct > 15.0)
            .count();
        add(
            (balanced >= 2).then_some(1),
            "balanced mix of integer, FP/SIMD and memory work".to_string(),
        );
    }
}

/// Groups in order of decreasing score; equal scores keep first-seen order.
pub fn rank_groups(rows: &[ProfileRow]) -> Vec<GroupScore> {
    let mut groups: Vec<&str> = Vec::new();
    for row in rows {
        if !groups.contains(&row.group.as_str()) {
            groups.push(&row.group);
        }
    }
    let mut scores: Vec<_> = groups
        .into_iter()
        .map(|group| {
            let members: Vec<_> = rows.iter().filter(|r| r.group == group).collect();
            GroupScore::from_rows(group, &members)
        })
        .collect();
    scores.sort_by(|a, b| b.score.cmp(&a.score));
    scores
}

impl fmt::Display for GroupScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (score {})", self.group, self.score)?;
        writeln!(
            f,
            "  IPC {:.3} (range {:.3})  CPI {:.3}  L1D miss {:.4}",
            self.avg_ipc, self.ipc_range, self.avg_cpi, self.l1d_miss_rate
        )?;
        writeln!(
            f,
            "  integer {:.1}%  FP/SIMD {:.1}%  memory {:.1}%",
            self.integer_pct, self.fp_simd_pct, self.memory_pct
        )?;
        for reason in &self.reasons {
            writeln!(f, "  - {reason}")?;
        }
        Ok(())
    }
}
