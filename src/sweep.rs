use std::{fmt, io::Write};

use log::info;

use crate::{
    config::{Configuration, ParameterSpace, Workload},
    error::Result,
    metrics::TrialResult,
    pipeline::Evaluator,
};

#[derive(Debug, Clone)]
pub struct SweepPoint {
    pub workload: Workload,
    pub tag: String, // Trial directory name
    pub configuration: Configuration,
}

#[derive(Debug, Clone)]
pub struct PointResult {
    pub workload: String,
    pub tag: String,
    pub configuration: Configuration,
    pub result: TrialResult,
}

impl fmt::Display for PointResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.tag, self.workload)?;
        for (parameter, value) in self.configuration.iter() {
            writeln!(f, "  {:<22} {value}", parameter.name())?;
        }
        write!(f, "  {}", self.result)
    }
}

/// Every combination of axis values for every workload, the last axis varying
/// fastest. Parameters without an axis keep their baseline value.
pub fn full_factorial(
    space: &ParameterSpace,
    baseline: &Configuration,
    workloads: &[&Workload],
) -> Vec<SweepPoint> {
    let mut configs = vec![baseline.clone()];
    for axis in space.axes() {
        configs = configs
            .iter()
            .flat_map(|cfg| {
                axis.values
                    .iter()
                    .map(|value| cfg.with(axis.parameter, value.clone()))
            })
            .collect();
    }
    workloads
        .iter()
        .flat_map(|workload| {
            configs.iter().map(|configuration| SweepPoint {
                workload: (*workload).clone(),
                tag: format!("sweep_{}_{}", workload.name, configuration.label()),
                configuration: configuration.clone(),
            })
        })
        .collect()
}

pub fn run_sweep<E: Evaluator>(points: &[SweepPoint], evaluator: &mut E) -> Result<Vec<PointResult>> {
    let mut results = Vec::with_capacity(points.len());
    for (idx, point) in points.iter().enumerate() {
        info!("[{}/{}] {}", idx + 1, points.len(), point.tag);
        let result = evaluator.evaluate(&point.workload, &point.configuration, &point.tag)?;
        info!("  {result}");
        results.push(PointResult {
            workload: point.workload.name.clone(),
            tag: point.tag.clone(),
            configuration: point.configuration.clone(),
            result,
        });
    }
    Ok(results)
}

/// Lowest EDP among the measured points of each workload, in order of first
/// appearance. The earliest point wins ties.
pub fn best_per_workload(results: &[PointResult]) -> Vec<&PointResult> {
    let mut best: Vec<(f64, &PointResult)> = Vec::new();
    for r in results {
        let Some(edp) = r.result.edp() else {
            continue;
        };
        match best.iter_mut().find(|(_, b)| b.workload == r.workload) {
            Some(entry) if edp < entry.0 => *entry = (edp, r),
            Some(_) => {}
            None => best.push((edp, r)),
        }
    }
    best.into_iter().map(|(_, r)| r).collect()
}

/// Writes one CSV row per point. Parameter columns follow the axes of `space`.
pub fn write_results<W: Write>(
    results: &[PointResult],
    space: &ParameterSpace,
    writer: W,
) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    let mut header = vec!["Tag".to_string(), "Workload".to_string()];
    header.extend(space.axes().iter().map(|a| a.parameter.to_string()));
    header.extend(
        [
            "CPI",
            "IPC",
            "L1I_MissRate",
            "L1D_MissRate",
            "L2_MissRate",
            "RuntimeDynamic",
            "TotalLeakage",
            "Energy",
            "EDP",
        ]
        .map(String::from),
    );
    out.write_record(&header)?;

    for point in results {
        let r = &point.result;
        let mut row = vec![point.tag.clone(), point.workload.clone()];
        row.extend(space.axes().iter().map(|a| {
            point
                .configuration
                .get(a.parameter)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        row.extend(
            [
                r.cpi(),
                r.ipc,
                r.l1i_miss_rate,
                r.l1d_miss_rate,
                r.l2_miss_rate,
                r.runtime_dynamic(),
                r.total_leakage(),
                r.energy(),
                r.edp(),
            ]
            .map(|v| v.map_or_else(|| "NaN".to_string(), |v| v.to_string())),
        );
        out.write_record(&row)?;
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}
