//! Post-run digest of a history ledger.

use std::{cmp::Ordering, collections::BTreeMap, fmt, io::Write};

use crate::{error::Result, ledger::LedgerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    Edp,
    Energy,
    Cpi,
}

impl Ranking {
    pub const ALL: [Ranking; 3] = [Ranking::Edp, Ranking::Energy, Ranking::Cpi];

    fn key(self, record: &LedgerRecord) -> f64 {
        match self {
            Ranking::Edp => record.edp,
            Ranking::Energy => record.energy,
            Ranking::Cpi => record.cpi,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Ranking::Edp => "lowest EDP",
            Ranking::Energy => "lowest energy",
            Ranking::Cpi => "lowest CPI",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterMean {
    pub parameter: String,
    pub mean_edp: f64,
    pub measured: usize,
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub tables: Vec<(Ranking, Vec<LedgerRecord>)>,
    pub mean_edp: Vec<ParameterMean>,
}

pub fn summarize(records: &[LedgerRecord], top: usize) -> Summary {
    let tables = Ranking::ALL
        .into_iter()
        .map(|ranking| (ranking, lowest(records, top, ranking)))
        .collect();
    Summary {
        tables,
        mean_edp: mean_edp_by_parameter(records),
    }
}

/// The `top` records with the smallest key, NaN keys excluded. Ties keep ledger order.
fn lowest(records: &[LedgerRecord], top: usize, ranking: Ranking) -> Vec<LedgerRecord> {
    let mut ranked: Vec<_> = records
        .iter()
        .filter(|r| !ranking.key(r).is_nan())
        .collect();
    ranked.sort_by(|a, b| {
        ranking
            .key(a)
            .partial_cmp(&ranking.key(b))
            .unwrap_or(Ordering::Equal)
    });
    ranked.into_iter().take(top).cloned().collect()
}

fn mean_edp_by_parameter(records: &[LedgerRecord]) -> Vec<ParameterMean> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for record in records.iter().filter(|r| !r.edp.is_nan()) {
        let entry = sums.entry(record.parameter.as_str()).or_default();
        entry.0 += record.edp;
        entry.1 += 1;
    }
    let mut means: Vec<_> = sums
        .into_iter()
        .map(|(parameter, (sum, measured))| ParameterMean {
            parameter: parameter.to_string(),
            mean_edp: sum / measured as f64,
            measured,
        })
        .collect();
    means.sort_by(|a, b| a.mean_edp.partial_cmp(&b.mean_edp).unwrap_or(Ordering::Equal));
    means
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ranking, records) in &self.tables {
            writeln!(f, "== Top {} by {} ==", records.len(), ranking.title())?;
            for r in records {
                writeln!(
                    f,
                    "{} [iter {:>4}] {:<22} {:<8} EDP {:>12.6} energy {:>12.6} CPI {:>8.4}",
                    if r.is_improvement() { '*' } else { ' ' },
                    r.iteration,
                    r.parameter,
                    r.value,
                    r.edp,
                    r.energy,
                    r.cpi
                )?;
            }
        }
        writeln!(f, "== Mean EDP per parameter ==")?;
        for mean in &self.mean_edp {
            writeln!(
                f,
                "  {:<22} {:>12.6} ({} measured)",
                mean.parameter, mean.mean_edp, mean.measured
            )?;
        }
        Ok(())
    }
}

/// The ranking tables one after another, each row tagged with its table.
pub fn write_summary<W: Write>(summary: &Summary, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record([
        "Ranking",
        "Iteration",
        "Parameter",
        "Value",
        "EDP",
        "Energy",
        "CPI",
        "Configuration",
    ])?;
    for (ranking, records) in &summary.tables {
        for r in records {
            out.write_record([
                ranking.title().to_string(),
                r.iteration.to_string(),
                r.parameter.clone(),
                r.value.clone(),
                r.edp.to_string(),
                r.energy.to_string(),
                r.cpi.to_string(),
                r.configuration.clone(),
            ])?;
        }
    }
    out.flush().map_err(csv::Error::from)?;
    Ok(())
}
