//! Module containing the numeric table export: one tab-delimited file per
//! measured quantity, rows = time steps, columns = vehicles, fixed 6-decimal
//! formatting.

use crate::closed_loop::ClosedLoopResults;
use crate::imports::*;

/// Write one `[n_samples x n_veh]` table as tab-separated 6-decimal text
pub fn write_table<P: AsRef<Path>>(filepath: P, table: &Array2<f64>) -> anyhow::Result<()> {
    let filepath = filepath.as_ref();
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(filepath)
        .with_context(|| format!("Could not create table file: {filepath:?}"))?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|x| format!("{x:.6}")))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write every result table of one run into `dir`, named
/// `{quantity}_{tag}.csv`
pub fn export_tables<P: AsRef<Path>>(
    results: &ClosedLoopResults,
    dir: P,
    tag: &str,
) -> anyhow::Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Could not create output directory: {dir:?}"))?;
    let tables: [(&str, &Array2<f64>); 7] = [
        ("space", &results.spacing),
        ("speed", &results.speed),
        ("rspeed", &results.rel_speed),
        ("accel", &results.accel),
        ("refer", &results.desired_spacing),
        ("cntrl", &results.control),
        ("posit", &results.position),
    ];
    for (quantity, table) in tables {
        write_table(dir.join(format!("{quantity}_{tag}.csv")), table)?;
    }
    Ok(())
}
