//! Run Generator
//!
//! Produces K independent seeded train/test partitions of the healthy
//! cohort, stratified by site (or any categorical columns), and writes the
//! six split artifacts each partition needs: covariates, responses, and
//! batch-effect labels for train and test.
//!
//! Missing values are a caller error here, not something the splitter
//! tolerates: `generate_runs` fails fast before touching the filesystem if
//! any used column contains a NaN.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::run::Run;
use crate::table::FeatureTable;
use crate::{Error, Result};

/// Column roles and the train fraction for one experiment's splits.
#[derive(Debug, Clone)]
pub struct SplitSpec {
    /// Train fraction in (0, 1).
    pub train_fraction: f64,
    /// Regression covariates (e.g. age).
    pub covariates: Vec<String>,
    /// Batch-effect columns kept as separate categorical labels
    /// (e.g. sex, site), never folded into the covariates.
    pub batch_effects: Vec<String>,
    /// Ordered response-variable (biomarker) columns.
    pub biomarkers: Vec<String>,
    /// Columns whose levels must keep balanced train proportions.
    pub stratify_by: Vec<String>,
}

impl SplitSpec {
    /// All columns the splitter reads, deduplicated.
    #[must_use]
    pub fn used_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = Vec::new();
        for name in self
            .covariates
            .iter()
            .chain(&self.batch_effects)
            .chain(&self.biomarkers)
            .chain(&self.stratify_by)
        {
            if !cols.contains(name) {
                cols.push(name.clone());
            }
        }
        cols
    }
}

/// The K runs of one experiment plus the ordered biomarker list shared by
/// all of them.
#[derive(Debug, Clone)]
pub struct RunSet {
    /// Runs ordered by ordinal index.
    pub runs: Vec<Run>,
    /// Ordered biomarker names, identical across every run.
    pub biomarkers: Vec<String>,
}

/// Generate one seeded stratified partition as (train, test) row indices.
///
/// Both index sets are returned sorted ascending; their union is exactly
/// `0..table.n_rows()` with no duplicates.
///
/// # Errors
///
/// Returns an error if the fraction is outside (0, 1), a column is missing,
/// or any stratum is too small to leave both partitions non-empty.
pub fn stratified_indices(
    table: &FeatureTable,
    spec: &SplitSpec,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let f = spec.train_fraction;
    if !(f > 0.0 && f < 1.0) {
        return Err(Error::Precondition(format!(
            "train fraction must lie in (0, 1), got {f}"
        )));
    }

    // Group rows by the composite stratification key. BTreeMap keeps the
    // stratum iteration order independent of row order.
    let mut strata: BTreeMap<Vec<u64>, Vec<usize>> = BTreeMap::new();
    let strat_cols: Vec<&[f64]> = spec
        .stratify_by
        .iter()
        .map(|name| {
            table
                .column(name)
                .ok_or_else(|| Error::Table(format!("unknown stratification column '{name}'")))
        })
        .collect::<Result<_>>()?;
    for row in 0..table.n_rows() {
        let key: Vec<u64> = strat_cols.iter().map(|c| c[row].to_bits()).collect();
        strata.entry(key).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (key, mut rows) in strata {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n_train = (f * rows.len() as f64).round() as usize;
        if n_train == 0 || n_train == rows.len() {
            let level = key
                .iter()
                .map(|&bits| format!("{}", f64::from_bits(bits)))
                .collect::<Vec<_>>()
                .join(",");
            return Err(Error::StratumTooSmall {
                column: spec.stratify_by.join(","),
                level,
                rows: rows.len(),
                fraction: f,
            });
        }
        rows.shuffle(&mut rng);
        train.extend_from_slice(&rows[..n_train]);
        test.extend_from_slice(&rows[n_train..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

fn write_partition(
    table: &FeatureTable,
    spec: &SplitSpec,
    indices: &[usize],
    x_path: &Path,
    y_path: &Path,
    batch_path: &Path,
) -> Result<Vec<String>> {
    let rows = table.take_rows(indices);
    rows.select(&spec.covariates)?.write_parquet(x_path)?;
    let y = rows.select(&spec.biomarkers)?;
    y.write_parquet(y_path)?;
    rows.select(&spec.batch_effects)?.write_parquet(batch_path)?;
    Ok(y.names().to_vec())
}

/// Generate K seeded runs under `out_root`, writing six artifacts each.
///
/// The ordered biomarker list is asserted identical across seeds; the
/// first divergence aborts generation.
///
/// # Errors
///
/// Fails fast (before any artifact is written) on missing values in used
/// columns or an invalid train fraction; fails per-seed on stratum-size or
/// IO errors.
pub fn generate_runs(
    table: &FeatureTable,
    spec: &SplitSpec,
    seeds: &[u64],
    out_root: &Path,
) -> Result<RunSet> {
    if seeds.is_empty() {
        return Err(Error::Precondition("seed list is empty".to_string()));
    }
    let used = spec.used_columns();
    if table.has_missing(&used)? {
        return Err(Error::Precondition(
            "used columns contain missing values; drop those rows before splitting".to_string(),
        ));
    }

    let mut runs = Vec::with_capacity(seeds.len());
    let mut biomarkers: Option<Vec<String>> = None;
    for (index, &seed) in seeds.iter().enumerate() {
        let (train, test) = stratified_indices(table, spec, seed)?;
        let dir = out_root.join(format!("run-{index:03}-seed-{seed}"));
        fs::create_dir_all(&dir)?;
        let run = Run::new(seed, index, dir);

        let names_train = write_partition(
            table,
            spec,
            &train,
            &run.x_train(),
            &run.y_train(),
            &run.batch_train(),
        )?;
        let names_test = write_partition(
            table,
            spec,
            &test,
            &run.x_test(),
            &run.y_test(),
            &run.batch_test(),
        )?;

        if names_train != names_test {
            return Err(Error::BiomarkerOrderMismatch { seed });
        }
        match &biomarkers {
            None => biomarkers = Some(names_train),
            Some(first) if *first != names_train => {
                return Err(Error::BiomarkerOrderMismatch { seed });
            }
            Some(_) => {}
        }

        tracing::debug!(
            seed,
            index,
            train = train.len(),
            test = test.len(),
            "wrote split artifacts"
        );
        runs.push(run);
    }

    // seeds is non-empty, so biomarkers is set.
    let biomarkers = biomarkers.unwrap_or_default();
    Ok(RunSet { runs, biomarkers })
}

/// Write the predict-mode input for a patient cohort into `dir`.
///
/// Same six-artifact shape as a fit split, but every patient row lands in
/// the test partition; the train artifacts are written empty.
///
/// # Errors
///
/// Returns an error on missing values in used columns or IO failure.
pub fn prepare_prediction_input(
    table: &FeatureTable,
    spec: &SplitSpec,
    dir: &Path,
) -> Result<Vec<String>> {
    let used = spec.used_columns();
    if table.has_missing(&used)? {
        return Err(Error::Precondition(
            "patient columns contain missing values; drop those rows first".to_string(),
        ));
    }
    fs::create_dir_all(dir)?;
    let all: Vec<usize> = (0..table.n_rows()).collect();
    write_partition(
        table,
        spec,
        &[],
        &dir.join("x_train.parquet"),
        &dir.join("y_train.parquet"),
        &dir.join("batch_train.parquet"),
    )?;
    write_partition(
        table,
        spec,
        &all,
        &dir.join("x_test.parquet"),
        &dir.join("y_test.parquet"),
        &dir.join("batch_test.parquet"),
    )
}
