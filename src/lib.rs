//! # Normeg: Repeated-Run Harness for Lifespan Normative MEG Modeling
//!
//! Normeg orchestrates normative-modeling experiments over MEG
//! band-power features: it generates seeded stratified train/test splits
//! of a healthy cohort, dispatches one external HBR fit per split (locally
//! or through a batch queue), aggregates evaluation metrics across the
//! repeated runs, and scores a patient cohort's deviation ("Z") scores for
//! disease discrimination.
//!
//! The heavy lifting (spectral feature extraction, MCMC sampling over
//! SHASH/Gaussian likelihoods, plotting) lives in external tooling.
//! Normeg owns the experiment harness around it: splits, jobs, joins,
//! retries, and deterministic aggregation.
//!
//! ## Example
//!
//! ```rust
//! use normeg::split::SplitSpec;
//! use normeg::variant::ModelVariant;
//!
//! // The two variants compared in the lifespan analysis.
//! let baseline = ModelVariant::linear();
//! let winning = ModelVariant::shash();
//! assert_ne!(baseline.name(), winning.name());
//!
//! let spec = SplitSpec {
//!     train_fraction: 0.5,
//!     covariates: vec!["age".into()],
//!     batch_effects: vec!["sex".into(), "site".into()],
//!     biomarkers: vec!["theta".into(), "alpha".into(), "beta".into()],
//!     stratify_by: vec!["site".into()],
//! };
//! assert_eq!(spec.used_columns().len(), 6);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auc;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod run;
pub mod split;
pub mod summary;
pub mod table;
pub mod variant;

pub use error::{Error, Result};

/// Initialize tracing with an env-filter subscriber.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
