//! Model-variant hyperparameter records
//!
//! The modeling backend compares HBR variants that differ in basis family,
//! likelihood, and which distributional moments are covariate-dependent.
//! Variants are typed records validated at construction, so an impossible
//! combination (e.g. a covariate-dependent skew under a Gaussian
//! likelihood) never reaches the dispatcher.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Regression basis over the age covariate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Linear mean trend.
    Linear,
    /// Non-linear B-spline basis.
    BSpline,
}

impl ModelFamily {
    /// CLI token understood by the modeling backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::BSpline => "bspline",
        }
    }
}

/// Predictive likelihood family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    /// Symmetric Gaussian likelihood.
    Gaussian,
    /// Sinh-arcsinh likelihood with skew and kurtosis parameters.
    Shash,
}

impl Likelihood {
    /// CLI token understood by the modeling backend.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Shash => "shash",
        }
    }
}

/// One HBR model variant to fit per run.
///
/// Deserialization goes through the same validation as [`ModelVariant::new`],
/// so a config file cannot smuggle in an invalid combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVariant")]
pub struct ModelVariant {
    name: String,
    family: ModelFamily,
    likelihood: Likelihood,
    sigma_covariate: bool,
    skew_covariate: bool,
    kurtosis_covariate: bool,
    random_slope: bool,
}

impl ModelVariant {
    /// Construct a variant, rejecting invalid flag combinations.
    ///
    /// # Errors
    ///
    /// Returns an error if skew or kurtosis covariate-dependence is requested
    /// under a Gaussian likelihood (those moments do not exist there), or the
    /// name is empty.
    pub fn new(
        name: impl Into<String>,
        family: ModelFamily,
        likelihood: Likelihood,
        sigma_covariate: bool,
        skew_covariate: bool,
        kurtosis_covariate: bool,
        random_slope: bool,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidVariant {
                name,
                reason: "variant name must be non-empty".to_string(),
            });
        }
        if likelihood == Likelihood::Gaussian && (skew_covariate || kurtosis_covariate) {
            return Err(Error::InvalidVariant {
                name,
                reason: "Gaussian likelihood has no skew/kurtosis terms to vary".to_string(),
            });
        }
        Ok(Self {
            name,
            family,
            likelihood,
            sigma_covariate,
            skew_covariate,
            kurtosis_covariate,
            random_slope,
        })
    }

    /// The homoscedastic linear-Gaussian baseline.
    #[must_use]
    pub fn linear() -> Self {
        Self {
            name: "linear".to_string(),
            family: ModelFamily::Linear,
            likelihood: Likelihood::Gaussian,
            sigma_covariate: false,
            skew_covariate: false,
            kurtosis_covariate: false,
            random_slope: false,
        }
    }

    /// The heteroscedastic B-spline SHASH variant used for growth charts.
    #[must_use]
    pub fn shash() -> Self {
        Self {
            name: "shash".to_string(),
            family: ModelFamily::BSpline,
            likelihood: Likelihood::Shash,
            sigma_covariate: true,
            skew_covariate: true,
            kurtosis_covariate: true,
            random_slope: true,
        }
    }

    /// Variant name, used as the artifact suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Basis family.
    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        self.family
    }

    /// Likelihood family.
    #[must_use]
    pub const fn likelihood(&self) -> Likelihood {
        self.likelihood
    }

    /// Render the variant as CLI flags for the modeling backend.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--family".to_string(),
            self.family.as_str().to_string(),
            "--likelihood".to_string(),
            self.likelihood.as_str().to_string(),
            "--suffix".to_string(),
            self.name.clone(),
        ];
        if self.sigma_covariate {
            args.push("--het-sigma".to_string());
        }
        if self.skew_covariate {
            args.push("--vary-skew".to_string());
        }
        if self.kurtosis_covariate {
            args.push("--vary-kurtosis".to_string());
        }
        if self.random_slope {
            args.push("--random-slope".to_string());
        }
        args
    }
}

/// Unvalidated mirror of [`ModelVariant`] used during deserialization.
#[derive(Deserialize)]
struct RawVariant {
    name: String,
    family: ModelFamily,
    likelihood: Likelihood,
    #[serde(default)]
    sigma_covariate: bool,
    #[serde(default)]
    skew_covariate: bool,
    #[serde(default)]
    kurtosis_covariate: bool,
    #[serde(default)]
    random_slope: bool,
}

impl TryFrom<RawVariant> for ModelVariant {
    type Error = Error;

    fn try_from(raw: RawVariant) -> Result<Self> {
        Self::new(
            raw.name,
            raw.family,
            raw.likelihood,
            raw.sigma_covariate,
            raw.skew_covariate,
            raw.kurtosis_covariate,
            raw.random_slope,
        )
    }
}
