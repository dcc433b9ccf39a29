use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::config::{Number, EPSILON};

/// Standard-scaler parameters in the JSON layout produced by the training
/// export: `mean` and `scale` are required, the rest is informational.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_features_in: Option<usize>,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
}

impl ScalerParams {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self {
            mean,
            scale,
            var: None,
            n_features_in: None,
            feature_names: None,
        }
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse scaler parameters JSON")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read scaler parameters '{}'", path.display()))?;
        Self::from_json_bytes(&bytes)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for '{}'", path.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write scaler parameters '{}'", path.display()))?;
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Checks the parameters against the feature order the service will use.
    pub fn validate(&self, feature_names: &[String]) -> Result<()> {
        if self.mean.len() != self.scale.len() {
            anyhow::bail!(
                "Scaler mean/scale length mismatch: {} vs {}",
                self.mean.len(),
                self.scale.len()
            );
        }
        if self.mean.len() != feature_names.len() {
            anyhow::bail!(
                "Scaler has {} features but the feature list has {}",
                self.mean.len(),
                feature_names.len()
            );
        }
        if let Some(n) = self.n_features_in {
            if n != self.mean.len() {
                anyhow::bail!("Scaler declares n_features_in={} but carries {} means", n, self.mean.len());
            }
        }
        for (i, (&m, &s)) in self.mean.iter().zip(self.scale.iter()).enumerate() {
            if !m.is_finite() {
                anyhow::bail!("Scaler mean for '{}' is not finite", feature_names[i]);
            }
            if !s.is_finite() || s.abs() < EPSILON {
                anyhow::bail!("Scaler scale for '{}' is zero or not finite ({})", feature_names[i], s);
            }
        }
        if let Some(declared) = &self.feature_names {
            if declared.as_slice() != feature_names {
                anyhow::bail!(
                    "Feature order mismatch: scaler was fit on {:?}, feature list is {:?}",
                    declared,
                    feature_names
                );
            }
        }
        Ok(())
    }

    /// Computes `(x - mean) / scale` elementwise. Fails when a scaled value
    /// is not finite.
    pub fn transform(&self, vector: &[f64]) -> Result<Vec<Number>> {
        if vector.len() != self.mean.len() {
            anyhow::bail!(
                "Feature vector has {} values, scaler expects {}",
                vector.len(),
                self.mean.len()
            );
        }
        vector
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .enumerate()
            .map(|(i, (&x, (&m, &s)))| {
                let scaled = (x - m) / s;
                if !scaled.is_finite() {
                    anyhow::bail!("Scaled value for feature {} is out of range", i);
                }
                Ok(scaled)
            })
            .collect()
    }

    pub fn transform_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<Number>>> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}
