use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::artifacts::{parse_feature_names, ArtifactDigest, ModelArtifacts};
use crate::config::{ModelFormat, Number, MAX_BATCH_SIZE};
use crate::labels::{self, N_CLUSTERS};
use crate::model::{load_model, ClusterModel, ModelDiagnostics};
use crate::scaler::ScalerParams;
use crate::vector_ops::distance_to_confidence;

/// Request fields, in the order `DepartmentData::values` returns them.
pub const FIELD_NAMES: [&str; 8] = [
    "ymophg_mean",
    "ymophg_median",
    "anosest_mean",
    "edad_mean",
    "totper_mean",
    "tasa_ocupacion",
    "tasa_pobreza",
    "tasa_nbi",
];

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Pipeline(String),
}

/// Socioeconomic indicators for one department.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DepartmentData {
    /// Mean household income (Lempiras).
    pub ymophg_mean: f64,
    /// Median household income (Lempiras).
    pub ymophg_median: f64,
    /// Mean years of schooling.
    pub anosest_mean: f64,
    pub edad_mean: f64,
    /// Mean persons per household.
    pub totper_mean: f64,
    pub tasa_ocupacion: f64,
    pub tasa_pobreza: f64,
    pub tasa_nbi: f64,
}

impl DepartmentData {
    pub fn values(&self) -> [f64; 8] {
        [
            self.ymophg_mean,
            self.ymophg_median,
            self.anosest_mean,
            self.edad_mean,
            self.totper_mean,
            self.tasa_ocupacion,
            self.tasa_pobreza,
            self.tasa_nbi,
        ]
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        for (name, value) in FIELD_NAMES.iter().zip(self.values()) {
            if !value.is_finite() {
                return Err(ServiceError::Validation(format!(
                    "Field '{}' must be a finite number",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Parses and validates a single-item request body.
pub fn parse_single(body: &[u8]) -> Result<DepartmentData, ServiceError> {
    let data: DepartmentData = serde_json::from_slice(body)
        .map_err(|e| ServiceError::Validation(format!("Invalid request body: {}", e)))?;
    data.validate()?;
    Ok(data)
}

/// Parses a batch body. The size bound is checked before any item is read.
pub fn parse_batch(body: &[u8]) -> Result<Vec<DepartmentData>, ServiceError> {
    let raw: Vec<serde_json::Value> = serde_json::from_slice(body)
        .map_err(|e| ServiceError::Validation(format!("Request body must be a JSON array: {}", e)))?;
    check_batch_size(raw.len())?;

    raw.into_iter()
        .enumerate()
        .map(|(index, value)| {
            let data = DepartmentData::deserialize(value)
                .map_err(|e| ServiceError::Validation(format!("Item {}: {}", index, e)))?;
            data.validate()
                .map_err(|e| ServiceError::Validation(format!("Item {}: {}", index, e)))?;
            Ok(data)
        })
        .collect()
}

fn check_batch_size(len: usize) -> Result<(), ServiceError> {
    if len == 0 || len > MAX_BATCH_SIZE {
        return Err(ServiceError::Validation(format!(
            "Provide between 1 and {} records (got {})",
            MAX_BATCH_SIZE, len
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterAssignment {
    pub cluster: usize,
    pub cluster_name: &'static str,
    /// `1 / (1 + distance to centroid)`; a heuristic, not a probability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Number>,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub cluster: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub clusters: Vec<BatchItem>,
    pub summary: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub modelo: &'static str,
    pub n_clusters: usize,
    pub features: Vec<String>,
    pub n_features: usize,
    #[serde(flatten)]
    pub diagnostics: ModelDiagnostics,
    pub framework: &'static str,
    pub source: &'static str,
    pub artifacts: Vec<ArtifactDigest>,
}

/// Everything a request needs, built once at startup and never mutated.
pub struct ServiceContext {
    model: Box<dyn ClusterModel>,
    scaler: ScalerParams,
    feature_names: Vec<String>,
    /// `order[i]` is the position in `FIELD_NAMES` of the i-th model input.
    order: Vec<usize>,
    source: &'static str,
    artifacts: Vec<ArtifactDigest>,
}

impl ServiceContext {
    pub fn from_artifacts(
        artifacts: &ModelArtifacts,
        format: ModelFormat,
        source: &'static str,
    ) -> Result<Self> {
        let feature_names = parse_feature_names(&artifacts.features.bytes)?;
        let scaler = ScalerParams::from_json_bytes(&artifacts.scaler.bytes)?;
        let model = load_model(format, &artifacts.model.bytes, feature_names.len(), N_CLUSTERS)?;
        Self::new(model, scaler, feature_names, source, artifacts.digests())
    }

    pub fn new(
        model: Box<dyn ClusterModel>,
        scaler: ScalerParams,
        feature_names: Vec<String>,
        source: &'static str,
        artifacts: Vec<ArtifactDigest>,
    ) -> Result<Self> {
        scaler.validate(&feature_names)?;

        if feature_names.len() != FIELD_NAMES.len() {
            anyhow::bail!(
                "Expected {} features, feature list has {}",
                FIELD_NAMES.len(),
                feature_names.len()
            );
        }
        let order = feature_names
            .iter()
            .map(|name| {
                FIELD_NAMES
                    .iter()
                    .position(|field| field == name)
                    .with_context(|| format!("Unknown feature '{}' in feature list", name))
            })
            .collect::<Result<Vec<_>>>()?;

        if model.n_clusters() != N_CLUSTERS {
            anyhow::bail!(
                "Model has {} clusters but the label table describes {}",
                model.n_clusters(),
                N_CLUSTERS
            );
        }

        let context = Self {
            model,
            scaler,
            feature_names,
            order,
            source,
            artifacts,
        };
        // Scaled mean is the origin; any usable model can place it.
        let origin = context.scaler.transform(&context.scaler.mean)?;
        let ids = context
            .model
            .predict(&[origin])
            .context("Model failed to predict the scaled origin")?;
        if ids.len() != 1 || ids[0] >= N_CLUSTERS {
            anyhow::bail!("Model returned an invalid result for the scaled origin: {:?}", ids);
        }

        tracing::info!(
            model = context.model.kind(),
            n_clusters = context.model.n_clusters(),
            features = ?context.feature_names,
            "service context ready"
        );
        Ok(context)
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    fn assemble(&self, data: &DepartmentData) -> Vec<f64> {
        let values = data.values();
        self.order.iter().map(|&field| values[field]).collect()
    }

    /// Scales the rows once and predicts them in one call.
    fn run(&self, items: &[DepartmentData]) -> Result<(Vec<Vec<Number>>, Vec<usize>), ServiceError> {
        for (index, item) in items.iter().enumerate() {
            item.validate().map_err(|e| match items.len() {
                1 => e,
                _ => ServiceError::Validation(format!("Item {}: {}", index, e)),
            })?;
        }

        let rows: Vec<Vec<f64>> = items.iter().map(|item| self.assemble(item)).collect();
        let scaled = self
            .scaler
            .transform_rows(&rows)
            .map_err(|e| ServiceError::Pipeline(e.to_string()))?;
        let ids = self
            .model
            .predict(&scaled)
            .map_err(|e| ServiceError::Pipeline(e.to_string()))?;

        if ids.len() != items.len() {
            return Err(ServiceError::Pipeline(format!(
                "Model returned {} predictions for {} rows",
                ids.len(),
                items.len()
            )));
        }
        if let Some(&bad) = ids.iter().find(|&&id| id >= N_CLUSTERS) {
            return Err(ServiceError::Pipeline(format!("Model returned unknown cluster {}", bad)));
        }
        Ok((scaled, ids))
    }

    fn assignment(&self, scaled: &[Number], cluster: usize) -> Result<ClusterAssignment, ServiceError> {
        let label = labels::describe(cluster)
            .ok_or_else(|| ServiceError::Pipeline(format!("No label for cluster {}", cluster)))?;
        let confidence = match self.model.centroid_distance(scaled, cluster) {
            Some(distance) if !distance.is_finite() => {
                return Err(ServiceError::Pipeline(format!(
                    "Distance to cluster {} is out of range",
                    cluster
                )))
            }
            distance => distance.map(distance_to_confidence),
        };
        Ok(ClusterAssignment {
            cluster,
            cluster_name: label.name,
            confidence,
            description: label.description,
        })
    }

    pub fn predict_one(&self, data: &DepartmentData) -> Result<ClusterAssignment, ServiceError> {
        let (scaled, ids) = self
            .run(std::slice::from_ref(data))
            .map_err(|e| wrap_pipeline(e, "Prediction error"))?;
        self.assignment(&scaled[0], ids[0])
            .map_err(|e| wrap_pipeline(e, "Prediction error"))
    }

    /// Full assignments for every item, without the request size bound.
    pub fn predict_assignments(
        &self,
        items: &[DepartmentData],
    ) -> Result<Vec<ClusterAssignment>, ServiceError> {
        let (scaled, ids) = self.run(items)?;
        scaled
            .iter()
            .zip(ids)
            .map(|(row, cluster)| self.assignment(row, cluster))
            .collect()
    }

    pub fn predict_batch(&self, items: &[DepartmentData]) -> Result<BatchResponse, ServiceError> {
        check_batch_size(items.len())?;
        let (_, ids) = self
            .run(items)
            .map_err(|e| wrap_pipeline(e, "Batch prediction error"))?;

        let mut summary: BTreeMap<usize, usize> = (0..N_CLUSTERS).map(|id| (id, 0)).collect();
        let clusters = ids
            .into_iter()
            .enumerate()
            .map(|(index, cluster)| {
                *summary.entry(cluster).or_insert(0) += 1;
                BatchItem { index, cluster }
            })
            .collect();

        Ok(BatchResponse {
            total: items.len(),
            clusters,
            summary,
        })
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            modelo: self.model.kind(),
            n_clusters: self.model.n_clusters(),
            features: self.feature_names.clone(),
            n_features: self.feature_names.len(),
            diagnostics: self.model.diagnostics(),
            framework: self.model.framework(),
            source: self.source,
            artifacts: self.artifacts.clone(),
        }
    }

    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "mensaje": "API de Clustering Socioeconómico de Honduras",
            "version": env!("CARGO_PKG_VERSION"),
            "modelo": format!("{} ({} clusters)", self.model.kind(), self.model.n_clusters()),
            "caracteristicas": self.feature_names.len(),
            "source": self.source,
        })
    }
}

fn wrap_pipeline(error: ServiceError, prefix: &str) -> ServiceError {
    match error {
        ServiceError::Pipeline(msg) => ServiceError::Pipeline(format!("{}: {}", prefix, msg)),
        other => other,
    }
}
