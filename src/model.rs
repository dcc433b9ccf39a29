use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ModelFormat, Number};
use crate::vector_ops::{euclidean_distance, nearest_centroid};

/// Extra facts about a trained model, reported by `/info` when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iter: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inertia: Option<f64>,
}

/// Uniform view over a trained clustering model.
///
/// Rows handed to `predict` are already scaled. Implementations must return
/// exactly one id per row, in row order.
pub trait ClusterModel: Send + Sync {
    fn kind(&self) -> &'static str;

    fn framework(&self) -> &'static str;

    fn n_clusters(&self) -> usize;

    fn predict(&self, rows: &[Vec<Number>]) -> Result<Vec<usize>>;

    /// Euclidean distance from `row` to the centroid of `cluster_id`, for
    /// models that expose their centroids.
    fn centroid_distance(&self, _row: &[Number], _cluster_id: usize) -> Option<Number> {
        None
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        ModelDiagnostics::default()
    }
}

/// On-disk layout of the centroid artifact.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KMeansArtifact {
    #[serde(default)]
    pub n_clusters: Option<usize>,
    pub centroids: Vec<Vec<Number>>,
    #[serde(default)]
    pub n_iter: Option<usize>,
    #[serde(default)]
    pub inertia: Option<f64>,
}

/// K-Means model evaluated directly from its centroids.
pub struct CentroidModel {
    centroids: Vec<Vec<Number>>,
    diagnostics: ModelDiagnostics,
}

impl CentroidModel {
    pub fn new(centroids: Vec<Vec<Number>>) -> Result<Self> {
        Self::from_artifact(KMeansArtifact {
            n_clusters: None,
            centroids,
            n_iter: None,
            inertia: None,
        })
    }

    pub fn from_artifact(artifact: KMeansArtifact) -> Result<Self> {
        if artifact.centroids.is_empty() {
            anyhow::bail!("K-Means artifact has no centroids");
        }
        if let Some(n) = artifact.n_clusters {
            if n != artifact.centroids.len() {
                anyhow::bail!(
                    "K-Means artifact declares {} clusters but carries {} centroids",
                    n,
                    artifact.centroids.len()
                );
            }
        }
        let dim = artifact.centroids[0].len();
        for (i, centroid) in artifact.centroids.iter().enumerate() {
            if centroid.len() != dim {
                anyhow::bail!("Centroid {} has {} values, expected {}", i, centroid.len(), dim);
            }
            if centroid.iter().any(|v| !v.is_finite()) {
                anyhow::bail!("Centroid {} contains a non-finite value", i);
            }
        }

        Ok(Self {
            centroids: artifact.centroids,
            diagnostics: ModelDiagnostics {
                iter: artifact.n_iter,
                inertia: artifact.inertia,
            },
        })
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: KMeansArtifact =
            serde_json::from_slice(bytes).context("Failed to parse K-Means artifact JSON")?;
        Self::from_artifact(artifact)
    }

    pub fn n_features(&self) -> usize {
        self.centroids[0].len()
    }
}

impl ClusterModel for CentroidModel {
    fn kind(&self) -> &'static str {
        "KMeans Clustering"
    }

    fn framework(&self) -> &'static str {
        "centroids"
    }

    fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    fn predict(&self, rows: &[Vec<Number>]) -> Result<Vec<usize>> {
        let dim = self.n_features();
        rows.par_iter()
            .enumerate()
            .map(|(i, row)| {
                if row.len() != dim {
                    anyhow::bail!("Row {} has {} values, model expects {}", i, row.len(), dim);
                }
                nearest_centroid(row, &self.centroids).with_context(|| {
                    format!("Row {} is too far from every centroid to rank distances", i)
                })
            })
            .collect()
    }

    fn centroid_distance(&self, row: &[Number], cluster_id: usize) -> Option<Number> {
        self.centroids
            .get(cluster_id)
            .and_then(|centroid| euclidean_distance(row, centroid))
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        self.diagnostics.clone()
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::{ClusterModel, Number};
    use anyhow::{Context, Result};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tract_onnx::prelude::*;

    type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

    /// ONNX export of the clustering model. The first graph output must be
    /// the label tensor.
    ///
    /// Optimized plans are built once per batch size and reused.
    pub struct OnnxModel {
        model: InferenceModel,
        plans: Mutex<HashMap<usize, Arc<Plan>>>,
        n_features: usize,
        n_clusters: usize,
    }

    impl OnnxModel {
        pub fn from_bytes(bytes: &[u8], n_features: usize, n_clusters: usize) -> Result<Self> {
            let model = tract_onnx::onnx()
                .model_for_read(&mut std::io::Cursor::new(bytes))
                .context("Failed to parse ONNX model")?;
            Self::from_inference_model(model, n_features, n_clusters)
        }

        pub fn from_inference_model(
            model: InferenceModel,
            n_features: usize,
            n_clusters: usize,
        ) -> Result<Self> {
            let onnx = Self {
                model,
                plans: Mutex::new(HashMap::new()),
                n_features,
                n_clusters,
            };
            onnx.predict(&[vec![0.0; n_features]])
                .context("ONNX warmup inference failed")?;
            Ok(onnx)
        }

        fn plan(&self, batch: usize) -> Result<Arc<Plan>> {
            let mut plans = self
                .plans
                .lock()
                .map_err(|_| anyhow::anyhow!("ONNX plan cache is poisoned"))?;
            if let Some(plan) = plans.get(&batch) {
                return Ok(Arc::clone(plan));
            }

            let plan = Arc::new(
                self.model
                    .clone()
                    .with_input_fact(0, f32::fact([batch, self.n_features]).into())?
                    .into_optimized()?
                    .into_runnable()?,
            );
            tracing::debug!(batch, "built ONNX plan");
            plans.insert(batch, Arc::clone(&plan));
            Ok(plan)
        }
    }

    impl ClusterModel for OnnxModel {
        fn kind(&self) -> &'static str {
            "KMeans (ONNX)"
        }

        fn framework(&self) -> &'static str {
            "tract-onnx"
        }

        fn n_clusters(&self) -> usize {
            self.n_clusters
        }

        fn predict(&self, rows: &[Vec<Number>]) -> Result<Vec<usize>> {
            let plan = self.plan(rows.len())?;

            // The exported graph takes float32 input.
            let flat: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
            let input: Tensor =
                tract_ndarray::Array2::from_shape_vec((rows.len(), self.n_features), flat)?.into();
            let outputs = plan.run(tvec!(input.into()))?;

            let labels = outputs[0].cast_to::<i64>()?;
            let labels = labels.as_slice::<i64>()?;
            if labels.len() != rows.len() {
                anyhow::bail!("ONNX model returned {} labels for {} rows", labels.len(), rows.len());
            }
            labels
                .iter()
                .map(|&label| {
                    usize::try_from(label)
                        .map_err(|_| anyhow::anyhow!("ONNX model returned negative label {}", label))
                })
                .collect()
        }
    }

}

#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;

/// Builds the inference adapter for the configured artifact format.
#[cfg_attr(not(feature = "onnx"), allow(unused_variables))]
pub fn load_model(
    format: ModelFormat,
    bytes: &[u8],
    n_features: usize,
    n_clusters: usize,
) -> Result<Box<dyn ClusterModel>> {
    match format {
        ModelFormat::KMeans => {
            let model = CentroidModel::from_json_bytes(bytes)?;
            if model.n_features() != n_features {
                anyhow::bail!(
                    "K-Means centroids have {} features, feature list has {}",
                    model.n_features(),
                    n_features
                );
            }
            Ok(Box::new(model))
        }
        #[cfg(feature = "onnx")]
        ModelFormat::Onnx => Ok(Box::new(OnnxModel::from_bytes(bytes, n_features, n_clusters)?)),
        #[cfg(not(feature = "onnx"))]
        ModelFormat::Onnx => anyhow::bail!("ONNX models require building with the `onnx` feature"),
    }
}
