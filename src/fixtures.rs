//! Shared test data: a small four-cluster model fit on made-up indicators.

use std::fs;
use std::path::Path;

use crate::config::{ArtifactSource, Number};
use crate::model::CentroidModel;
use crate::scaler::ScalerParams;
use crate::service::{DepartmentData, ServiceContext, FIELD_NAMES};

pub fn feature_names() -> Vec<String> {
    FIELD_NAMES.iter().map(|name| name.to_string()).collect()
}

pub fn scaler() -> ScalerParams {
    ScalerParams::new(
        vec![7000.0, 6000.0, 6.0, 35.0, 4.2, 0.6, 0.5, 0.4],
        vec![2000.0, 1800.0, 1.0, 2.0, 0.5, 0.1, 0.15, 0.12],
    )
}

pub fn centroids() -> Vec<Vec<Number>> {
    vec![
        vec![1.5, 1.5, 1.5, -0.5, -0.8, 0.8, -1.5, -1.5],
        vec![0.5, 0.5, 0.5, -0.2, -0.3, 0.3, -0.5, -0.5],
        vec![-0.5, -0.5, -0.5, 0.2, 0.3, -0.3, 0.5, 0.5],
        vec![-1.5, -1.5, -1.5, 0.5, 0.8, -0.8, 1.5, 1.5],
    ]
}

pub fn context() -> ServiceContext {
    let model = CentroidModel::new(centroids()).unwrap();
    ServiceContext::new(Box::new(model), scaler(), feature_names(), "local", vec![]).unwrap()
}

/// Writes the fixture model as on-disk artifacts and returns their source.
pub fn write_artifacts(dir: &Path) -> ArtifactSource {
    let model = serde_json::json!({
        "n_clusters": 4,
        "centroids": centroids(),
        "n_iter": 12,
        "inertia": 31.5,
    });
    let mut params = scaler();
    params.n_features_in = Some(8);
    params.feature_names = Some(feature_names());

    let model_path = dir.join("kmeans.json");
    let scaler_path = dir.join("scaler_params.json");
    let features_path = dir.join("feature_names.txt");
    fs::write(&model_path, serde_json::to_vec(&model).unwrap()).unwrap();
    params.save(&scaler_path).unwrap();
    fs::write(&features_path, FIELD_NAMES.join(",")).unwrap();

    ArtifactSource::Local {
        model_path: model_path.to_string_lossy().to_string(),
        scaler_path: scaler_path.to_string_lossy().to_string(),
        features_path: features_path.to_string_lossy().to_string(),
    }
}

pub fn reference() -> DepartmentData {
    DepartmentData {
        ymophg_mean: 8500.0,
        ymophg_median: 7500.0,
        anosest_mean: 6.5,
        edad_mean: 35.0,
        totper_mean: 4.0,
        tasa_ocupacion: 0.65,
        tasa_pobreza: 0.45,
        tasa_nbi: 0.35,
    }
}

pub fn high() -> DepartmentData {
    DepartmentData {
        ymophg_mean: 11000.0,
        ymophg_median: 10000.0,
        anosest_mean: 8.0,
        edad_mean: 34.0,
        totper_mean: 3.8,
        tasa_ocupacion: 0.7,
        tasa_pobreza: 0.3,
        tasa_nbi: 0.2,
    }
}

pub fn low() -> DepartmentData {
    DepartmentData {
        ymophg_mean: 5000.0,
        ymophg_median: 4000.0,
        anosest_mean: 4.0,
        edad_mean: 37.0,
        totper_mean: 4.5,
        tasa_ocupacion: 0.5,
        tasa_pobreza: 0.65,
        tasa_nbi: 0.55,
    }
}
