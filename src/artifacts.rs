use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::config::ArtifactSource;

/// Raw bytes of one model artifact plus where they came from.
pub struct Artifact {
    pub description: &'static str,
    pub location: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArtifactDigest {
    pub name: &'static str,
    pub location: String,
    pub bytes: usize,
    pub sha256: String,
}

impl Artifact {
    pub fn digest(&self) -> ArtifactDigest {
        ArtifactDigest {
            name: self.description,
            location: redact_query(&self.location),
            bytes: self.bytes.len(),
            sha256: format!("{:x}", Sha256::digest(&self.bytes)),
        }
    }
}

pub struct ModelArtifacts {
    pub model: Artifact,
    pub scaler: Artifact,
    pub features: Artifact,
}

impl ModelArtifacts {
    pub fn fetch(source: &ArtifactSource) -> Result<Self> {
        match source {
            ArtifactSource::Local {
                model_path,
                scaler_path,
                features_path,
            } => Ok(Self {
                model: read_local(model_path, "model")?,
                scaler: read_local(scaler_path, "scaler params")?,
                features: read_local(features_path, "feature names")?,
            }),
            ArtifactSource::Remote {
                model_url,
                scaler_params_url,
                feature_names_url,
                timeout_secs,
            } => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(*timeout_secs))
                    .build()
                    .context("Failed to build HTTP client")?;
                Ok(Self {
                    model: fetch_remote(&client, model_url, "model")?,
                    scaler: fetch_remote(&client, scaler_params_url, "scaler params")?,
                    features: fetch_remote(&client, feature_names_url, "feature names")?,
                })
            }
        }
    }

    pub fn digests(&self) -> Vec<ArtifactDigest> {
        vec![self.model.digest(), self.scaler.digest(), self.features.digest()]
    }
}

fn read_local(path: &str, description: &'static str) -> Result<Artifact> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {} from '{}'", description, path))?;
    tracing::info!(artifact = description, path, bytes = bytes.len(), "loaded artifact from disk");
    Ok(Artifact {
        description,
        location: path.to_string(),
        bytes,
    })
}

fn fetch_remote(
    client: &reqwest::blocking::Client,
    url: &str,
    description: &'static str,
) -> Result<Artifact> {
    let shown = redact_query(url);
    tracing::info!(artifact = description, url = %shown, "fetching artifact");
    let bytes = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .with_context(|| format!("Failed to fetch {} from '{}'", description, shown))?
        .to_vec();
    tracing::info!(artifact = description, bytes = bytes.len(), "artifact loaded into memory");
    Ok(Artifact {
        description,
        location: url.to_string(),
        bytes,
    })
}

/// Blob URLs may carry access tokens in the query string.
fn redact_query(location: &str) -> String {
    match location.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => location.to_string(),
    }
}

/// Parses the comma-separated feature list, rejecting blanks and duplicates.
pub fn parse_feature_names(bytes: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(bytes).context("Feature names are not valid UTF-8")?;
    let names: Vec<String> = text.trim().split(',').map(|name| name.trim().to_string()).collect();

    if names.iter().any(|name| name.is_empty()) {
        anyhow::bail!("Feature list contains an empty name: '{}'", text.trim());
    }
    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            anyhow::bail!("Feature '{}' appears more than once", name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    #[test]
    fn test_parse_feature_names() {
        let names = parse_feature_names(b"a, b,c\n").unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_feature_names_rejects_blank_and_duplicates() {
        assert!(parse_feature_names(b"a,,c").is_err());
        assert!(parse_feature_names(b"").is_err());
        assert!(parse_feature_names(b"a,b,a").is_err());
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("https://blob/x.onnx?token=abc"), "https://blob/x.onnx");
        assert_eq!(redact_query("models/kmeans.json"), "models/kmeans.json");
    }

    #[test]
    fn test_local_fetch_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().to_string();
        fs::write(path("m.json"), b"model").unwrap();
        fs::write(path("s.json"), b"scaler").unwrap();
        fs::write(path("f.txt"), b"a,b").unwrap();

        let source = ArtifactSource::Local {
            model_path: path("m.json"),
            scaler_path: path("s.json"),
            features_path: path("f.txt"),
        };
        let artifacts = ModelArtifacts::fetch(&source).unwrap();
        assert_eq!(artifacts.model.bytes, b"model");

        let digests = artifacts.digests();
        assert_eq!(digests.len(), 3);
        assert_eq!(digests[2].bytes, 3);
        assert_eq!(digests[0].sha256.len(), 64);
        assert_eq!(digests[0].sha256, format!("{:x}", Sha256::digest(b"model")));
        assert_ne!(digests[0].sha256, digests[1].sha256);
    }

    #[test]
    fn test_local_fetch_missing_file() {
        let source = ArtifactSource::Local {
            model_path: "/nonexistent/kmeans.json".to_string(),
            scaler_path: "/nonexistent/scaler.json".to_string(),
            features_path: "/nonexistent/features.txt".to_string(),
        };
        let err = ModelArtifacts::fetch(&source).err().unwrap();
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn test_remote_fetch() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/model", get(|| async { "model-bytes" }))
            .route("/scaler", get(|| async { "scaler-bytes" }))
            .route("/features", get(|| async { "a,b,c" }));
        rt.spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let base = format!("http://{}", addr);
        let source = ArtifactSource::Remote {
            model_url: format!("{}/model?sig=secret", base),
            scaler_params_url: format!("{}/scaler", base),
            feature_names_url: format!("{}/features", base),
            timeout_secs: 5,
        };
        let artifacts = ModelArtifacts::fetch(&source).unwrap();
        assert_eq!(artifacts.model.bytes, b"model-bytes");
        assert_eq!(artifacts.features.bytes, b"a,b,c");
        assert!(!artifacts.model.digest().location.contains("secret"));

        let missing = ArtifactSource::Remote {
            model_url: format!("{}/missing", base),
            scaler_params_url: format!("{}/scaler", base),
            feature_names_url: format!("{}/features", base),
            timeout_secs: 5,
        };
        assert!(ModelArtifacts::fetch(&missing).is_err());
    }
}
