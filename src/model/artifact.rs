use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::ServiceError, model::LogisticRegression};

const BLOB_MAGIC: &[u8; 4] = b"LGRM";
const BLOB_VERSION: u8 = 1;
const MODEL_CLASS: &str = "LogisticRegression";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Blob,
}

impl ArtifactFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ArtifactFormat::Json,
            _ => ArtifactFormat::Blob,
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "json" => Ok(ArtifactFormat::Json),
            "blob" | "bin" => Ok(ArtifactFormat::Blob),
            other => Err(ServiceError::BadRequest(format!(
                "unknown model format '{other}' (expected json or blob)"
            ))),
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::Json => f.write_str("json"),
            ArtifactFormat::Blob => f.write_str("blob"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct JsonDump {
    class: String,
    #[serde(flatten)]
    model: LogisticRegression,
}

pub fn to_json(model: &LogisticRegression) -> Result<String, ServiceError> {
    let dump = JsonDump {
        class: MODEL_CLASS.to_string(),
        model: model.clone(),
    };
    serde_json::to_string_pretty(&dump).map_err(|e| ServiceError::Artifact(e.to_string()))
}

pub fn from_json(raw: &str) -> Result<LogisticRegression, ServiceError> {
    let dump: JsonDump = serde_json::from_str(raw)
        .map_err(|e| ServiceError::Artifact(format!("invalid model json: {e}")))?;
    if dump.class != MODEL_CLASS {
        return Err(ServiceError::Artifact(format!(
            "unsupported model class '{}'",
            dump.class
        )));
    }
    dump.model.validate()?;
    Ok(dump.model)
}

pub fn to_blob(model: &LogisticRegression) -> Result<Vec<u8>, ServiceError> {
    let payload = bincode::serde::encode_to_vec(model, bincode::config::standard())
        .map_err(|e| ServiceError::Artifact(e.to_string()))?;
    let mut bytes = Vec::with_capacity(BLOB_MAGIC.len() + 1 + payload.len());
    bytes.extend_from_slice(BLOB_MAGIC);
    bytes.push(BLOB_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn from_blob(bytes: &[u8]) -> Result<LogisticRegression, ServiceError> {
    let header_len = BLOB_MAGIC.len() + 1;
    if bytes.len() < header_len || &bytes[..BLOB_MAGIC.len()] != BLOB_MAGIC {
        return Err(ServiceError::Artifact("not a model blob".into()));
    }
    let version = bytes[BLOB_MAGIC.len()];
    if version != BLOB_VERSION {
        return Err(ServiceError::Artifact(format!(
            "unsupported blob version {version}"
        )));
    }
    let (model, read): (LogisticRegression, usize) =
        bincode::serde::decode_from_slice(&bytes[header_len..], bincode::config::standard())
            .map_err(|e| ServiceError::Artifact(format!("corrupt model blob: {e}")))?;
    if header_len + read != bytes.len() {
        return Err(ServiceError::Artifact("trailing bytes after model blob".into()));
    }
    model.validate()?;
    Ok(model)
}

pub fn load(path: &Path, format: ArtifactFormat) -> Result<LogisticRegression, ServiceError> {
    if !path.exists() {
        return Err(ServiceError::Artifact(format!(
            "model artifact missing: {}",
            path.display()
        )));
    }
    match format {
        ArtifactFormat::Json => from_json(&fs::read_to_string(path)?),
        ArtifactFormat::Blob => from_blob(&fs::read(path)?),
    }
}

pub fn save(
    model: &LogisticRegression,
    path: &Path,
    format: ArtifactFormat,
) -> Result<(), ServiceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    match format {
        ArtifactFormat::Json => fs::write(path, to_json(model)?)?,
        ArtifactFormat::Blob => fs::write(path, to_blob(model)?)?,
    }
    Ok(())
}

/// Rewrites a native blob as a JSON dump. The destination defaults to the
/// source path with a `.json` extension.
pub fn convert(source: &Path, destination: Option<&Path>) -> Result<PathBuf, ServiceError> {
    let model = load(source, ArtifactFormat::Blob)?;
    let destination = destination
        .map(Path::to_path_buf)
        .unwrap_or_else(|| source.with_extension("json"));
    if destination == source {
        return Err(ServiceError::BadRequest(
            "conversion would overwrite the source blob".into(),
        ));
    }
    save(&model, &destination, ArtifactFormat::Json)?;
    info!(
        source = %source.display(),
        destination = %destination.display(),
        "converted model blob to json"
    );
    Ok(destination)
}
