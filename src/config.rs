use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::{ArtifactFormat, OutputKind, Preprocessing};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub pima_model_path: PathBuf,
    pub pima_model_format: ArtifactFormat,
    pub resnet_module_path: PathBuf,
    pub class_index_path: PathBuf,
    pub preprocessing: Preprocessing,
    pub output_kind: OutputKind,
    pub top_k: usize,
    pub min_probability: f32,
    pub max_upload_bytes: usize,
    pub demo_page_path: PathBuf,
    pub geonames_db_path: Option<PathBuf>,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unparsable numbers
    /// fall back to their defaults; unknown enum values are errors.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| "127.0.0.1:5000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000));

        let pima_model_path = PathBuf::from(
            lookup("PIMA_MODEL_PATH")
                .unwrap_or_else(|| "models/pima-indians-diabetes.json".to_string()),
        );
        let pima_model_format = match lookup("PIMA_MODEL_FORMAT") {
            Some(raw) => raw.parse()?,
            None => ArtifactFormat::from_path(&pima_model_path),
        };

        let resnet_module_path = PathBuf::from(
            lookup("RESNET_MODULE_PATH").unwrap_or_else(|| "models/resnet50.pt".to_string()),
        );
        let class_index_path = PathBuf::from(
            lookup("IMAGENET_CLASS_INDEX_PATH")
                .unwrap_or_else(|| "models/imagenet_class_index.json".to_string()),
        );
        let preprocessing = match lookup("RESNET_PREPROCESS") {
            Some(raw) => raw.parse()?,
            None => Preprocessing::Torch,
        };
        let output_kind = match lookup("RESNET_OUTPUT") {
            Some(raw) => raw.parse()?,
            None => OutputKind::Logits,
        };

        let top_k = lookup("RESNET_TOP_K")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let min_probability = lookup("RESNET_MIN_PROBABILITY")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.1);
        let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10 * 1024 * 1024);

        let demo_page_path = PathBuf::from(
            lookup("DEMO_PAGE_PATH").unwrap_or_else(|| "views/ai-ml-demo.htm".to_string()),
        );
        let geonames_db_path = lookup("GEONAMES_DB_PATH").map(PathBuf::from);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            pima_model_path,
            pima_model_format,
            resnet_module_path,
            class_index_path,
            preprocessing,
            output_kind,
            top_k,
            min_probability,
            max_upload_bytes,
            demo_page_path,
            geonames_db_path,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA unavailable, using CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
