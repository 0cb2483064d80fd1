use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchBackend {
    /// Scores candidates in process after loading them from SQLite.
    Linear,
    /// Pushes scoring into SQL through the `vec_cosine_distance` function.
    Indexed,
}

impl SearchBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchBackend::Linear => "linear",
            SearchBackend::Indexed => "indexed",
        }
    }
}

impl FromStr for SearchBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "scan" => Ok(SearchBackend::Linear),
            "indexed" | "index" | "sql" => Ok(SearchBackend::Indexed),
            other => Err(format!("unknown search backend: {other}")),
        }
    }
}

/// Score bands used to tier bulk duplicate candidates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceBands {
    pub high_single: f32,
    pub high_both: f32,
    pub medium_single: f32,
    pub medium_both: f32,
}

impl Default for ConfidenceBands {
    fn default() -> Self {
        Self { high_single: 0.9, high_both: 0.8, medium_single: 0.8, medium_both: 0.7 }
    }
}

#[derive(Clone, Debug)]
pub struct ClusterSettings {
    pub default_similarity: f32,
    pub default_confidence: f32,
    pub prototype_sample: usize,
    pub duplicate_face_sample: usize,
    pub batch_size: usize,
    pub batch_target_fraction: f32,
    pub batch_pause_ms: u64,
    pub job_stale_secs: i64,
    pub bands: ConfidenceBands,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            default_similarity: 0.7,
            default_confidence: 0.5,
            prototype_sample: 50,
            duplicate_face_sample: 5,
            batch_size: 500,
            batch_target_fraction: 0.1,
            batch_pause_ms: 100,
            job_stale_secs: 3600,
            bands: ConfidenceBands::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    pub pool_size: u32,
    pub search_backend: SearchBackend,
    pub cluster: ClusterSettings,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("NAZR_DATA").unwrap_or_else(|_| "/nazr-data".to_string());
        let port = env_or("NAZR_PORT", 9161);
        let pool_size = env_or("NAZR_DB_POOL_SIZE", 10u32).max(1);
        let search_backend = env_or("NAZR_SEARCH_BACKEND", SearchBackend::Indexed);
        let d = ClusterSettings::default();
        let bands = ConfidenceBands {
            high_single: env_or("NAZR_DUP_HIGH_SINGLE", d.bands.high_single),
            high_both: env_or("NAZR_DUP_HIGH_BOTH", d.bands.high_both),
            medium_single: env_or("NAZR_DUP_MEDIUM_SINGLE", d.bands.medium_single),
            medium_both: env_or("NAZR_DUP_MEDIUM_BOTH", d.bands.medium_both),
        };
        let cluster = ClusterSettings {
            default_similarity: env_or("NAZR_DEFAULT_SIMILARITY", d.default_similarity),
            default_confidence: env_or("NAZR_DEFAULT_CONFIDENCE", d.default_confidence),
            prototype_sample: env_or("NAZR_PROTOTYPE_SAMPLE", d.prototype_sample).max(1),
            duplicate_face_sample: env_or("NAZR_DUPLICATE_FACE_SAMPLE", d.duplicate_face_sample).max(1),
            batch_size: env_or("NAZR_BATCH_SIZE", d.batch_size).max(1),
            batch_target_fraction: env_or("NAZR_BATCH_TARGET_FRACTION", d.batch_target_fraction).clamp(0.0, 1.0),
            batch_pause_ms: env_or("NAZR_BATCH_PAUSE_MS", d.batch_pause_ms),
            job_stale_secs: env_or("NAZR_JOB_STALE_SECS", d.job_stale_secs),
            bands,
        };
        Self {
            data: PathBuf::from(data),
            port,
            pool_size,
            search_backend,
            cluster,
        }
    }
}
