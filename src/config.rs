use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

/// Default embedding model (384-dimension MiniLM, small and fast to load)
const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
/// Default similarity threshold for search results
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;
/// Default chunk size in words
const DEFAULT_CHUNK_SIZE: usize = 500;
/// Default overlap between consecutive chunks in words
const DEFAULT_CHUNK_OVERLAP: usize = 100;
/// Default listen address for the daemon
const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";
/// Default source document, resolved against the data directory
const DEFAULT_DOCUMENT: &str = "book.pdf";
/// Default cap on blocking worker threads in the daemon runtime
const DEFAULT_MAX_BLOCKING_THREADS: usize = 4;

/// Default number of results a search returns when the caller does not ask
pub const DEFAULT_TOP_K: usize = 3;

/// Configuration for the search daemon
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Source document, absolute or relative to the data directory
    #[serde(default = "default_document")]
    pub document: String,

    /// First page to extract from PDF sources (1-based)
    #[serde(default = "default_page_start")]
    pub page_start: usize,

    /// Last page to extract, inclusive; omit to read to the end
    #[serde(default)]
    pub page_end: Option<usize>,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Chunk size in words
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in words
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Similarity threshold [0.0, 1.0] applied to search results
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Cap on blocking worker threads in the daemon runtime
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            document: DEFAULT_DOCUMENT.to_string(),
            page_start: 1,
            page_end: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
            base_path: String::new(),
        }
    }
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_document() -> String {
    DEFAULT_DOCUMENT.to_string()
}

fn default_page_start() -> usize {
    1
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_similarity_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_max_blocking_threads() -> usize {
    DEFAULT_MAX_BLOCKING_THREADS
}

impl Config {
    fn validate(&mut self) {
        if self.max_blocking_threads == 0 {
            self.max_blocking_threads = 1
        }

        if self.listen_address.trim().is_empty() {
            panic!("listen_address must not be empty");
        }

        if self.chunk_size == 0 {
            panic!("chunk_size must be greater than 0");
        }

        if self.chunk_overlap >= self.chunk_size {
            panic!(
                "chunk_overlap must be smaller than chunk_size, got {} >= {}",
                self.chunk_overlap, self.chunk_size
            );
        }

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            panic!(
                "similarity_threshold must be between 0.0 and 1.0, got {}",
                self.similarity_threshold
            );
        }

        if self.page_start == 0 {
            panic!("page_start is 1-based and must be greater than 0");
        }

        if let Some(page_end) = self.page_end {
            if page_end < self.page_start {
                panic!(
                    "page_end must not be smaller than page_start, got {} < {}",
                    page_end, self.page_start
                );
            }
        }
    }

    pub fn load() -> Self {
        Self::load_with(&get_base_path())
    }

    pub fn load_with(base_path: &str) -> Self {
        let config_path = Path::new(base_path).join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::create_dir_all(base_path).expect("couldnt create config directory");
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("couldnt write default config");
        }

        let config_str =
            String::from_utf8(std::fs::read(&config_path).expect("couldnt read config"))
                .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        std::fs::create_dir_all(&self.base_path).expect("couldnt create config directory");

        let config_path = Path::new(&self.base_path).join("config.yaml");
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(config_path, config_str.as_bytes()).expect("couldnt write config");
    }

    pub fn base_path(&self) -> &Path {
        Path::new(&self.base_path)
    }

    /// Directory holding the persisted artifacts and the default document.
    pub fn data_dir(&self) -> PathBuf {
        Path::new(&self.base_path).join("data")
    }

    /// Absolute path of the source document.
    pub fn document_path(&self) -> PathBuf {
        let document = Path::new(&self.document);
        if document.is_absolute() {
            document.to_path_buf()
        } else {
            self.data_dir().join(document)
        }
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.data_dir().join("vectors.bin")
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.data_dir().join("chunks.json")
    }
}

/// Resolve the base directory: `DOCSEARCH_BASE_PATH` or a home default.
pub fn get_base_path() -> String {
    std::env::var("DOCSEARCH_BASE_PATH").unwrap_or_else(|_| {
        let home = my_home()
            .expect("Could not determine home directory")
            .expect("Home directory path is empty");
        format!("{}/.local/share/docsearch", home.to_string_lossy())
    })
}
