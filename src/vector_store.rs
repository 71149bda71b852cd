//! # VectorStore
//!
//! The searchable reference corpus. Wraps a [HNSW](https://arxiv.org/abs/1603.09320)
//! approximate nearest-neighbor index (`hora` crate) together with the ordered list
//! of [`Document`]s it was built from; the HNSW id of a vector is the position of its
//! document in that list.
//!
//! ## Responsibilities
//! - **Construction**: embeds a batch of documents (in parallel, with a progress bar) and
//!   builds the graph once. There is no incremental update.
//! - **Search**: returns the `k` nearest documents with their Euclidean distance,
//!   best (smallest distance) first.
//! - **Persistence**: exactly two artifacts in one directory:
//!   - [`INDEX_FILE`]: the HNSW graph, dumped by `hora`;
//!   - [`DOCSTORE_FILE`]: documents, dimension and embedding model id, `bincode`-encoded.
//!
//!   Neither file is usable alone. [`verify_artifacts`] is the validity check used by the
//!   lifecycle manager and [`VectorStore::load`] refuses to open a partial set. Saves go
//!   through `.partial` names and a rename, so a crash mid-save leaves no usable pair.
//!
//! Once built or loaded a store is only read. Share it across tasks with `Arc`.
//!
//! ## Quick Example
//! ```no_run
//! use sage_rag::dataset::Document;
//! use sage_rag::embedding::{Embedder, SentenceEmbeddingsModel};
//! use sage_rag::vector_store::VectorStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = SentenceEmbeddingsModel::load("sentence-transformers/all-MiniLM-L6-v2", "main")?;
//! let docs = vec![Document::new("Be kind."), Document::new("Practice patience.")];
//! let mut store = VectorStore::build_from_documents(docs, &model)?;
//! store.save(std::path::Path::new("vector_index"))?;
//! let hits = store.search(&model.embed("How to be happier?")?, 1)?;
//! println!("{}", hits[0].document.text);
//! # Ok(()) }
//! ```

use hora::core::ann_index::{ANNIndex, SerializableIndex};
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dataset::Document;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};

/// File name of the HNSW graph artifact.
pub const INDEX_FILE: &str = "index.hnsw";
/// File name of the document-store artifact.
pub const DOCSTORE_FILE: &str = "index.docstore";
/// Both artifacts, in the order they are written and transferred.
pub const ARTIFACT_FILES: [&str; 2] = [INDEX_FILE, DOCSTORE_FILE];

const DOCSTORE_VERSION: u32 = 1;

/// `true` only when both artifacts are present as regular files in `dir`.
pub fn artifacts_exist(dir: &Path) -> bool {
    ARTIFACT_FILES.iter().all(|name| dir.join(name).is_file())
}

/// Paths of both artifacts inside `dir`.
pub fn artifact_paths(dir: &Path) -> [PathBuf; 2] {
    ARTIFACT_FILES.map(|name| dir.join(name))
}

/// Temporary name an artifact is written under before being renamed into place.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Check that `dir` holds a loadable pair: both files present, a non-empty graph and a
/// document store that decodes. Cheaper than [`VectorStore::load`], which also reads
/// the graph.
pub fn verify_artifacts(dir: &Path) -> Result<()> {
    if !artifacts_exist(dir) {
        return Err(RagError::IndexBuild(format!(
            "index artifacts missing in {}",
            dir.display()
        )));
    }
    let [index_path, docstore_path] = artifact_paths(dir);
    if fs::metadata(&index_path)?.len() == 0 {
        return Err(RagError::IndexBuild(format!(
            "empty HNSW index {}",
            index_path.display()
        )));
    }
    read_docstore(&docstore_path).map(|_| ())
}

fn read_docstore(path: &Path) -> Result<DocStore> {
    let bytes = fs::read(path)?;
    let (docstore, _): (DocStore, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| RagError::IndexBuild(format!("corrupt document store: {e}")))?;
    if docstore.version != DOCSTORE_VERSION {
        return Err(RagError::IndexBuild(format!(
            "unsupported document store version {}",
            docstore.version
        )));
    }
    Ok(docstore)
}

/// A document paired with its distance to the query (lower is more similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct DocStore {
    version: u32,
    dimension: usize,
    embedding_model_id: String,
    documents: Vec<Document>,
}

/// HNSW index plus the documents it points at.
pub struct VectorStore {
    index: HNSWIndex<f32, usize>,
    dimension: usize,
    documents: Vec<Document>,
    embedding_model_id: String,
    built: bool,
}

impl VectorStore {
    /// Create an empty, unbuilt store for vectors of length `dimension`.
    pub fn new(dimension: usize, embedding_model_id: impl Into<String>) -> Self {
        Self {
            index: HNSWIndex::new(dimension, &HNSWParams::<f32>::default()),
            dimension,
            documents: Vec::new(),
            embedding_model_id: embedding_model_id.into(),
            built: false,
        }
    }

    /// Embed every document with `embedder` and build the index.
    ///
    /// Embedding runs on the rayon pool; the resulting vectors keep the input order, so
    /// the store holds exactly one entry per document, in the order given.
    ///
    /// # Errors
    /// The first embedding failure aborts the build and is returned as
    /// [`RagError::IndexBuild`].
    pub fn build_from_documents(documents: Vec<Document>, embedder: &dyn Embedder) -> Result<Self> {
        info!(
            "Embedding {} documents with {}",
            documents.len(),
            embedder.model_id()
        );

        let bar = ProgressBar::new(documents.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} embedding [{bar:40}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let vectors: Vec<Vec<f32>> = documents
            .par_iter()
            .progress_with(bar.clone())
            .map(|doc| embedder.embed(&doc.text))
            .collect::<Result<Vec<_>>>()
            .map_err(RagError::into_index_build)?;
        bar.finish_and_clear();

        let mut store = Self::new(embedder.dimension(), embedder.model_id());
        for (document, vector) in documents.into_iter().zip(vectors) {
            store.add(document, &vector)?;
        }
        store.build()?;
        Ok(store)
    }

    /// Insert one document and its vector. Returns the assigned id.
    ///
    /// Call [`VectorStore::build`] once after the last insert.
    pub fn add(&mut self, document: Document, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(RagError::IndexBuild(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        let id = self.documents.len();
        self.index
            .add(vector, id)
            .map_err(|e| RagError::IndexBuild(e.to_string()))?;
        self.documents.push(document);
        self.built = false;
        Ok(id)
    }

    /// Finalize (build) the HNSW graph. An empty store needs no graph.
    pub fn build(&mut self) -> Result<()> {
        if !self.documents.is_empty() {
            self.index
                .build(Metric::Euclidean)
                .map_err(|e| RagError::IndexBuild(e.to_string()))?;
        }
        self.built = true;
        Ok(())
    }

    /// The `k` nearest documents to `vector`, smallest distance first.
    ///
    /// # Errors
    /// [`RagError::Retrieval`] on a dimension mismatch, an unbuilt store, or an index
    /// entry that points past the document list.
    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        if vector.len() != self.dimension {
            return Err(RagError::Retrieval(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if !self.built {
            return Err(RagError::Retrieval("index has not been built".into()));
        }
        if k == 0 || self.documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::with_capacity(k);
        for (node, distance) in self.index.search_nodes(vector, k) {
            let id = (*node.idx())
                .ok_or_else(|| RagError::Retrieval("index node without id".into()))?;
            let document = self.documents.get(id).ok_or_else(|| {
                RagError::Retrieval(format!("index references unknown document {id}"))
            })?;
            hits.push(ScoredDocument {
                document: document.clone(),
                score: distance,
            });
        }
        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(k);
        Ok(hits)
    }

    /// Write both artifacts into `dir`, creating it if needed.
    ///
    /// Each artifact is written under a `.partial` name and renamed into place, the
    /// document store last, so an interrupted save never leaves a complete-looking pair.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let [index_path, docstore_path] = artifact_paths(dir);
        let index_partial = partial_path(&index_path);
        let docstore_partial = partial_path(&docstore_path);

        let index_partial_str = index_partial.to_str().ok_or_else(|| {
            RagError::IndexBuild(format!("non UTF-8 path {}", index_partial.display()))
        })?;
        self.index
            .dump(index_partial_str)
            .map_err(|e| RagError::IndexBuild(e.to_string()))?;

        let docstore = DocStore {
            version: DOCSTORE_VERSION,
            dimension: self.dimension,
            embedding_model_id: self.embedding_model_id.clone(),
            documents: self.documents.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&docstore, bincode::config::standard())
            .map_err(|e| RagError::IndexBuild(e.to_string()))?;
        fs::write(&docstore_partial, bytes)?;

        fs::rename(&index_partial, &index_path)?;
        fs::rename(&docstore_partial, &docstore_path)?;

        debug!("Saved {} documents to {}", self.documents.len(), dir.display());
        Ok(())
    }

    /// Open the artifacts in `dir`.
    ///
    /// # Errors
    /// [`RagError::IndexBuild`] if either artifact is missing or unreadable.
    pub fn load(dir: &Path) -> Result<Self> {
        if !artifacts_exist(dir) {
            return Err(RagError::IndexBuild(format!(
                "index artifacts missing in {}",
                dir.display()
            )));
        }
        let [index_path, docstore_path] = artifact_paths(dir);
        let docstore = read_docstore(&docstore_path)?;

        let index_path_str = index_path
            .to_str()
            .ok_or_else(|| RagError::IndexBuild(format!("non UTF-8 path {}", index_path.display())))?
            .to_string();
        // hora panics instead of erroring on unreadable files
        let index = std::panic::catch_unwind(move || {
            HNSWIndex::<f32, usize>::load(&index_path_str)
        })
        .map_err(|_| RagError::IndexBuild("corrupt HNSW index".into()))?
        .map_err(|e| RagError::IndexBuild(e.to_string()))?;

        info!(
            "Loaded index with {} documents from {}",
            docstore.documents.len(),
            dir.display()
        );
        Ok(Self {
            index,
            dimension: docstore.dimension,
            documents: docstore.documents,
            embedding_model_id: docstore.embedding_model_id,
            built: true,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model the stored vectors were produced with.
    pub fn embedding_model_id(&self) -> &str {
        &self.embedding_model_id
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Deterministic bag-of-words embedder for tests: each lowercase word bumps one of
    /// `DIM` buckets, then the vector is L2-normalised.
    pub(crate) struct WordHashEmbedder;

    pub(crate) const DIM: usize = 16;

    impl Embedder for WordHashEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0f32; DIM];
            for word in text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
            {
                let bucket = word
                    .to_lowercase()
                    .bytes()
                    .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize))
                    % DIM;
                v[bucket] += 1.0;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                v.iter_mut().for_each(|x| *x /= norm);
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_id(&self) -> &str {
            "test/word-hash"
        }
    }

    pub(crate) fn sample_documents() -> Vec<Document> {
        [
            "Be kind.",
            "Practice patience.",
            "Rust is a systems programming language.",
            "Patience is bitter, but its fruit is sweet.",
            "Kindness is a language the deaf can hear.",
        ]
        .into_iter()
        .enumerate()
        .map(|(i, t)| Document::new(t).with_metadata("row", i.to_string()))
        .collect()
    }

    #[test]
    fn test_one_entry_per_document_in_order() {
        let docs = sample_documents();
        let store = VectorStore::build_from_documents(docs.clone(), &WordHashEmbedder).unwrap();
        assert_eq!(store.len(), docs.len());
        assert_eq!(store.documents(), docs.as_slice());
        assert_eq!(store.embedding_model_id(), "test/word-hash");
    }

    #[test]
    fn test_search_bounded_by_k_and_sorted() {
        let store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        let q = WordHashEmbedder.embed("patience is sweet").unwrap();

        for k in 1..=7 {
            let hits = store.search(&q, k).unwrap();
            assert!(hits.len() <= k);
            assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
        }
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        let q = WordHashEmbedder.embed("Practice patience.").unwrap();
        let hits = store.search(&q, 1).unwrap();
        assert_eq!(hits[0].document.text, "Practice patience.");
        assert!(hits[0].score.abs() < 1e-4);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        assert!(matches!(
            store.search(&[1.0, 2.0], 1),
            Err(RagError::Retrieval(_))
        ));
        assert!(matches!(
            store.add(Document::new("x"), &[1.0]),
            Err(RagError::IndexBuild(_))
        ));
    }

    #[test]
    fn test_unbuilt_store_refuses_search() {
        let mut store = VectorStore::new(DIM, "test/word-hash");
        let v = WordHashEmbedder.embed("Be kind.").unwrap();
        store.add(Document::new("Be kind."), &v).unwrap();
        assert!(store.search(&v, 1).is_err());
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let store = VectorStore::build_from_documents(Vec::new(), &WordHashEmbedder).unwrap();
        assert!(store.is_empty());
        let q = WordHashEmbedder.embed("anything").unwrap();
        assert!(store.search(&q, 5).unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip_gives_identical_results() {
        let dir = tempdir().unwrap();
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        store.save(dir.path()).unwrap();
        assert!(artifacts_exist(dir.path()));

        let loaded = VectorStore::load(dir.path()).unwrap();
        assert_eq!(loaded.documents(), store.documents());
        assert_eq!(loaded.dimension(), DIM);

        for query in ["be kind", "patience", "rust language"] {
            let q = WordHashEmbedder.embed(query).unwrap();
            assert_eq!(store.search(&q, 3).unwrap(), loaded.search(&q, 3).unwrap());
        }
    }

    #[test]
    fn test_partial_artifacts_are_invalid() {
        let dir = tempdir().unwrap();
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        store.save(dir.path()).unwrap();

        fs::remove_file(dir.path().join(DOCSTORE_FILE)).unwrap();
        assert!(!artifacts_exist(dir.path()));
        assert!(matches!(
            VectorStore::load(dir.path()),
            Err(RagError::IndexBuild(_))
        ));
    }

    #[test]
    fn test_corrupt_docstore_is_reported() {
        let dir = tempdir().unwrap();
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        store.save(dir.path()).unwrap();
        fs::write(dir.path().join(DOCSTORE_FILE), b"garbage").unwrap();
        assert!(VectorStore::load(dir.path()).is_err());
    }

    #[test]
    fn test_save_leaves_no_partial_files() {
        let dir = tempdir().unwrap();
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        store.save(dir.path()).unwrap();

        for path in artifact_paths(dir.path()) {
            assert!(path.is_file());
            assert!(!partial_path(&path).exists());
        }
        assert!(verify_artifacts(dir.path()).is_ok());
    }

    #[test]
    fn test_interrupted_save_is_not_a_ready_index() {
        let dir = tempdir().unwrap();
        let [index_path, docstore_path] = artifact_paths(dir.path());
        fs::write(partial_path(&index_path), b"graph").unwrap();
        fs::write(partial_path(&docstore_path), b"docs").unwrap();

        assert!(!artifacts_exist(dir.path()));
        assert!(verify_artifacts(dir.path()).is_err());
    }

    #[test]
    fn test_truncated_docstore_fails_verification() {
        let dir = tempdir().unwrap();
        let mut store =
            VectorStore::build_from_documents(sample_documents(), &WordHashEmbedder).unwrap();
        store.save(dir.path()).unwrap();
        fs::write(dir.path().join(DOCSTORE_FILE), b"").unwrap();

        assert!(artifacts_exist(dir.path()));
        assert!(matches!(
            verify_artifacts(dir.path()),
            Err(RagError::IndexBuild(_))
        ));
    }

    #[test]
    fn test_partial_path_keeps_directory() {
        assert_eq!(
            partial_path(Path::new("vector_index/index.hnsw")),
            PathBuf::from("vector_index/index.hnsw.partial")
        );
    }

    #[test]
    fn test_word_hash_embedder_is_deterministic() {
        let a = WordHashEmbedder.embed("Be kind.").unwrap();
        let b = WordHashEmbedder.embed("be KIND").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DIM);
    }
}
