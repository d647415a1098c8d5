//! Hybrid vector index: storage adapters, sparse encoding, retrieval and resync.

pub mod error;
pub mod folder_cache;
pub mod folder_structure;
pub mod hybrid;
pub mod in_memory_store;
pub mod pinecone;
pub mod provision;
pub mod resync;
pub mod retriever;
pub mod sparse;
pub mod types;
pub mod vector_store;

pub use error::IndexError;
pub use folder_cache::{FolderStructureStore, InMemoryFolderStore, SqliteFolderStore};
pub use hybrid::hybrid_scale;
pub use in_memory_store::InMemoryVectorStore;
pub use pinecone::PineconeStore;
pub use provision::IndexProvisioner;
pub use resync::{ResyncConfig, ResyncPipeline, UpsertSummary};
pub use retriever::{HybridRetriever, RetrievalParams};
pub use sparse::Bm25Encoder;
pub use types::{Chunk, DocumentMetadata, Namespace, RetrievedDocument, SparseVector, VectorRecord};
pub use vector_store::{IndexHandle, IndexSpec, VectorStore};
