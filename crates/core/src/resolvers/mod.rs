//! Lookup collaborators used while building HL7 v2 messages.

mod hgnc;
mod pubmed;

pub use hgnc::HgncTable;
pub use pubmed::PubmedClient;

use crate::MtbResult;

/// HGNC identity of a gene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HgncGene {
    /// e.g. `HGNC:1097`
    pub hgnc_id: String,
    /// Approved symbol, e.g. `BRAF`
    pub symbol: String,
}

pub trait GeneNameResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns [`crate::MtbError::GeneNotFound`] if the Entrez id is unknown.
    fn resolve(&self, entrez_gene_id: u64) -> MtbResult<HgncGene>;
}

pub trait PublicationResolver: Send + Sync {
    /// Display text (title) of a publication.
    fn resolve(&self, pmid: u64) -> MtbResult<String>;
}
