use super::{GeneNameResolver, HgncGene};
use crate::{MtbError, MtbResult};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Entrez id -> HGNC gene, loaded from the HGNC complete-set TSV.
///
/// The header row must name the `hgnc_id`, `symbol` and `entrez_id` columns; any other columns
/// are ignored. Rows without an Entrez id are skipped.
#[derive(Clone, Debug, Default)]
pub struct HgncTable {
    genes: HashMap<u64, HgncGene>,
}

fn column(header: &[&str], name: &str) -> MtbResult<usize> {
    header
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| MtbError::Config(format!("HGNC table has no {name} column")))
}

impl HgncTable {
    pub fn from_path(path: &Path) -> MtbResult<Self> {
        let file = File::open(path).map_err(|e| {
            MtbError::Config(format!("cannot open HGNC table {}: {e}", path.display()))
        })?;
        let table = Self::from_reader(file)?;
        tracing::info!(genes = table.len(), path = %path.display(), "loaded HGNC table");
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> MtbResult<Self> {
        let mut lines = BufReader::new(reader).lines();
        let header_line = lines
            .next()
            .transpose()?
            .ok_or_else(|| MtbError::Config("HGNC table is empty".into()))?;
        let header: Vec<&str> = header_line.split('\t').collect();
        let hgnc_col = column(&header, "hgnc_id")?;
        let symbol_col = column(&header, "symbol")?;
        let entrez_col = column(&header, "entrez_id")?;

        let mut genes = HashMap::new();
        for line in lines {
            let line = line?;
            let fields: Vec<&str> = line.split('\t').collect();
            let Some(entrez) = fields
                .get(entrez_col)
                .and_then(|v| v.trim().parse::<u64>().ok())
            else {
                continue;
            };
            let field = |idx: usize| fields.get(idx).map(|v| v.trim().to_string()).unwrap_or_default();
            genes.insert(
                entrez,
                HgncGene {
                    hgnc_id: field(hgnc_col),
                    symbol: field(symbol_col),
                },
            );
        }
        Ok(Self { genes })
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

impl GeneNameResolver for HgncTable {
    fn resolve(&self, entrez_gene_id: u64) -> MtbResult<HgncGene> {
        self.genes
            .get(&entrez_gene_id)
            .cloned()
            .ok_or(MtbError::GeneNotFound(entrez_gene_id))
    }
}
