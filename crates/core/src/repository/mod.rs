//! FHIR repository collaborator.
//!
//! The mappers only need two capabilities from the clinical repository: executing a transaction
//! Bundle atomically, and running a search that returns a search-set Bundle. Two implementations
//! are provided:
//! - [`HttpFhirRepository`] talks to a FHIR server over its REST API
//! - [`InMemoryRepository`] keeps resources in process, for tests and for running without a server

mod http;
mod memory;

pub use http::HttpFhirRepository;
pub use memory::InMemoryRepository;

use crate::MtbResult;
use fhir::Bundle;

/// Search parameters as `(name, value)` pairs, e.g. `("identifier", "system|value")`.
pub type SearchParams<'a> = [(&'a str, &'a str)];

pub trait FhirRepository: Send + Sync {
    /// Execute a transaction Bundle and return the transaction-response Bundle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MtbError::Repository`] if the repository rejects the transaction. A
    /// rejected transaction leaves the repository unchanged.
    fn transaction(&self, bundle: &Bundle) -> MtbResult<Bundle>;

    /// Search resources of one type. All pages are collected into one search-set Bundle.
    fn search(&self, resource_type: &str, params: &SearchParams<'_>) -> MtbResult<Bundle>;
}

/// Split a conditional query string (`a=b&c=d`) into parameter pairs.
pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_keeps_token_values_intact() {
        let params =
            parse_query("component-value-concept=http://www.ncbi.nlm.nih.gov/gene|673&subject=Patient/1");
        assert_eq!(
            params,
            vec![
                (
                    "component-value-concept".to_string(),
                    "http://www.ncbi.nlm.nih.gov/gene|673".to_string()
                ),
                ("subject".to_string(), "Patient/1".to_string()),
            ]
        );
    }
}
