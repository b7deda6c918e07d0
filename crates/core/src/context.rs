//! Lookup context for FHIR -> JSON decoding.

use crate::repository::FhirRepository;
use crate::sample_id::SampleIdRules;
use crate::{MtbError, MtbResult};
use fhir::{Bundle, Reference, Resource};
use std::borrow::Cow;

/// What a decoder may consult to follow references: the resource embedded in the reference, the
/// Bundle being decoded, and finally the repository.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub rules: &'a SampleIdRules,
    pub repository: &'a dyn FhirRepository,
    pub bundle: Option<&'a Bundle>,
}

impl<'a> DecodeContext<'a> {
    pub fn new(rules: &'a SampleIdRules, repository: &'a dyn FhirRepository) -> Self {
        Self {
            rules,
            repository,
            bundle: None,
        }
    }

    pub fn with_bundle(mut self, bundle: &'a Bundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Resolve a reference without touching the repository.
    pub fn resolve<'r>(&'r self, reference: &'r Reference) -> Option<&'r Resource> {
        if let Some(embedded) = reference.resource.as_deref() {
            return Some(embedded);
        }
        let target = reference.reference.as_deref()?;
        self.bundle.and_then(|bundle| bundle.resolve(target))
    }

    /// Resolve a reference, falling back to an `_id` search on the repository.
    ///
    /// # Errors
    ///
    /// Returns [`MtbError::Mapping`] if the reference has no target or the repository does not
    /// know it, and propagates repository failures.
    pub fn fetch<'r>(
        &'r self,
        reference: &'r Reference,
        resource_type: &str,
    ) -> MtbResult<Cow<'r, Resource>> {
        if let Some(found) = self.resolve(reference) {
            return Ok(Cow::Borrowed(found));
        }

        let target = reference.reference.as_deref().ok_or_else(|| {
            MtbError::Mapping(format!("{resource_type} reference without target"))
        })?;
        let id = logical_id(target, resource_type);
        let found = self.repository.search(resource_type, &[("_id", id)])?;

        found
            .entry
            .into_iter()
            .filter_map(|entry| entry.resource)
            .find(|resource| resource.resource_type() == resource_type)
            .map(Cow::Owned)
            .ok_or_else(|| MtbError::Mapping(format!("{target} not found in repository")))
    }
}

/// Logical id out of `Type/id`, an absolute URL or a versioned reference.
fn logical_id<'t>(target: &'t str, resource_type: &str) -> &'t str {
    let prefix = format!("{resource_type}/");
    let tail = target
        .rsplit_once(prefix.as_str())
        .map(|(_, tail)| tail)
        .unwrap_or(target);
    tail.split('/').next().unwrap_or(tail)
}
