//! Process-wide schema registry.
//!
//! Resource declarations are collected by a [`SchemaRegistryBuilder`] and
//! finalized in one pass: relations are bound to their owners, backrefs are
//! synthesized onto their targets, and every description is frozen behind an
//! `Arc`. Components receive the registry by reference; nothing is discovered
//! at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::description::{ResourceBuilder, ResourceDescription};
use super::related::RelatedField;
use crate::error::{SchemaError, StorageResult};

/// Immutable lookup of resource descriptions by name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    resources: HashMap<String, Arc<ResourceDescription>>,
    order: Vec<String>,
}

impl SchemaRegistry {
    /// Starts collecting declarations.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Looks up a description.
    pub fn get(&self, name: &str) -> Option<&Arc<ResourceDescription>> {
        self.resources.get(name)
    }

    /// Looks up a description, failing for unknown names.
    pub fn resource(&self, name: &str) -> StorageResult<&Arc<ResourceDescription>> {
        self.resources.get(name).ok_or_else(|| {
            SchemaError::UnknownResource {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Descriptions in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceDescription>> {
        self.order.iter().filter_map(|name| self.resources.get(name))
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collects resource declarations.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    resources: Vec<ResourceBuilder>,
}

impl SchemaRegistryBuilder {
    /// Adds a resource declaration.
    pub fn resource(mut self, resource: ResourceBuilder) -> Self {
        self.resources.push(resource);
        self
    }

    /// Binds relations, registers backrefs and freezes every description.
    pub fn build(mut self) -> Result<SchemaRegistry, SchemaError> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, resource) in self.resources.iter().enumerate() {
            if index.insert(resource.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateResource {
                    name: resource.name.clone(),
                });
            }
        }

        for resource in &mut self.resources {
            let owner = resource.name.clone();
            for related in &mut resource.related_fields {
                related.bind(&owner);
            }
        }

        let mut inverses: Vec<(usize, RelatedField)> = Vec::new();
        for resource in &mut self.resources {
            for related in &mut resource.related_fields {
                let target = *index.get(related.target()).ok_or_else(|| {
                    SchemaError::UnknownResource {
                        name: related.target().to_string(),
                    }
                })?;
                if let Some(inverse) = related.synthesize_inverse() {
                    related.set_inverse(inverse.name());
                    inverses.push((target, inverse));
                }
            }
        }

        for (target, mut inverse) in inverses {
            let resource = &mut self.resources[target];
            if resource
                .related_fields
                .iter()
                .any(|r| r.name() == inverse.name())
                || resource.fields.iter().any(|f| f.name() == inverse.name())
            {
                return Err(SchemaError::DuplicateField {
                    resource: resource.name.clone(),
                    name: inverse.name().to_string(),
                });
            }
            debug!(
                resource = %resource.name,
                relation = %inverse.name(),
                hidden = inverse.is_hidden(),
                "Registered backref"
            );
            inverse.bind(&resource.name.clone());
            resource.related_fields.push(inverse);
        }

        let mut registry = SchemaRegistry::default();
        for resource in self.resources {
            let description = resource.finish()?;
            registry.order.push(description.name().to_string());
            registry
                .resources
                .insert(description.name().to_string(), Arc::new(description));
        }
        Ok(registry)
    }
}
