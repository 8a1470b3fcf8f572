//! Checksums, listings and bulk cleanup of token objects.

use serde::Serialize;

use super::error::{Result, TokenError};
use super::module::{MechanismKind, ModuleError, ObjectId, TokenModule};
use super::resolver::key_template;
use super::template::{Attribute, AttributeKind, KeyType, ObjectClass, Template};
use super::Token;

const CHECKSUM_BLOCK: [u8; 16] = [0u8; 16];

/// What happened to one object during [`Token::delete_all_except`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Kept(String),
    Deleted(String),
    /// The object has no label and was deleted anyway
    DeletedUnlabeled,
    /// Processing stopped at this object
    Aborted(String),
}

/// Per-object outcomes of a bulk deletion, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub outcomes: Vec<(ObjectId, DeletionOutcome)>,
}

impl DeletionReport {
    /// Reason processing stopped early, if it did
    pub fn aborted(&self) -> Option<&str> {
        match self.outcomes.last() {
            Some((_, DeletionOutcome::Aborted(reason))) => Some(reason),
            _ => None,
        }
    }

    pub fn deleted_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    DeletionOutcome::Deleted(_) | DeletionOutcome::DeletedUnlabeled
                )
            })
            .count()
    }

    pub fn kept_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DeletionOutcome::Kept(_)))
            .count()
    }
}

/// Attributes of one object as reported by [`Token::list_objects`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub handle: u64,
    pub class: Option<ObjectClass>,
    pub key_type: Option<KeyType>,
    pub label: Option<String>,
    pub id: Option<String>,
}

/// One mechanism as reported by [`Token::list_mechanisms`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MechanismSummary {
    pub name: String,
    pub min_key_size: u64,
    pub max_key_size: u64,
    pub flags: Vec<&'static str>,
}

/// Read an attribute the object may legitimately lack
fn read_optional<M: TokenModule + ?Sized>(
    module: &mut M,
    object: ObjectId,
    kind: AttributeKind,
) -> Result<Option<Attribute>> {
    match module.get_attribute(object, kind) {
        Ok(attribute) => Ok(Some(attribute)),
        Err(ModuleError::AttributeTypeInvalid) => Ok(None),
        Err(e) => Err(TokenError::AttributeReadFailed {
            attribute: kind,
            reason: format!("object {}: {}", object, e),
        }),
    }
}

fn label_of(attribute: Option<Attribute>) -> Option<String> {
    match attribute {
        Some(Attribute::Label(label)) => Some(label),
        _ => None,
    }
}

impl<M: TokenModule> Token<M> {
    /// Encrypt a zero block under the secret key `label` with AES-CBC and a zero IV.
    ///
    /// The result only changes when the key value does, which makes it a cheap
    /// way to compare keys across tokens.
    pub fn checksum(&mut self, label: &str) -> Result<Vec<u8>> {
        let key = self.resolve_unique(&key_template(ObjectClass::SecretKey, Some(label), None))?;

        self.module_mut()
            .encrypt(MechanismKind::AesCbc { iv: [0u8; 16] }, key, &CHECKSUM_BLOCK)
            .map_err(|e| TokenError::module("encrypt", format!("label='{}'", label), e))
    }

    /// Destroy every object whose label is not in `keep`.
    ///
    /// Objects without a label are always destroyed. Any other failure to read
    /// a label, or to destroy an object, stops processing; objects handled
    /// before that point stay deleted.
    pub fn delete_all_except(&mut self, keep: &[String]) -> Result<DeletionReport> {
        let objects = self.find(&Template::new())?;
        let mut report = DeletionReport::default();

        for object in objects {
            let label = match self.module_mut().get_attribute(object, AttributeKind::Label) {
                Ok(attribute) => label_of(Some(attribute)),
                Err(ModuleError::AttributeTypeInvalid) => None,
                Err(e) => {
                    report.outcomes.push((
                        object,
                        DeletionOutcome::Aborted(format!("failed to get label: {}", e)),
                    ));
                    return Ok(report);
                }
            };

            if let Some(label) = &label {
                if keep.contains(label) {
                    report.outcomes.push((object, DeletionOutcome::Kept(label.clone())));
                    continue;
                }
            }

            match &label {
                Some(label) => tracing::info!(label = %label, "Deleting key"),
                None => tracing::warn!(
                    object = %object,
                    "Failed to get label for key, will delete anyway"
                ),
            }

            if let Err(e) = self.module_mut().destroy_object(object) {
                report.outcomes.push((
                    object,
                    DeletionOutcome::Aborted(format!("failed to destroy object: {}", e)),
                ));
                return Ok(report);
            }

            let outcome = match label {
                Some(label) => DeletionOutcome::Deleted(label),
                None => DeletionOutcome::DeletedUnlabeled,
            };
            report.outcomes.push((object, outcome));
        }

        Ok(report)
    }

    /// Objects carrying `label`, or every object, in discovery order
    pub fn list_objects(&mut self, label: Option<&str>) -> Result<Vec<ObjectSummary>> {
        let mut template = Template::new();
        if let Some(label) = label {
            template.push(Attribute::Label(label.to_string()));
        }

        let objects = self.find(&template)?;
        let mut summaries = Vec::with_capacity(objects.len());

        for object in objects {
            let module = self.module_mut();

            let class = match read_optional(module, object, AttributeKind::Class)? {
                Some(Attribute::Class(class)) => Some(class),
                _ => None,
            };
            let key_type = match read_optional(module, object, AttributeKind::KeyType)? {
                Some(Attribute::KeyType(key_type)) => Some(key_type),
                _ => None,
            };
            let label = label_of(read_optional(module, object, AttributeKind::Label)?);
            let id = match read_optional(module, object, AttributeKind::Id)? {
                Some(Attribute::Id(id)) => Some(String::from_utf8_lossy(&id).into_owned()),
                _ => None,
            };

            summaries.push(ObjectSummary {
                handle: object.get(),
                class,
                key_type,
                label,
                id,
            });
        }

        Ok(summaries)
    }

    /// Mechanisms supported by the slot, sorted by name
    pub fn list_mechanisms(&mut self) -> Result<Vec<MechanismSummary>> {
        let slot = self.slot();
        let descriptions = self
            .module_mut()
            .mechanisms(slot)
            .map_err(|e| TokenError::module("get mechanism list", format!("slot {}", slot), e))?;

        let mut mechanisms: Vec<MechanismSummary> = descriptions
            .into_iter()
            .map(|description| {
                let mut flags = description.flags.names();
                flags.sort_unstable();
                MechanismSummary {
                    name: description.name,
                    min_key_size: description.min_key_size,
                    max_key_size: description.max_key_size,
                    flags,
                }
            })
            .collect();

        mechanisms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(mechanisms)
    }
}
