//! Object lookup by attribute template.

use super::error::{Result, TokenError};
use super::module::{ObjectId, TokenModule};
use super::template::{Attribute, ObjectClass, Template};
use super::Token;

/// Number of handles requested per page
pub const SEARCH_BATCH_SIZE: usize = 20;

/// All objects matching `template`, in the order the module reports them.
///
/// Pages until the module returns an empty batch. The search is finalized
/// when it goes out of scope, including when a page fails.
pub fn find<M: TokenModule + ?Sized>(module: &mut M, template: &Template) -> Result<Vec<ObjectId>> {
    let mut search = module
        .find_objects(template)
        .map_err(|e| TokenError::module("find objects init", template.describe(), e))?;

    let mut objects = Vec::new();
    loop {
        // The module's "more results" hint is unreliable, so page until empty
        let batch = search
            .next_batch(SEARCH_BATCH_SIZE)
            .map_err(|e| TokenError::module("find objects", template.describe(), e))?;

        if batch.is_empty() {
            break;
        }
        objects.extend(batch);
    }

    tracing::debug!(
        template = %template.describe(),
        count = objects.len(),
        "Object search complete"
    );
    Ok(objects)
}

/// The single object matching `template`
pub fn resolve_unique<M: TokenModule + ?Sized>(
    module: &mut M,
    template: &Template,
) -> Result<ObjectId> {
    let objects = find(module, template)?;

    match objects.as_slice() {
        [] => Err(TokenError::KeyNotFound(template.describe())),
        [object] => Ok(*object),
        _ => Err(TokenError::AmbiguousKey {
            template: template.describe(),
            count: objects.len(),
        }),
    }
}

/// Template selecting keys of `class`, narrowed by label and/or id when given.
///
/// Empty strings count as "not given".
pub fn key_template(class: ObjectClass, label: Option<&str>, id: Option<&str>) -> Template {
    let label = label
        .filter(|l| !l.is_empty())
        .map(|l| Attribute::Label(l.to_string()));
    let id = id
        .filter(|i| !i.is_empty())
        .map(|i| Attribute::Id(i.as_bytes().to_vec()));

    std::iter::once(Attribute::Class(class))
        .chain(label)
        .chain(id)
        .collect()
}

impl<M: TokenModule> Token<M> {
    /// Objects matching `template`, see [`find`]
    pub fn find(&mut self, template: &Template) -> Result<Vec<ObjectId>> {
        find(self.module_mut(), template)
    }

    /// The single object matching `template`, see [`resolve_unique`]
    pub fn resolve_unique(&mut self, template: &Template) -> Result<ObjectId> {
        resolve_unique(self.module_mut(), template)
    }
}
