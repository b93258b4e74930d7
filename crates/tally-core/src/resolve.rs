//! Entity resolution — natural key to stable reference id.
//!
//! This is an optimistic insert with a fallback read, not a lock. Each attempt
//! looks the key up, inserts it if absent (the store silently ignores a
//! duplicate), then reads it back. Whichever writer wins the store's
//! uniqueness constraint, every caller reads back the same surviving row.

use tracing::{debug, warn};

use crate::{
  Error, Result,
  receipt::{NaturalKey, NewReference, ReferenceId, ReferenceKind},
  store::ReferenceStore,
};

pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 3;

/// Resolves merchants and products against a [`ReferenceStore`].
pub struct Resolver<'s, S> {
  store:        &'s S,
  max_attempts: u32,
}

impl<'s, S: ReferenceStore> Resolver<'s, S> {
  pub fn new(store: &'s S) -> Self { Self { store, max_attempts: DEFAULT_RESOLVE_ATTEMPTS } }

  pub fn with_max_attempts(mut self, attempts: u32) -> Self {
    self.max_attempts = attempts.max(1);
    self
  }

  /// Find or create the entity of `kind` named by `key`.
  pub async fn resolve(&self, kind: ReferenceKind, key: &NaturalKey) -> Result<ReferenceId> {
    self.resolve_reference(NewReference::new(kind, key.clone())).await
  }

  /// Like [`Resolver::resolve`], with the extra columns used only when the
  /// row is created.
  pub async fn resolve_reference(&self, reference: NewReference) -> Result<ReferenceId> {
    let kind = reference.kind;

    for attempt in 1..=self.max_attempts {
      if let Some(id) = self.lookup(kind, &reference.key.key).await? {
        return Ok(id);
      }

      let inserted = self
        .store
        .insert_reference_if_absent(reference.clone())
        .await
        .map_err(Error::from_store)?;

      if let Some(id) = self.lookup(kind, &reference.key.key).await? {
        if inserted {
          debug!(%kind, key = %reference.key.key, id, "created reference row");
        } else {
          debug!(%kind, key = %reference.key.key, id, "lost insert race, using surviving row");
        }
        return Ok(id);
      }

      warn!(%kind, key = %reference.key.key, attempt, "reference row not readable after insert");
    }

    Err(Error::ResolutionConflict {
      kind,
      key: reference.key.key,
      attempts: self.max_attempts,
    })
  }

  async fn lookup(&self, kind: ReferenceKind, key: &str) -> Result<Option<ReferenceId>> {
    self
      .store
      .lookup_reference(kind, key.to_owned())
      .await
      .map_err(Error::from_store)
  }
}
