//! Workflow identity.
//!
//! A [`WorkflowIdentifier`] names the *kind* of a workflow, not an instance. The runtime uses
//! it (together with a render key) to decide whether a child requested in a render pass is the
//! same child that ran in the previous pass.
//!
//! An identifier can stand in for another one: an impostor wraps a "real" identifier so that
//! e.g. a generic adapter workflow is told apart by what it adapts. Equality compares every
//! link of the chain, so two equal identifiers always resolve to the same real type.

use std::any::type_name;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::codec::{expect_exhausted, get_u8, get_utf8_with_length, put_utf8_with_length};
use crate::error::CoreError;

const NO_PROXY_IDENTIFIER_TAG: u8 = 0;
const PROXY_IDENTIFIER_TAG: u8 = 1;

/// Longest impostor chain accepted when parsing, counting the real identifier.
const MAX_CHAIN_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentifierType {
  /// Can be written into snapshots and parsed back.
  Snapshottable(String),
  /// Identity is only meaningful within this process (e.g. an erased generic type).
  Unsnapshottable(String),
}

impl IdentifierType {
  fn type_name(&self) -> &str {
    match self {
      IdentifierType::Snapshottable(name) | IdentifierType::Unsnapshottable(name) => name,
    }
  }
}

#[derive(Debug)]
struct Inner {
  kind: IdentifierType,
  proxied: Option<WorkflowIdentifier>,
  description: Option<String>,
}

impl Drop for Inner {
  // Unlink the chain one link at a time instead of recursing through nested drops.
  fn drop(&mut self) {
    let mut next = self.proxied.take();
    while let Some(id) = next {
      next = match Arc::try_unwrap(id.inner) {
        Ok(mut inner) => inner.proxied.take(),
        Err(_) => None,
      };
    }
  }
}

/// Comparable, hashable, optionally serializable identity of a workflow kind.
///
/// Cloning is cheap.
#[derive(Clone)]
pub struct WorkflowIdentifier {
  inner: Arc<Inner>,
}

impl WorkflowIdentifier {
  /// Identifier for the Rust type `T`. The full type name, generic parameters included, is the
  /// identity token.
  pub fn of<T: ?Sized>() -> Self {
    Self::from_type_name(type_name::<T>())
  }

  /// Snapshottable identifier with an explicit type name.
  pub fn from_type_name(name: impl Into<String>) -> Self {
    Self::new(IdentifierType::Snapshottable(name.into()), None, None)
  }

  /// Identifier for `T` that refuses to be written into snapshots.
  ///
  /// Workflows identified this way (or impostors of them) are left out of tree snapshots.
  pub fn unsnapshottable<T: ?Sized>() -> Self {
    Self::new(
      IdentifierType::Unsnapshottable(type_name::<T>().to_string()),
      None,
      None,
    )
  }

  fn new(
    kind: IdentifierType,
    proxied: Option<WorkflowIdentifier>,
    description: Option<String>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        kind,
        proxied,
        description,
      }),
    }
  }

  /// Make this identifier an impostor standing in for `real`.
  pub fn impostor_of(self, real: WorkflowIdentifier) -> Self {
    Self::new(
      self.inner.kind.clone(),
      Some(real),
      self.inner.description.clone(),
    )
  }

  /// Attach a short human-readable description used instead of the unwrap chain.
  pub fn with_description(self, description: impl Into<String>) -> Self {
    Self::new(
      self.inner.kind.clone(),
      self.inner.proxied.clone(),
      Some(description.into()),
    )
  }

  /// Name of the type at this link of the chain.
  pub fn type_name(&self) -> &str {
    self.inner.kind.type_name()
  }

  /// The identifier this one stands in for, if it is an impostor.
  pub fn proxied(&self) -> Option<&WorkflowIdentifier> {
    self.inner.proxied.as_ref()
  }

  /// Unwrap the impostor chain down to the real identifier.
  pub fn real_identifier(&self) -> &WorkflowIdentifier {
    let mut current = self;
    while let Some(next) = current.proxied() {
      current = next;
    }
    current
  }

  /// Whether this identifier (and every identifier it proxies) can be encoded.
  pub fn is_snapshottable(&self) -> bool {
    self.chain().all(|id| matches!(id.inner.kind, IdentifierType::Snapshottable(_)))
  }

  fn chain(&self) -> impl Iterator<Item = &WorkflowIdentifier> {
    std::iter::successors(Some(self), |id| id.proxied())
  }

  /// Stable encoding usable as a lookup key, or `None` for unsnapshottable identifiers.
  pub fn to_bytes_or_none(&self) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    self.write(&mut buf)?;
    Some(buf.freeze())
  }

  fn write(&self, buf: &mut BytesMut) -> Option<()> {
    // Chains the parser would reject are not written either.
    if !self.is_snapshottable() || self.chain().nth(MAX_CHAIN_LENGTH).is_some() {
      return None;
    }
    for id in self.chain() {
      put_utf8_with_length(buf, id.type_name());
      let tag = match id.proxied() {
        Some(_) => PROXY_IDENTIFIER_TAG,
        None => NO_PROXY_IDENTIFIER_TAG,
      };
      buf.extend_from_slice(&[tag]);
    }
    Some(())
  }

  /// Parse an identifier written by [`to_bytes_or_none`](Self::to_bytes_or_none).
  pub fn parse(bytes: Bytes) -> Result<Self, CoreError> {
    let mut source = bytes;
    let identifier = Self::read(&mut source)?;
    expect_exhausted(&source, "workflow identifier")?;
    Ok(identifier)
  }

  /// Read the chain outermost link first, then link it up from the real identifier outwards.
  fn read(source: &mut Bytes) -> Result<Self, CoreError> {
    let mut names = Vec::new();
    loop {
      if names.len() == MAX_CHAIN_LENGTH {
        return Err(CoreError::malformed(format!(
          "workflow identifier chain longer than {} links",
          MAX_CHAIN_LENGTH
        )));
      }
      names.push(get_utf8_with_length(source)?);
      match get_u8(source)? {
        NO_PROXY_IDENTIFIER_TAG => break,
        PROXY_IDENTIFIER_TAG => {}
        tag => {
          return Err(CoreError::malformed(format!(
            "invalid workflow identifier proxy tag {}",
            tag
          )));
        }
      }
    }

    let mut identifier: Option<Self> = None;
    for name in names.into_iter().rev() {
      identifier = Some(Self::new(IdentifierType::Snapshottable(name), identifier, None));
    }
    identifier.ok_or_else(|| CoreError::malformed("empty workflow identifier"))
  }
}

impl PartialEq for WorkflowIdentifier {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
      || self
        .chain()
        .map(|id| id.type_name())
        .eq(other.chain().map(|id| id.type_name()))
  }
}

impl Eq for WorkflowIdentifier {}

impl Hash for WorkflowIdentifier {
  fn hash<H: Hasher>(&self, state: &mut H) {
    for id in self.chain() {
      id.type_name().hash(state);
    }
  }
}

impl PartialOrd for WorkflowIdentifier {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for WorkflowIdentifier {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self
      .chain()
      .map(|id| id.type_name())
      .cmp(other.chain().map(|id| id.type_name()))
  }
}

impl fmt::Display for WorkflowIdentifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut open = 0;
    for id in self.chain() {
      if let Some(description) = &id.inner.description {
        f.write_str(description)?;
        break;
      }
      f.write_str(id.type_name())?;
      if id.proxied().is_some() {
        f.write_str("(")?;
        open += 1;
      }
    }
    for _ in 0..open {
      f.write_str(")")?;
    }
    Ok(())
  }
}

impl fmt::Debug for WorkflowIdentifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "WorkflowIdentifier({})", self)
  }
}
