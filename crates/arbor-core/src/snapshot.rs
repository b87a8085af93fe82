//! Persisted workflow state.
//!
//! [`Snapshot`] holds one workflow's own opaque bytes. [`TreeSnapshot`] aggregates the
//! snapshots of a whole tree, keyed by each child's [`WorkflowNodeId`].
//!
//! # Wire format
//!
//! ```text
//! TreeSnapshot := u32 len, own bytes (len == 0 when absent)
//!                 u32 child count
//!                 { u32 len, WorkflowNodeId bytes
//!                   u32 len, TreeSnapshot bytes } * count
//! WorkflowNodeId := u32 len, WorkflowIdentifier bytes
//!                   u32 len, utf-8 render key
//! ```
//!
//! All integers are big-endian. Children whose identifiers cannot be encoded are not written.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
  expect_exhausted, get_bytes_with_length, get_u32, get_utf8_with_length, put_bytes_with_length,
  put_utf8_with_length,
};
use crate::error::CoreError;
use crate::identifier::WorkflowIdentifier;

type Thunk = Box<dyn FnOnce() -> Bytes + Send>;

struct SnapshotInner {
  bytes: OnceLock<Bytes>,
  thunk: Mutex<Option<Thunk>>,
}

/// Lazily serialized bytes of a single workflow's state.
///
/// Serialization runs at most once, the first time [`bytes`](Self::bytes) is called. Equality
/// compares bytes and therefore forces serialization.
#[derive(Clone)]
pub struct Snapshot {
  inner: Arc<SnapshotInner>,
}

impl Snapshot {
  /// Snapshot of already-serialized bytes.
  pub fn of(bytes: impl Into<Bytes>) -> Self {
    let cell = OnceLock::new();
    let _ = cell.set(bytes.into());
    Self {
      inner: Arc::new(SnapshotInner {
        bytes: cell,
        thunk: Mutex::new(None),
      }),
    }
  }

  /// Snapshot of a UTF-8 string.
  pub fn of_utf8(value: &str) -> Self {
    Self::of(Bytes::copy_from_slice(value.as_bytes()))
  }

  /// Snapshot of a single big-endian `i32`.
  pub fn of_i32(value: i32) -> Self {
    Self::of(Bytes::copy_from_slice(&value.to_be_bytes()))
  }

  /// Snapshot whose bytes are produced by `produce` on first access.
  pub fn lazy(produce: impl FnOnce() -> Bytes + Send + 'static) -> Self {
    Self {
      inner: Arc::new(SnapshotInner {
        bytes: OnceLock::new(),
        thunk: Mutex::new(Some(Box::new(produce))),
      }),
    }
  }

  /// Snapshot built by writing into a buffer on first access.
  pub fn write(writer: impl FnOnce(&mut BytesMut) + Send + 'static) -> Self {
    Self::lazy(move || {
      let mut buf = BytesMut::new();
      writer(&mut buf);
      buf.freeze()
    })
  }

  /// The serialized bytes, serializing now if needed.
  pub fn bytes(&self) -> &Bytes {
    self.inner.bytes.get_or_init(|| {
      let thunk = self
        .inner
        .thunk
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
      thunk.map(|produce| produce()).unwrap_or_default()
    })
  }

  /// Whether the bytes have been produced yet.
  pub fn is_materialized(&self) -> bool {
    self.inner.bytes.get().is_some()
  }

  /// Read the bytes back as a big-endian `i32`.
  pub fn to_i32(&self) -> Result<i32, CoreError> {
    let mut bytes = self.bytes().clone();
    let value = get_u32(&mut bytes)? as i32;
    expect_exhausted(&bytes, "i32 snapshot")?;
    Ok(value)
  }

  /// Read the bytes back as UTF-8.
  pub fn to_utf8(&self) -> Result<String, CoreError> {
    String::from_utf8(self.bytes().to_vec())
      .map_err(|e| CoreError::malformed(format!("invalid utf-8 snapshot: {}", e)))
  }
}

impl PartialEq for Snapshot {
  fn eq(&self, other: &Self) -> bool {
    self.bytes() == other.bytes()
  }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.inner.bytes.get() {
      Some(bytes) => write!(f, "Snapshot({} bytes)", bytes.len()),
      None => f.write_str("Snapshot(<lazy>)"),
    }
  }
}

/// Position of a child within its parent: the child's identifier plus its render key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowNodeId {
  pub identifier: WorkflowIdentifier,
  pub name: String,
}

impl WorkflowNodeId {
  pub fn new(identifier: WorkflowIdentifier, name: impl Into<String>) -> Self {
    Self {
      identifier,
      name: name.into(),
    }
  }

  /// Encoding of this id, or `None` if the identifier is unsnapshottable.
  pub fn to_bytes_or_none(&self) -> Option<Bytes> {
    let identifier = self.identifier.to_bytes_or_none()?;
    let mut buf = BytesMut::new();
    put_bytes_with_length(&mut buf, &identifier);
    put_utf8_with_length(&mut buf, &self.name);
    Some(buf.freeze())
  }

  /// Parse an id written by [`to_bytes_or_none`](Self::to_bytes_or_none).
  pub fn parse(bytes: Bytes) -> Result<Self, CoreError> {
    let mut source = bytes;
    let identifier = WorkflowIdentifier::parse(get_bytes_with_length(&mut source)?)?;
    let name = get_utf8_with_length(&mut source)?;
    expect_exhausted(&source, "workflow node id")?;
    Ok(Self { identifier, name })
  }
}

impl fmt::Display for WorkflowNodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.name.is_empty() {
      write!(f, "{}", self.identifier)
    } else {
      write!(f, "{}[{}]", self.identifier, self.name)
    }
  }
}

/// Child snapshots keyed by position.
pub type ChildSnapshots = BTreeMap<WorkflowNodeId, TreeSnapshot>;

#[derive(Clone)]
enum Repr {
  Built {
    workflow_snapshot: Option<Snapshot>,
    children: ChildSnapshots,
  },
  /// Not parsed yet. Decoded one level at a time on access.
  Encoded(Bytes),
}

/// Snapshot of a whole workflow tree.
///
/// Trees read with [`parse`](Self::parse) decode one level: the own bytes and the list of
/// children. Each child stays encoded until it is itself accessed.
#[derive(Clone)]
pub struct TreeSnapshot {
  repr: Repr,
}

impl TreeSnapshot {
  pub fn new(workflow_snapshot: Option<Snapshot>, children: ChildSnapshots) -> Self {
    Self {
      repr: Repr::Built {
        workflow_snapshot,
        children,
      },
    }
  }

  /// Tree snapshot holding only a root snapshot.
  pub fn for_root_only(workflow_snapshot: Option<Snapshot>) -> Self {
    Self::new(workflow_snapshot, ChildSnapshots::new())
  }

  /// Decode the top level of a tree snapshot written by [`to_bytes`](Self::to_bytes).
  pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, CoreError> {
    let (workflow_snapshot, children) = decode_level(bytes.into())?;
    Ok(Self::new(workflow_snapshot, children))
  }

  /// Wrap bytes without decoding anything until first access.
  pub fn deferred(bytes: impl Into<Bytes>) -> Self {
    Self {
      repr: Repr::Encoded(bytes.into()),
    }
  }

  /// The root workflow's own snapshot. Empty bytes read as `None`.
  pub fn workflow_snapshot(&self) -> Result<Option<Snapshot>, CoreError> {
    Ok(self.clone().into_parts()?.0)
  }

  /// The child snapshots. Grandchildren are not decoded.
  pub fn child_snapshots(&self) -> Result<ChildSnapshots, CoreError> {
    Ok(self.clone().into_parts()?.1)
  }

  /// Split into own snapshot and children, decoding this level if needed.
  pub fn into_parts(self) -> Result<(Option<Snapshot>, ChildSnapshots), CoreError> {
    match self.repr {
      Repr::Built {
        workflow_snapshot,
        children,
      } => Ok((
        workflow_snapshot.filter(|snapshot| !snapshot.bytes().is_empty()),
        children,
      )),
      Repr::Encoded(bytes) => decode_level(bytes),
    }
  }

  /// Serialize the whole tree. Forces every lazy snapshot in it.
  pub fn to_bytes(&self) -> Bytes {
    match &self.repr {
      Repr::Encoded(bytes) => bytes.clone(),
      Repr::Built {
        workflow_snapshot,
        children,
      } => {
        let mut sink = BytesMut::new();
        let own = workflow_snapshot
          .as_ref()
          .map(|snapshot| snapshot.bytes().clone())
          .unwrap_or_default();
        put_bytes_with_length(&mut sink, &own);

        let child_bytes: Vec<(Bytes, Bytes)> = children
          .iter()
          .filter_map(|(id, child)| {
            let id_bytes = id.to_bytes_or_none()?;
            let snapshot_bytes = child.to_bytes();
            if snapshot_bytes.is_empty() {
              return None;
            }
            Some((id_bytes, snapshot_bytes))
          })
          .collect();

        let count = u32::try_from(child_bytes.len()).expect("child count exceeds u32::MAX");
        sink.put_u32(count);
        for (id_bytes, snapshot_bytes) in child_bytes {
          put_bytes_with_length(&mut sink, &id_bytes);
          put_bytes_with_length(&mut sink, &snapshot_bytes);
        }
        sink.freeze()
      }
    }
  }
}

fn decode_level(bytes: Bytes) -> Result<(Option<Snapshot>, ChildSnapshots), CoreError> {
  let mut source = bytes;
  let own = get_bytes_with_length(&mut source)?;
  let workflow_snapshot = (!own.is_empty()).then(|| Snapshot::of(own));

  let count = get_u32(&mut source)?;
  let mut children = ChildSnapshots::new();
  for _ in 0..count {
    let id = WorkflowNodeId::parse(get_bytes_with_length(&mut source)?)?;
    let child = get_bytes_with_length(&mut source)?;
    children.insert(id, TreeSnapshot::deferred(child));
  }
  if source.has_remaining() {
    return Err(CoreError::malformed(format!(
      "{} trailing bytes after tree snapshot",
      source.remaining()
    )));
  }
  Ok((workflow_snapshot, children))
}

impl PartialEq for TreeSnapshot {
  fn eq(&self, other: &Self) -> bool {
    self.to_bytes() == other.to_bytes()
  }
}

impl Eq for TreeSnapshot {}

impl fmt::Debug for TreeSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.repr {
      Repr::Encoded(bytes) => write!(f, "TreeSnapshot(<encoded {} bytes>)", bytes.len()),
      Repr::Built {
        workflow_snapshot,
        children,
      } => f
        .debug_struct("TreeSnapshot")
        .field("workflow_snapshot", workflow_snapshot)
        .field("children", children)
        .finish(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  fn id(name: &str, key: &str) -> WorkflowNodeId {
    WorkflowNodeId::new(WorkflowIdentifier::from_type_name(name), key)
  }

  fn unsnapshottable(key: &str) -> WorkflowNodeId {
    WorkflowNodeId::new(WorkflowIdentifier::unsnapshottable::<String>(), key)
  }

  fn leaf(text: &str) -> TreeSnapshot {
    TreeSnapshot::for_root_only(Some(Snapshot::of_utf8(text)))
  }

  #[test]
  fn test_serialize_and_parse() {
    let children = ChildSnapshots::from([
      (id("Workflow1", ""), leaf("one")),
      (id("Workflow2", ""), leaf("two")),
      (id("Workflow2", "b"), leaf("three")),
    ]);
    let bytes = TreeSnapshot::new(Some(Snapshot::of_utf8("roo")), children).to_bytes();

    let parsed = TreeSnapshot::parse(bytes).unwrap();
    let (root, children) = parsed.into_parts().unwrap();
    assert_eq!(root.unwrap().to_utf8().unwrap(), "roo");
    assert_eq!(children.len(), 3);

    let three = children[&id("Workflow2", "b")].workflow_snapshot().unwrap();
    assert_eq!(three.unwrap().to_utf8().unwrap(), "three");
  }

  #[test]
  fn test_unsnapshottable_children_are_dropped() {
    let children = ChildSnapshots::from([
      (id("Workflow1", ""), leaf("one")),
      (unsnapshottable(""), leaf("two")),
      (id("Workflow2", "b"), leaf("three")),
      (unsnapshottable("c"), leaf("four")),
    ]);
    let tree = TreeSnapshot::new(Some(Snapshot::of_utf8("roo")), children);
    let parsed = TreeSnapshot::parse(tree.to_bytes()).unwrap();

    let children = parsed.child_snapshots().unwrap();
    assert_eq!(children.len(), 2);
    assert!(children.contains_key(&id("Workflow1", "")));
    assert!(!children.contains_key(&unsnapshottable("")));
    assert_eq!(parsed, tree);
  }

  #[test]
  fn test_empty_root_reads_as_none() {
    let tree = TreeSnapshot::for_root_only(Some(Snapshot::of(Bytes::new())));
    assert!(tree.workflow_snapshot().unwrap().is_none());

    let parsed = TreeSnapshot::parse(tree.to_bytes()).unwrap();
    assert!(parsed.workflow_snapshot().unwrap().is_none());
  }

  #[test]
  fn test_grandchildren_are_parsed_lazily() {
    let grandchild = TreeSnapshot::new(
      Some(Snapshot::of_utf8("child")),
      ChildSnapshots::from([(id("Leaf", ""), leaf("leaf"))]),
    );
    let tree = TreeSnapshot::new(None, ChildSnapshots::from([(id("Mid", ""), grandchild)]));
    let mut bytes = BytesMut::from(&tree.to_bytes()[..]);

    // Corrupt the innermost identifier tag; the top level must still decode.
    let len = bytes.len();
    let tag_offset = len - 4 - 4 - 4 - 4 - "leaf".len() - 1;
    bytes[tag_offset] = 9;

    let parsed = TreeSnapshot::parse(bytes.freeze()).unwrap();
    let mid = parsed.child_snapshots().unwrap().remove(&id("Mid", "")).unwrap();
    assert!(mid.child_snapshots().is_err());
  }

  #[test]
  fn test_wire_format_is_bit_exact() {
    let tree = TreeSnapshot::new(
      Some(Snapshot::of_utf8("r")),
      ChildSnapshots::from([(id("C", "k"), TreeSnapshot::for_root_only(None))]),
    );
    let parts: [&[u8]; 7] = [
      &[0, 0, 0, 1, b'r'],
      &[0, 0, 0, 1],
      // node id: identifier (len 6: "C" with length + tag) + key
      &[0, 0, 0, 15],
      &[0, 0, 0, 6, 0, 0, 0, 1, b'C', 0],
      &[0, 0, 0, 1, b'k'],
      // child tree: empty own bytes, zero children
      &[0, 0, 0, 8],
      &[0, 0, 0, 0, 0, 0, 0, 0],
    ];
    assert_eq!(tree.to_bytes().to_vec(), parts.concat());
  }

  #[test]
  fn test_lazy_snapshot_serializes_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let snapshot = Snapshot::lazy(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Bytes::from_static(b"state")
    });

    assert!(!snapshot.is_materialized());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(snapshot.bytes().as_ref(), b"state");
    assert_eq!(snapshot.clone().bytes().as_ref(), b"state");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_truncated_tree_is_malformed() {
    let bytes = leaf("abc").to_bytes();
    let truncated = bytes.slice(..bytes.len() - 2);
    assert!(TreeSnapshot::parse(truncated).is_err());
  }

  #[test]
  fn test_i32_snapshot() {
    assert_eq!(Snapshot::of_i32(-3).to_i32().unwrap(), -3);
  }

  mod properties {
    use proptest::collection;
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;

    use super::*;

    struct Opaque;

    fn identifier() -> impl Strategy<Value = WorkflowIdentifier> {
      let plain = prop_oneof![
        "[A-C][a-z]{0,3}".prop_map(WorkflowIdentifier::from_type_name),
        Just(WorkflowIdentifier::unsnapshottable::<Opaque>()),
      ];
      plain.prop_recursive(3, 8, 1, |real| {
        ("[A-C][a-z]{0,3}", real).prop_map(|(name, real)| {
          WorkflowIdentifier::from_type_name(name).impostor_of(real)
        })
      })
    }

    fn own_bytes() -> impl Strategy<Value = Option<Snapshot>> {
      proptest::option::of(collection::vec(any::<u8>(), 0..6).prop_map(Snapshot::of))
    }

    fn tree() -> impl Strategy<Value = TreeSnapshot> {
      let leaf = own_bytes().prop_map(TreeSnapshot::for_root_only);
      leaf.prop_recursive(3, 32, 4, |inner| {
        let child_id = (identifier(), "[ab]{0,2}")
          .prop_map(|(identifier, name)| WorkflowNodeId::new(identifier, name));
        (own_bytes(), collection::btree_map(child_id, inner, 0..4))
          .prop_map(|(own, children)| TreeSnapshot::new(own, children))
      })
    }

    fn check_level(original: &TreeSnapshot, parsed: &TreeSnapshot) -> Result<(), TestCaseError> {
      let (own, children) = original.clone().into_parts().unwrap();
      let (parsed_own, parsed_children) = parsed.clone().into_parts().unwrap();
      prop_assert_eq!(own, parsed_own);

      let kept: Vec<&WorkflowNodeId> = children
        .keys()
        .filter(|id| id.identifier.is_snapshottable())
        .collect();
      prop_assert!(parsed_children.keys().all(|id| id.identifier.is_snapshottable()));
      prop_assert_eq!(kept, parsed_children.keys().collect::<Vec<_>>());
      for (id, parsed_child) in &parsed_children {
        check_level(&children[id], parsed_child)?;
      }
      Ok(())
    }

    proptest! {
      #[test]
      fn test_tree_survives_encoding(original in tree()) {
        let parsed = TreeSnapshot::parse(original.to_bytes()).unwrap();
        prop_assert_eq!(&parsed, &original);
        check_level(&original, &parsed)?;
      }
    }
  }
}
