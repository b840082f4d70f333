//! Arena-backed document tree.
//!
//! Every node lives in one `Vec`; containers hold lists of node ids instead of
//! the children themselves. Cursor frames can then refer to a container by id
//! without borrowing the tree.

use super::value::Value;
use crate::runtime::runtime_error::{ErrorKind, RuntimeError, index_out_of_bounds, type_error};

/// Index of a node in a [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Any non-container value.
    Scalar(Value),
    Array(Vec<NodeId>),
    Object(Vec<(String, NodeId)>),
}

impl Node {
    pub fn is_structured(&self) -> bool {
        !matches!(self, Node::Scalar(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Node::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Node::Object(_))
    }

    /// Number of entries; zero for scalars.
    pub fn len(&self) -> usize {
        match self {
            Node::Scalar(_) => 0,
            Node::Array(items) => items.len(),
            Node::Object(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn child(&self, position: usize) -> Option<NodeId> {
        match self {
            Node::Scalar(_) => None,
            Node::Array(items) => items.get(position).copied(),
            Node::Object(entries) => entries.get(position).map(|(_, id)| *id),
        }
    }

    /// Key at `position`; `None` for arrays, scalars or out-of-range positions.
    pub fn key(&self, position: usize) -> Option<&str> {
        match self {
            Node::Object(entries) => entries.get(position).map(|(k, _)| k.as_str()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Scalar(v) => v.type_name(),
            Node::Array(_) => "array",
            Node::Object(_) => "object",
        }
    }
}

/// A document tree owned by one VM.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Document {
    /// Takes ownership of `root` and lays it out in the arena.
    pub fn new(root: Value) -> Self {
        let mut doc = Document {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.insert(root);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Adds a detached subtree and returns its id.
    pub fn insert(&mut self, value: Value) -> NodeId {
        let node = match value {
            Value::Array(items) => {
                Node::Array(items.into_iter().map(|item| self.insert(item)).collect())
            }
            Value::Object(entries) => Node::Object(
                entries
                    .into_iter()
                    .map(|(key, item)| (key, self.insert(item)))
                    .collect(),
            ),
            // keys are never part of a document
            Value::NoneKey => Node::Scalar(Value::Null),
            scalar => Node::Scalar(scalar),
        };
        self.alloc(node)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Owned copy of the subtree at `id`.
    pub fn to_value(&self, id: NodeId) -> Value {
        match self.node(id) {
            None => Value::Null,
            Some(Node::Scalar(v)) => v.clone(),
            Some(Node::Array(items)) => {
                Value::Array(items.iter().map(|child| self.to_value(*child)).collect())
            }
            Some(Node::Object(entries)) => Value::Object(
                entries
                    .iter()
                    .map(|(key, child)| (key.clone(), self.to_value(*child)))
                    .collect(),
            ),
        }
    }

    /// Containers on the deepest path from `id` down, `id` included. Zero for
    /// a scalar; an empty container counts as one level.
    pub fn nesting_depth(&self, id: NodeId) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(id, 1)];
        while let Some((next, level)) = pending.pop() {
            let Some(node) = self.node(next).filter(|node| node.is_structured()) else {
                continue;
            };
            deepest = deepest.max(level);
            pending.extend(
                (0..node.len())
                    .filter_map(|position| node.child(position))
                    .map(|child| (child, level + 1)),
            );
        }
        deepest
    }

    pub fn find_key(&self, container: NodeId, key: &str) -> Option<usize> {
        match self.node(container)? {
            Node::Object(entries) => entries.iter().position(|(k, _)| k == key),
            _ => None,
        }
    }

    /// Replaces the key at `position` of an object.
    ///
    /// Fails without changing anything if `new_key` is already used by a
    /// different entry of the same object.
    pub fn rename_key(
        &mut self,
        container: NodeId,
        position: usize,
        new_key: String,
    ) -> Result<(), RuntimeError> {
        let collision = self
            .find_key(container, &new_key)
            .is_some_and(|existing| existing != position);

        match self.node_mut(container) {
            Some(Node::Object(entries)) => {
                let len = entries.len();
                let entry = entries
                    .get_mut(position)
                    .ok_or_else(|| index_out_of_bounds(position, len))?;
                if collision {
                    return Err(ErrorKind::KeyCollision(new_key).into());
                }
                entry.0 = new_key;
                Ok(())
            }
            Some(other) => Err(type_error("object", other.type_name())),
            None => Err(dangling(container)),
        }
    }

    /// Removes the entry at `position` together with its whole subtree.
    /// Later entries shift down by one.
    pub fn remove_entry(&mut self, container: NodeId, position: usize) -> Result<(), RuntimeError> {
        let removed = match self.node_mut(container) {
            Some(Node::Array(items)) if position < items.len() => items.remove(position),
            Some(Node::Object(entries)) if position < entries.len() => {
                entries.remove(position).1
            }
            Some(Node::Scalar(v)) => return Err(type_error("array or object", v.type_name())),
            Some(node) => return Err(index_out_of_bounds(position, node.len())),
            None => return Err(dangling(container)),
        };
        self.release(removed);
        Ok(())
    }

    fn release(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) else {
                continue;
            };
            match node {
                Node::Scalar(_) => {}
                Node::Array(items) => pending.extend(items),
                Node::Object(entries) => pending.extend(entries.into_iter().map(|(_, c)| c)),
            }
            self.free.push(next);
        }
    }
}

fn dangling(id: NodeId) -> RuntimeError {
    index_out_of_bounds(id.0, 0)
}
