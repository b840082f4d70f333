//! Tree cursor over a [`Document`].
//!
//! The cursor is a stack of `(container, position)` frames. The bottom frame
//! is the document root; each `enter` pushes the container at the current
//! position. Frames only hold node ids, so a cursor is a plain value: cloning
//! it gives an independent position over the same document.

use crate::lang::document::{Document, Node, NodeId};
use crate::lang::value::Value;
use crate::runtime::runtime_error::{
    ErrorKind, RuntimeError, index_out_of_bounds, path_not_found, type_error,
};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub node: NodeId,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explorer {
    root: NodeId,
    primitive_root: bool,
    frames: Vec<Frame>,
}

impl Explorer {
    pub fn new(doc: &Document) -> Self {
        let root = doc.root();
        let primitive_root = !doc.node(root).is_some_and(Node::is_structured);
        let mut explorer = Explorer {
            root,
            primitive_root,
            frames: Vec::new(),
        };
        explorer.reset();
        explorer
    }

    /// Back to the first entry of the root container.
    pub fn reset(&mut self) {
        self.frames.clear();
        if !self.primitive_root {
            self.frames.push(Frame {
                node: self.root,
                position: 0,
            });
        }
    }

    pub fn is_primitive_root(&self) -> bool {
        self.primitive_root
    }

    /// Number of frames, root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    fn active(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn active_node<'d>(&self, doc: &'d Document) -> Option<&'d Node> {
        self.active().and_then(|frame| doc.node(frame.node))
    }

    pub fn current_index(&self) -> usize {
        self.active().map_or(0, |frame| frame.position)
    }

    pub fn set_index(&mut self, position: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.position = position;
        }
    }

    /// Node at the cursor: the root itself for a primitive root, otherwise
    /// the entry at the active position (`None` at end).
    pub fn current(&self, doc: &Document) -> Option<NodeId> {
        if self.primitive_root {
            return Some(self.root);
        }
        self.active_node(doc)?.child(self.current_index())
    }

    /// Key at the cursor, or `Value::NoneKey` inside an array, at end, or
    /// without an active frame.
    pub fn current_key(&self, doc: &Document) -> Value {
        self.active_node(doc)
            .and_then(|node| node.key(self.current_index()))
            .map_or(Value::NoneKey, |key| Value::String(key.to_string()))
    }

    pub fn rename_key(&mut self, doc: &mut Document, new_key: Value) -> Result<(), RuntimeError> {
        let Some(frame) = self.active().copied() else {
            return Ok(());
        };
        let key = match new_key {
            Value::String(key) => key,
            other => return Err(type_error("string", other.type_name())),
        };
        doc.rename_key(frame.node, frame.position, key)
    }

    /// Removes the entry at the cursor with its whole subtree. The position
    /// stays put and now names the following entry, if any.
    pub fn delete_current(&mut self, doc: &mut Document) -> Result<(), RuntimeError> {
        match self.active().copied() {
            Some(frame) => doc.remove_entry(frame.node, frame.position),
            None => Ok(()),
        }
    }

    /// Descends into the container at the cursor. Returns false, doing
    /// nothing, when the current value is a scalar or the cursor is at end.
    pub fn enter(&mut self, doc: &Document) -> bool {
        if self.primitive_root {
            return false;
        }
        let Some(child) = self.current(doc) else {
            return false;
        };
        if !doc.node(child).is_some_and(Node::is_structured) {
            return false;
        }
        self.frames.push(Frame {
            node: child,
            position: 0,
        });
        true
    }

    /// Returns to the parent frame. The root frame is never popped.
    pub fn quit(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        self.frames.pop();
        true
    }

    pub fn at_end(&self, doc: &Document) -> bool {
        if self.primitive_root {
            return true;
        }
        match self.active_node(doc) {
            Some(node) => self.current_index() >= node.len(),
            None => true,
        }
    }

    pub fn advance(&mut self, doc: &Document) -> bool {
        if self.at_end(doc) {
            return false;
        }
        let next = self.current_index() + 1;
        self.set_index(next);
        true
    }

    /// Moves to `path`, resolved from the root.
    ///
    /// Each segment is an object key (`String`) or an array index (`UInt`,
    /// or a non-negative `Int`). Every segment but the last must name a
    /// container, which is entered. On success the active frame is the
    /// container of the last segment, positioned on it; an empty path resets
    /// to the root. On failure the cursor does not move.
    pub fn goto(&mut self, doc: &Document, path: &[Value]) -> Result<(), RuntimeError> {
        let text = path_text(path);

        if self.primitive_root {
            if path.is_empty() {
                return Ok(());
            }
            return Err(path_not_found(&text, "document root is not a container"));
        }

        let mut frames = vec![Frame {
            node: self.root,
            position: 0,
        }];

        for (i, segment) in path.iter().enumerate() {
            if i > 0 {
                let Some(parent) = frames.last().copied() else {
                    break;
                };
                let child = doc
                    .node(parent.node)
                    .and_then(|node| node.child(parent.position))
                    .filter(|child| doc.node(*child).is_some_and(Node::is_structured))
                    .ok_or_else(|| {
                        path_not_found(&text, format!("segment {} is not a container", i - 1))
                    })?;
                frames.push(Frame {
                    node: child,
                    position: 0,
                });
            }

            let Some(frame) = frames.last_mut() else {
                break;
            };
            frame.position = resolve_segment(doc, frame.node, segment)
                .map_err(|reason| path_not_found(&text, format!("segment {}: {}", i, reason)))?;
        }

        self.frames = frames;
        Ok(())
    }

    /// Depth-first dump of the entries from the cursor to the end of the
    /// active container. The cursor ends up at end.
    ///
    /// Each nested container is dumped through a copy of the cursor, so the
    /// caller's frames are never disturbed. Fails with `NestingTooDeep` once
    /// the frame stack would grow past `max_depth`.
    pub fn dump<W: Write>(
        &mut self,
        doc: &Document,
        out: &mut W,
        max_depth: usize,
    ) -> Result<(), RuntimeError> {
        if self.depth() > max_depth {
            return Err(ErrorKind::NestingTooDeep { limit: max_depth }.into());
        }

        while !self.at_end(doc) {
            let Some(id) = self.current(doc) else {
                break;
            };

            let key = self.current_key(doc);
            if matches!(key, Value::String(_)) {
                write!(out, "{} : ", key)?;
            }

            match doc.node(id) {
                Some(Node::Scalar(value)) => write!(out, "{} ", value)?,
                Some(node) => {
                    let (open, close) = if node.is_array() { ("[", "]") } else { ("{", "}") };
                    write!(out, "{} ", open)?;

                    let mut inner = self.clone();
                    inner.enter(doc);
                    inner.dump(doc, out, max_depth)?;

                    write!(out, "{} ", close)?;
                }
                None => return Err(index_out_of_bounds(id.0, doc.node_count())),
            }

            self.advance(doc);
        }

        Ok(())
    }
}

fn resolve_segment(doc: &Document, container: NodeId, segment: &Value) -> Result<usize, String> {
    let node = doc
        .node(container)
        .ok_or_else(|| "dangling container".to_string())?;

    match (node, segment) {
        (Node::Object(_), Value::String(key)) => doc
            .find_key(container, key)
            .ok_or_else(|| format!("no key {:?}", key)),
        (Node::Array(items), Value::UInt(n)) => index_in(*n, items.len()),
        (Node::Array(items), Value::Int(n)) if *n >= 0 => index_in(*n as u64, items.len()),
        (node, segment) => Err(format!(
            "cannot address {} with {}",
            node.type_name(),
            segment
        )),
    }
}

fn index_in(n: u64, len: usize) -> Result<usize, String> {
    usize::try_from(n)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| format!("index {} out of range for size {}", n, len))
}

fn path_text(path: &[Value]) -> String {
    let mut text = String::new();
    for segment in path {
        text.push('/');
        match segment {
            Value::String(s) => text.push_str(s),
            other => text.push_str(&other.to_string()),
        }
    }
    if text.is_empty() {
        text.push('/');
    }
    text
}
