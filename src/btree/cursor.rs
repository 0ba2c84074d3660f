//! Ordered, lazy iteration over a tree.

use std::sync::Arc;

use crate::error::Result;
use crate::pager::PageId;

use super::node::Node;
use super::tree::child_index;
use super::NodeSource;

/// What part of a tree a cursor visits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    prefix: Option<Vec<u8>>,
    start: Option<Vec<u8>>,
}

impl Scan {
    /// Every key in order
    pub fn all() -> Self {
        Self::default()
    }

    /// Only keys beginning with `prefix`
    pub fn prefix(prefix: impl AsRef<[u8]>) -> Self {
        Self {
            prefix: Some(prefix.as_ref().to_vec()),
            start: None,
        }
    }

    /// Begin at the first key `>= start`
    pub fn start_at(mut self, start: impl AsRef<[u8]>) -> Self {
        self.start = Some(start.as_ref().to_vec());
        self
    }

    /// Lowest key the scan can yield
    fn lower_bound(&self) -> &[u8] {
        match (&self.prefix, &self.start) {
            (Some(p), Some(s)) => p.as_slice().max(s.as_slice()),
            (Some(p), None) => p.as_slice(),
            (None, Some(s)) => s.as_slice(),
            (None, None) => &[],
        }
    }

    fn admits(&self, key: &[u8]) -> bool {
        self.prefix.as_deref().map_or(true, |p| key.starts_with(p))
    }
}

/// Lazy iterator over `(key, value)` pairs in byte-lexicographic order
///
/// Nodes are loaded only as the cursor walks into them. `rewind` and `seek`
/// restart the walk at any point.
pub struct Cursor<'a> {
    source: &'a dyn NodeSource,
    root: PageId,
    scan: Scan,
    /// Path from root to the current leaf: node and index of the next item
    stack: Vec<(Arc<Node>, usize)>,
    positioned: bool,
    done: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(source: &'a dyn NodeSource, root: PageId, scan: Scan) -> Self {
        Self {
            source,
            root,
            scan,
            stack: Vec::new(),
            positioned: false,
            done: false,
        }
    }

    /// Restart at the beginning of the scan
    pub fn rewind(&mut self) {
        self.stack.clear();
        self.positioned = false;
        self.done = false;
    }

    /// Reposition at the first key `>= key` (never before the scan's bounds)
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let bound = self.scan.lower_bound();
        let target = if key < bound { bound.to_vec() } else { key.to_vec() };
        self.done = false;
        self.positioned = true;
        self.descend_to(&target)
    }

    fn descend_to(&mut self, key: &[u8]) -> Result<()> {
        self.stack.clear();
        let mut id = self.root;
        loop {
            let node = self.source.load(id)?;
            let (index, next) = match &*node {
                Node::Branch(children) => {
                    let i = child_index(children, key);
                    (i, Some(children[i].1))
                }
                Node::Leaf(entries) => (entries.partition_point(|(k, _)| k.as_slice() < key), None),
            };
            self.stack.push((node, index));
            match next {
                Some(child) => id = child,
                None => return Ok(()),
            }
        }
    }

    fn descend_leftmost(&mut self, mut id: PageId) -> Result<()> {
        loop {
            let node = self.source.load(id)?;
            let next = match &*node {
                Node::Branch(children) => Some(children[0].1),
                Node::Leaf(_) => None,
            };
            self.stack.push((node, 0));
            match next {
                Some(child) => id = child,
                None => return Ok(()),
            }
        }
    }

    /// Next item in tree order, ignoring the prefix bound
    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let Some((node, index)) = self.stack.last_mut() else {
                return Ok(None);
            };

            let next_child = match &**node {
                Node::Leaf(entries) => {
                    if let Some((k, v)) = entries.get(*index) {
                        *index += 1;
                        return Ok(Some((k.clone(), v.clone())));
                    }
                    None
                }
                Node::Branch(children) => {
                    // Back from child `index`; move to its right sibling
                    *index += 1;
                    children.get(*index).map(|(_, child)| *child)
                }
            };

            match next_child {
                Some(child) => self.descend_leftmost(child)?,
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.positioned {
            self.positioned = true;
            let start = self.scan.lower_bound().to_vec();
            if let Err(e) = self.descend_to(&start) {
                self.done = true;
                return Some(Err(e));
            }
        }

        match self.advance() {
            Ok(Some((key, value))) if self.scan.admits(&key) => Some(Ok((key, value))),
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
