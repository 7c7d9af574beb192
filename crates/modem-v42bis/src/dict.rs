use std::collections::BTreeMap;

use crate::{CW_FIRST, CW_RESERVED};

/// Where a node hangs in the trie. Stored as a codeword index, never a
/// pointer; the arena owns every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parent {
    /// Unallocated entry, available for reuse.
    Free,
    /// Permanent single-character entry.
    Root,
    /// Child of the entry at this codeword.
    Code(u16),
}

#[derive(Debug, Clone)]
struct Node {
    ch: u8,
    parent: Parent,
    /// Sparse child map keyed by the byte each child appends. The map holds
    /// codeword indices; child nodes are owned by the arena, not the parent.
    children: BTreeMap<u8, u16>,
}

impl Node {
    fn free() -> Self {
        Self {
            ch: 0,
            parent: Parent::Free,
            children: BTreeMap::new(),
        }
    }

    fn root(ch: u8) -> Self {
        Self {
            ch,
            parent: Parent::Root,
            children: BTreeMap::new(),
        }
    }
}

/// Fixed-capacity trie over byte strings, addressed by codeword.
///
/// Entries `[CW_RESERVED, CW_FIRST)` are the 256 permanent single-character
/// roots; `[CW_FIRST, max_codewords)` are dynamically allocated and recycled.
/// The arena never reallocates.
#[derive(Debug, Clone)]
pub(crate) struct Dictionary {
    nodes: Vec<Node>,
}

impl Dictionary {
    /// `max_codewords` must be greater than `CW_FIRST`; the LAP-M negotiation
    /// layer clamps peer-supplied values before they reach here.
    pub fn new(max_codewords: u16) -> Self {
        let mut dict = Self {
            nodes: vec![Node::free(); usize::from(max_codewords.max(CW_FIRST + 1))],
        };
        dict.reset();
        dict
    }

    /// Free every dynamic entry and re-seed the single-character roots.
    pub fn reset(&mut self) {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            *node = if (usize::from(CW_RESERVED)..usize::from(CW_FIRST)).contains(&i) {
                Node::root((i - usize::from(CW_RESERVED)) as u8)
            } else {
                Node::free()
            };
        }
    }

    /// The byte this entry appends to its parent's string.
    pub fn character(&self, code: u16) -> u8 {
        self.nodes[usize::from(code)].ch
    }

    /// Parent codeword, or `None` for roots and free entries.
    pub fn parent_code(&self, code: u16) -> Option<u16> {
        match self.nodes[usize::from(code)].parent {
            Parent::Code(parent) => Some(parent),
            _ => None,
        }
    }

    /// Out-of-range codewords count as free, so a corrupt compressed stream
    /// surfaces as an unknown-codeword error rather than a panic.
    pub fn is_free(&self, code: u16) -> bool {
        self.nodes
            .get(usize::from(code))
            .map_or(true, |node| node.parent == Parent::Free)
    }

    pub fn is_leaf(&self, code: u16) -> bool {
        self.nodes[usize::from(code)].children.is_empty()
    }

    /// Codeword of `code`'s child appending `ch`, if present.
    pub fn child(&self, code: u16, ch: u8) -> Option<u16> {
        self.nodes[usize::from(code)].children.get(&ch).copied()
    }

    /// Allocate `child_code` (which must be free) as `parent_code` + `ch`.
    pub fn add_child(&mut self, child_code: u16, parent_code: u16, ch: u8) {
        self.nodes[usize::from(child_code)] = Node {
            ch,
            parent: Parent::Code(parent_code),
            children: BTreeMap::new(),
        };
        self.nodes[usize::from(parent_code)]
            .children
            .insert(ch, child_code);
    }

    /// Detach a leaf from its parent, leaving the entry free for reuse.
    pub fn detach(&mut self, code: u16) {
        if let Parent::Code(parent) = self.nodes[usize::from(code)].parent {
            let ch = self.nodes[usize::from(code)].ch;
            self.nodes[usize::from(parent)].children.remove(&ch);
        }
        self.nodes[usize::from(code)].parent = Parent::Free;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_seeds_roots_and_frees_the_rest() {
        let mut dict = Dictionary::new(512);
        for ch in 0..=255u16 {
            let code = CW_RESERVED + ch;
            assert!(!dict.is_free(code));
            assert_eq!(dict.character(code), ch as u8);
            assert_eq!(dict.parent_code(code), None);
        }
        for code in CW_FIRST..512 {
            assert!(dict.is_free(code));
        }

        dict.add_child(CW_FIRST, CW_RESERVED + u16::from(b'a'), b'b');
        assert!(!dict.is_free(CW_FIRST));
        dict.reset();
        assert!(dict.is_free(CW_FIRST));
        assert!(dict.is_leaf(CW_RESERVED + u16::from(b'a')));
    }

    #[test]
    fn add_and_detach_maintain_links() {
        let mut dict = Dictionary::new(512);
        let root = CW_RESERVED + u16::from(b'x');
        dict.add_child(CW_FIRST, root, b'y');
        assert_eq!(dict.child(root, b'y'), Some(CW_FIRST));
        assert_eq!(dict.parent_code(CW_FIRST), Some(root));
        assert_eq!(dict.character(CW_FIRST), b'y');
        assert!(!dict.is_leaf(root));
        assert!(dict.is_leaf(CW_FIRST));

        dict.detach(CW_FIRST);
        assert!(dict.is_free(CW_FIRST));
        assert_eq!(dict.child(root, b'y'), None);
        assert!(dict.is_leaf(root));
    }
}
