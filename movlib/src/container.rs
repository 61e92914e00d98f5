//! Generic typed atom tree.
//!
//! A hierarchical key-value store where every node has a FourCC type,
//! a numeric id, and either child atoms or leaf data. Used as the
//! serialization format for preferences, actions and other structured
//! configuration data.
//!
//! Wire format per node: 20 byte header `[size][type][id][reserved:u16]
//! [child_count:u16][reserved:u32]`, followed by child nodes or leaf
//! bytes. A serialized container is a single root node of type `sean`
//! with id 1.
//!
use std::fmt::Debug;
use std::io;

use crate::serialize::{FromBytes, ReadBytes, ToBytes, WriteBytes};
use crate::types::FourCC;

const ROOT_TYPE: FourCC = FourCC::new(b"sean");
const ROOT_ID: u32 = 1;
const NODE_HEADER_SIZE: u64 = 20;

// Way deeper than any sane container; the recursion has to stop somewhere.
const MAX_DEPTH: u32 = 64;

/// The payload of an atom: either child atoms or leaf bytes.
#[derive(Clone, PartialEq, Eq)]
pub enum AtomData {
    Container(Vec<Atom>),
    Leaf(Vec<u8>),
}

/// One node in the tree.
#[derive(Clone, PartialEq, Eq)]
pub struct Atom {
    atom_type: FourCC,
    id:        u32,
    data:      AtomData,
}

impl Atom {
    /// New container atom without children.
    pub fn container(atom_type: FourCC, id: u32) -> Atom {
        Atom {
            atom_type,
            id,
            data: AtomData::Container(Vec::new()),
        }
    }

    /// New leaf atom holding `data`.
    pub fn leaf(atom_type: FourCC, id: u32, data: Vec<u8>) -> Atom {
        Atom {
            atom_type,
            id,
            data: AtomData::Leaf(data),
        }
    }

    pub fn atom_type(&self) -> FourCC {
        self.atom_type
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Leaf data, if this is a leaf atom.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.data {
            AtomData::Leaf(d) => Some(&d[..]),
            AtomData::Container(_) => None,
        }
    }

    /// Replace the leaf data. A container atom turns into a leaf.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = AtomData::Leaf(data);
    }

    pub fn children(&self) -> &[Atom] {
        match &self.data {
            AtomData::Container(c) => &c[..],
            AtomData::Leaf(_) => &[],
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Atom> {
        // Inserting below a leaf turns it into a container.
        if let AtomData::Leaf(_) = self.data {
            self.data = AtomData::Container(Vec::new());
        }
        match &mut self.data {
            AtomData::Container(c) => c,
            AtomData::Leaf(_) => unreachable!(),
        }
    }

    /// Insert a child atom. Fails if a child with the same (type, id)
    /// already exists.
    pub fn insert_child(&mut self, child: Atom) -> io::Result<&mut Atom> {
        insert_into(self.children_mut(), child)
    }

    /// Insert a child atom, assigning the next free id for its type.
    pub fn insert_child_auto_id(&mut self, atom_type: FourCC, data: AtomData) -> &mut Atom {
        let children = self.children_mut();
        let id = next_free_id(children, atom_type);
        let atom = Atom { atom_type, id, data };
        insert_into(children, atom).unwrap()
    }

    /// Find a direct child by type and id.
    pub fn find_child(&self, atom_type: FourCC, id: u32) -> Option<&Atom> {
        self.children()
            .iter()
            .find(|a| a.atom_type == atom_type && a.id == id)
    }

    pub fn find_child_mut(&mut self, atom_type: FourCC, id: u32) -> Option<&mut Atom> {
        self.children_mut()
            .iter_mut()
            .find(|a| a.atom_type == atom_type && a.id == id)
    }

    /// Find the index'th child of a type. Indexes start at 1.
    pub fn child_by_index(&self, atom_type: FourCC, index: usize) -> Option<&Atom> {
        self.children()
            .iter()
            .filter(|a| a.atom_type == atom_type)
            .nth(index.checked_sub(1)?)
    }

    /// Cursor-style iteration: the next child of a type after the one
    /// with id `prev_id`. `None` for `prev_id` starts at the front.
    pub fn next_child(&self, atom_type: FourCC, prev_id: Option<u32>) -> Option<&Atom> {
        let mut seen = prev_id.is_none();
        for a in self.children() {
            if a.atom_type != atom_type {
                continue;
            }
            if seen {
                return Some(a);
            }
            if Some(a.id) == prev_id {
                seen = true;
            }
        }
        None
    }

    /// Number of direct children of a type.
    pub fn count_children(&self, atom_type: FourCC) -> usize {
        self.children()
            .iter()
            .filter(|a| a.atom_type == atom_type)
            .count()
    }

    /// Remove a direct child. Returns the removed atom.
    pub fn remove_child(&mut self, atom_type: FourCC, id: u32) -> Option<Atom> {
        let children = self.children_mut();
        let idx = children
            .iter()
            .position(|a| a.atom_type == atom_type && a.id == id)?;
        Some(children.remove(idx))
    }

    /// Walk a (type, id) path down the tree.
    pub fn find_path(&self, path: &[(FourCC, u32)]) -> Option<&Atom> {
        let mut atom = self;
        for &(t, id) in path {
            atom = atom.find_child(t, id)?;
        }
        Some(atom)
    }

    fn write_node<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        let offset = stream.pos();
        0u32.to_bytes(stream)?;
        self.atom_type.to_bytes(stream)?;
        self.id.to_bytes(stream)?;
        0u16.to_bytes(stream)?;
        let child_count = match &self.data {
            AtomData::Container(c) => c.len() as u16,
            AtomData::Leaf(_) => 0,
        };
        child_count.to_bytes(stream)?;
        0u32.to_bytes(stream)?;
        match &self.data {
            AtomData::Container(c) => {
                for child in c {
                    child.write_node(stream)?;
                }
            },
            AtomData::Leaf(d) => stream.write(d)?,
        }
        // Back-patch the node size.
        let pos = stream.pos();
        stream.seek(offset)?;
        ((pos - offset) as u32).to_bytes(stream)?;
        stream.seek(pos)
    }

    fn read_node<R: ReadBytes>(stream: &mut R, depth: u32) -> io::Result<Atom> {
        if depth > MAX_DEPTH {
            return Err(ioerr!(InvalidData, "atom tree too deep"));
        }
        let size = u32::from_bytes(stream)? as u64;
        if size < NODE_HEADER_SIZE {
            return Err(ioerr!(InvalidData, "atom node size {} too small", size));
        }
        let atom_type = FourCC::from_bytes(stream)?;
        let id = u32::from_bytes(stream)?;
        stream.skip(2)?;
        let child_count = u16::from_bytes(stream)?;
        stream.skip(4)?;

        let payload = size - NODE_HEADER_SIZE;
        if payload > stream.left() {
            return Err(ioerr!(UnexpectedEof, "atom node size {} too large", size));
        }

        let data = if child_count > 0 {
            let end = stream.left() - payload;
            let mut children = Vec::with_capacity(child_count as usize);
            for _ in 0..child_count {
                if stream.left() <= end {
                    return Err(ioerr!(InvalidData, "atom node children overrun node size"));
                }
                children.push(Atom::read_node(stream, depth + 1)?);
            }
            if stream.left() < end {
                return Err(ioerr!(InvalidData, "atom node children overrun node size"));
            }
            // Skip trailing padding.
            stream.skip(stream.left() - end)?;
            AtomData::Container(children)
        } else if payload == 0 {
            AtomData::Leaf(Vec::new())
        } else {
            AtomData::Leaf(stream.read(payload)?.to_vec())
        };

        Ok(Atom { atom_type, id, data })
    }
}

impl Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut dbg = f.debug_struct("Atom");
        dbg.field("type", &self.atom_type);
        dbg.field("id", &self.id);
        match &self.data {
            AtomData::Container(c) => dbg.field("children", c),
            AtomData::Leaf(d) => dbg.field("data", &format!("[u8; {}]", d.len())),
        };
        dbg.finish()
    }
}

fn next_free_id(children: &[Atom], atom_type: FourCC) -> u32 {
    children
        .iter()
        .filter(|a| a.atom_type == atom_type)
        .map(|a| a.id)
        .max()
        .map(|id| id + 1)
        .unwrap_or(1)
}

fn insert_into(children: &mut Vec<Atom>, child: Atom) -> io::Result<&mut Atom> {
    if children
        .iter()
        .any(|a| a.atom_type == child.atom_type && a.id == child.id)
    {
        return Err(ioerr!(
            AlreadyExists,
            "atom {}#{} already present",
            child.atom_type,
            child.id
        ));
    }
    children.push(child);
    Ok(children.last_mut().unwrap())
}

/// A tree of atoms.
///
/// The container itself behaves like an anonymous root atom: children
/// are inserted and looked up directly on it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AtomContainer {
    root: Vec<Atom>,
}

impl AtomContainer {
    pub fn new() -> AtomContainer {
        AtomContainer::default()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.root
    }

    pub fn insert(&mut self, atom: Atom) -> io::Result<&mut Atom> {
        insert_into(&mut self.root, atom)
    }

    pub fn insert_auto_id(&mut self, atom_type: FourCC, data: AtomData) -> &mut Atom {
        let id = next_free_id(&self.root, atom_type);
        insert_into(&mut self.root, Atom { atom_type, id, data }).unwrap()
    }

    pub fn find(&self, atom_type: FourCC, id: u32) -> Option<&Atom> {
        self.root
            .iter()
            .find(|a| a.atom_type == atom_type && a.id == id)
    }

    pub fn find_mut(&mut self, atom_type: FourCC, id: u32) -> Option<&mut Atom> {
        self.root
            .iter_mut()
            .find(|a| a.atom_type == atom_type && a.id == id)
    }

    pub fn next_atom(&self, atom_type: FourCC, prev_id: Option<u32>) -> Option<&Atom> {
        let mut seen = prev_id.is_none();
        for a in &self.root {
            if a.atom_type != atom_type {
                continue;
            }
            if seen {
                return Some(a);
            }
            if Some(a.id) == prev_id {
                seen = true;
            }
        }
        None
    }

    pub fn remove(&mut self, atom_type: FourCC, id: u32) -> Option<Atom> {
        let idx = self
            .root
            .iter()
            .position(|a| a.atom_type == atom_type && a.id == id)?;
        Some(self.root.remove(idx))
    }

    pub fn find_path(&self, path: &[(FourCC, u32)]) -> Option<&Atom> {
        let (&(t, id), rest) = path.split_first()?;
        self.find(t, id)?.find_path(rest)
    }
}

impl Debug for AtomContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AtomContainer").field("atoms", &self.root).finish()
    }
}

impl FromBytes for AtomContainer {
    fn from_bytes<R: ReadBytes>(stream: &mut R) -> io::Result<AtomContainer> {
        let root = Atom::read_node(stream, 0)?;
        if root.atom_type != ROOT_TYPE || root.id != ROOT_ID {
            return Err(ioerr!(
                InvalidData,
                "container root is {}#{}, not {}#{}",
                root.atom_type,
                root.id,
                ROOT_TYPE,
                ROOT_ID
            ));
        }
        let root = match root.data {
            AtomData::Container(c) => c,
            // An empty container serializes as a childless root.
            AtomData::Leaf(d) if d.is_empty() => Vec::new(),
            AtomData::Leaf(_) => {
                return Err(ioerr!(InvalidData, "container root is a leaf atom"));
            },
        };
        Ok(AtomContainer { root })
    }

    fn min_size() -> usize {
        NODE_HEADER_SIZE as usize
    }
}

impl ToBytes for AtomContainer {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        let root = Atom {
            atom_type: ROOT_TYPE,
            id:        ROOT_ID,
            data:      AtomData::Container(self.root.clone()),
        };
        root.write_node(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemWriter;

    const PREF: FourCC = FourCC::new(b"pref");
    const DATA: FourCC = FourCC::new(b"data");

    fn sample() -> AtomContainer {
        let mut c = AtomContainer::new();
        let pref = c.insert(Atom::container(PREF, 1)).unwrap();
        pref.insert_child(Atom::leaf(DATA, 1, b"hello".to_vec())).unwrap();
        pref.insert_child(Atom::leaf(DATA, 2, b"world".to_vec())).unwrap();
        c.insert(Atom::leaf(DATA, 1, vec![1, 2, 3])).unwrap();
        c
    }

    #[test]
    fn roundtrip() {
        let c = sample();
        let mut w = MemWriter::new();
        c.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(&buf[4..8], b"sean");

        let c2 = AtomContainer::from_bytes(&mut &buf[..]).unwrap();
        assert_eq!(c, c2);
        let leaf = c2.find_path(&[(PREF, 1), (DATA, 2)]).unwrap();
        assert_eq!(leaf.data(), Some(&b"world"[..]));
    }

    #[test]
    fn empty_roundtrip() {
        let c = AtomContainer::new();
        let mut w = MemWriter::new();
        c.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf.len(), 20);
        let c2 = AtomContainer::from_bytes(&mut &buf[..]).unwrap();
        assert_eq!(c2.atoms().len(), 0);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut c = sample();
        let err = c.insert(Atom::leaf(DATA, 1, vec![])).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn auto_id_assignment() {
        let mut c = sample();
        let a = c.insert_auto_id(DATA, AtomData::Leaf(vec![9]));
        assert_eq!(a.id(), 2);
        let a = c.insert_auto_id(PREF, AtomData::Container(Vec::new()));
        assert_eq!(a.id(), 2);
    }

    #[test]
    fn cursor_iteration() {
        let c = sample();
        let pref = c.find(PREF, 1).unwrap();
        let first = pref.next_child(DATA, None).unwrap();
        assert_eq!(first.id(), 1);
        let second = pref.next_child(DATA, Some(first.id())).unwrap();
        assert_eq!(second.id(), 2);
        assert!(pref.next_child(DATA, Some(second.id())).is_none());
        assert_eq!(pref.count_children(DATA), 2);
    }

    #[test]
    fn child_by_index_is_one_based() {
        let c = sample();
        let pref = c.find(PREF, 1).unwrap();
        assert_eq!(pref.child_by_index(DATA, 1).unwrap().id(), 1);
        assert_eq!(pref.child_by_index(DATA, 2).unwrap().id(), 2);
        assert!(pref.child_by_index(DATA, 0).is_none());
        assert!(pref.child_by_index(DATA, 3).is_none());
    }

    #[test]
    fn remove_child() {
        let mut c = sample();
        let pref = c.find_mut(PREF, 1).unwrap();
        assert!(pref.remove_child(DATA, 1).is_some());
        assert!(pref.find_child(DATA, 1).is_none());
        assert_eq!(pref.count_children(DATA), 1);
    }

    #[test]
    fn bad_root_rejected() {
        let mut w = MemWriter::new();
        Atom::leaf(FourCC::new(b"junk"), 1, vec![]).write_node(&mut w).unwrap();
        let buf = w.into_vec();
        let err = AtomContainer::from_bytes(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
