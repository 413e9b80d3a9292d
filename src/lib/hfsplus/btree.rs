use crate::internal::*;
use crate::{Error, ReadExt, Result};
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, trace};

/// Size of the reserved user data record in the header node.
const HEADER_USER_DATA_SIZE: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Index,
    Header,
    Map,
}

impl NodeKind {
    pub fn to_raw(self) -> i8 {
        match self {
            NodeKind::Leaf => kBTLeafNode,
            NodeKind::Index => kBTIndexNode,
            NodeKind::Header => kBTHeaderNode,
            NodeKind::Map => kBTMapNode,
        }
    }

    #[allow(non_upper_case_globals)]
    pub fn from_raw(kind: i8) -> Result<Self> {
        match kind {
            kBTLeafNode => Ok(NodeKind::Leaf),
            kBTIndexNode => Ok(NodeKind::Index),
            kBTHeaderNode => Ok(NodeKind::Header),
            kBTMapNode => Ok(NodeKind::Map),
            _ => Err(Error::BadNode),
        }
    }
}

/// One fixed-size B-tree node: descriptor, records and the trailing offset
/// table, which is only materialized by [`Node::to_bytes`].
#[derive(Debug, Clone)]
pub struct Node {
    pub f_link: u32,
    pub b_link: u32,
    pub kind: NodeKind,
    pub height: u8,
    node_size: u16,
    records: Vec<Vec<u8>>,
}

impl Node {
    fn empty(kind: NodeKind, height: u8, node_size: u16) -> Self {
        Self {
            f_link: 0,
            b_link: 0,
            kind,
            height,
            node_size,
            records: Vec::new(),
        }
    }

    /// Node 0: header record, reserved user data and the node allocation map.
    pub fn create_header_node(header: &BTHeaderRec, node_size: u16) -> Result<Self> {
        let mut node = Self::empty(NodeKind::Header, 0, node_size);
        let mut header_bytes = Vec::with_capacity(BTHeaderRec::SIZE);
        header.export(&mut header_bytes)?;
        node.add_record(&header_bytes)?;
        node.add_record(&[0; HEADER_USER_DATA_SIZE])?;
        node.add_record(&vec![0; header_map_len(node_size)])?;
        Ok(node)
    }

    pub fn create_leaf_node(height: u8, node_size: u16) -> Self {
        Self::empty(NodeKind::Leaf, height, node_size)
    }

    pub fn create_index_node(height: u8, node_size: u16) -> Self {
        Self::empty(NodeKind::Index, height, node_size)
    }

    /// A map node continuing the header node's allocation map.
    pub fn create_map_node(node_size: u16) -> Result<Self> {
        let mut node = Self::empty(NodeKind::Map, 0, node_size);
        node.add_record(&vec![0; map_node_map_len(node_size)])?;
        Ok(node)
    }

    pub fn node_size(&self) -> u16 {
        self.node_size
    }

    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    /// Bytes left for records and their offset table entries.
    pub fn free_space(&self) -> usize {
        let used = BTNodeDescriptor::SIZE
            + self.records.iter().map(Vec::len).sum::<usize>()
            + 2 * (self.records.len() + 1);
        (self.node_size as usize).saturating_sub(used)
    }

    pub fn can_fit(&self, len: usize) -> bool {
        len + 2 <= self.free_space()
    }

    pub fn add_record(&mut self, record: &[u8]) -> Result<()> {
        if !self.can_fit(record.len()) {
            return Err(Error::NodeOverflow {
                len: record.len(),
                free: self.free_space(),
            });
        }
        self.records.push(record.to_vec());
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let node_size = self.node_size as usize;
        let mut bytes = Vec::with_capacity(node_size);
        BTNodeDescriptor {
            fLink: self.f_link,
            bLink: self.b_link,
            kind: self.kind.to_raw(),
            height: self.height,
            numRecords: self.records.len() as u16,
            reserved: 0,
        }
        .export(&mut bytes)?;

        let mut offsets = Vec::with_capacity(self.records.len() + 1);
        for record in &self.records {
            offsets.push(bytes.len() as u16);
            bytes.extend_from_slice(record);
        }
        offsets.push(bytes.len() as u16);

        bytes.resize(node_size, 0);
        // Offsets run backwards from the end of the node, record 0 last.
        for (i, offset) in offsets.iter().enumerate() {
            let at = node_size - 2 * (i + 1);
            bytes[at..at + 2].copy_from_slice(&offset.to_be_bytes());
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let node_size = u16::try_from(bytes.len()).map_err(|_| Error::BadNode)?;
        let mut source = bytes;
        let descriptor = BTNodeDescriptor::import(&mut source)?;
        let kind = NodeKind::from_raw(descriptor.kind)?;
        let count = descriptor.numRecords as usize;
        if BTNodeDescriptor::SIZE + 2 * (count + 1) > bytes.len() {
            return Err(Error::BadNode);
        }

        let offset_at = |i: usize| -> Result<usize> {
            let at = bytes.len() - 2 * (i + 1);
            let mut slice = &bytes[at..at + 2];
            Ok(slice.read_u16_be()? as usize)
        };
        let table_start = bytes.len() - 2 * (count + 1);
        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            let (start, end) = (offset_at(i)?, offset_at(i + 1)?);
            if start < BTNodeDescriptor::SIZE || end < start || end > table_start {
                return Err(Error::BadNode);
            }
            records.push(bytes[start..end].to_vec());
        }

        Ok(Self {
            f_link: descriptor.fLink,
            b_link: descriptor.bLink,
            kind,
            height: descriptor.height,
            node_size,
            records,
        })
    }
}

fn header_map_len(node_size: u16) -> usize {
    node_size as usize - BTNodeDescriptor::SIZE - BTHeaderRec::SIZE - HEADER_USER_DATA_SIZE - 2 * 4
}

fn map_node_map_len(node_size: u16) -> usize {
    node_size as usize - 20
}

/// Splits an index record into its key bytes and child node number.
pub fn split_index_record(record: &[u8]) -> Result<(&[u8], u32)> {
    let mut source = record;
    let key_len = source.read_u16_be()? as usize + 2;
    if record.len() != key_len + 4 {
        return Err(Error::BadNode);
    }
    let (key, mut child) = record.split_at(key_len);
    Ok((key, child.read_u32_be()?))
}

/// Static parameters of one of the volume's B-trees.
#[derive(Debug, Copy, Clone)]
pub struct TreeConfig {
    pub node_size: u16,
    pub max_key_length: u16,
    pub key_compare_type: u8,
    pub attributes: BTreeAttributes,
}

impl TreeConfig {
    pub const NODE_SIZE: u16 = 4096;

    pub fn catalog() -> Self {
        Self {
            node_size: Self::NODE_SIZE,
            max_key_length: kHFSPlusCatalogKeyMaximumLength,
            key_compare_type: kHFSCaseFolding,
            attributes: BTreeAttributes::BIG_KEYS | BTreeAttributes::VARIABLE_INDEX_KEYS,
        }
    }

    pub fn extents() -> Self {
        Self {
            node_size: Self::NODE_SIZE,
            max_key_length: kHFSPlusExtentKeyMaximumLength,
            key_compare_type: 0,
            attributes: BTreeAttributes::BIG_KEYS,
        }
    }

    pub fn attributes() -> Self {
        Self {
            node_size: Self::NODE_SIZE,
            max_key_length: kHFSPlusAttrKeyMaximumLength,
            key_compare_type: 0,
            attributes: BTreeAttributes::BIG_KEYS | BTreeAttributes::VARIABLE_INDEX_KEYS,
        }
    }
}

/// A serialized key and the record body stored after it in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

impl LeafEntry {
    pub fn len(&self) -> usize {
        self.key.len() + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_record(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(self.len());
        record.extend_from_slice(&self.key);
        record.extend_from_slice(&self.data);
        record
    }
}

/// A B-tree file under construction: node 0 is always the header node.
#[derive(Debug, Clone)]
pub struct BTreeFile {
    config: TreeConfig,
    header: BTHeaderRec,
    nodes: Vec<Node>,
}

impl BTreeFile {
    pub fn new(config: TreeConfig) -> Result<Self> {
        let header = BTHeaderRec {
            nodeSize: config.node_size,
            maxKeyLength: config.max_key_length,
            totalNodes: 1,
            btreeType: kHFSBTreeType,
            keyCompareType: config.key_compare_type,
            attributes: config.attributes.bits(),
            ..Default::default()
        };
        let nodes = vec![Node::create_header_node(&header, config.node_size)?];
        Ok(Self {
            config,
            header,
            nodes,
        })
    }

    pub fn header(&self) -> &BTHeaderRec {
        &self.header
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: u32) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    pub fn allocate_node(&mut self, node: Node) -> Result<u32> {
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| Error::InvalidData("B-tree node numbers exhausted".into()))?;
        self.nodes.push(node);
        self.header.totalNodes = index + 1;
        Ok(index)
    }

    /// Bulk loads `entries`, which must already be in ascending key order.
    /// Leaves are filled to capacity left to right; each full node hands the
    /// first key of its successor up to the next index level.
    pub fn build_from_sorted_records(&mut self, entries: &[LeafEntry]) -> Result<()> {
        let node_size = self.config.node_size;
        self.nodes.truncate(1);
        self.header.treeDepth = 0;
        self.header.rootNode = 0;
        self.header.leafRecords = 0;
        self.header.firstLeafNode = 0;
        self.header.lastLeafNode = 0;
        self.header.totalNodes = 1;
        if entries.is_empty() {
            return Ok(());
        }

        let mut levels: Vec<u32> = Vec::new();
        let mut current = self.allocate_node(Node::create_leaf_node(1, node_size))?;
        let mut current_first = 0;
        self.header.firstLeafNode = current;

        for (i, entry) in entries.iter().enumerate() {
            let record = entry.to_record();
            if !Node::create_leaf_node(1, node_size).can_fit(record.len()) {
                return Err(Error::RecordTooLarge {
                    len: record.len(),
                    node_size,
                });
            }
            if !self.nodes[current as usize].can_fit(record.len()) {
                self.promote_key(&entries[current_first].key, current, 0, &mut levels)?;
                let next = self.allocate_node(Node::create_leaf_node(1, node_size))?;
                self.nodes[current as usize].f_link = next;
                self.nodes[next as usize].b_link = current;
                trace!("leaf {current} full, continuing in leaf {next}");
                current = next;
                current_first = i;
            }
            self.nodes[current as usize].add_record(&record)?;
            self.header.leafRecords += 1;
        }

        if !levels.is_empty() {
            self.promote_key(&entries[current_first].key, current, 0, &mut levels)?;
        }

        self.header.lastLeafNode = current;
        self.header.rootNode = levels.last().copied().unwrap_or(current);
        self.header.treeDepth = levels.len() as u16 + 1;
        debug!(
            "bulk loaded {} records into {} nodes, depth {}, root {}",
            self.header.leafRecords,
            self.nodes.len(),
            self.header.treeDepth,
            self.header.rootNode
        );
        Ok(())
    }

    /// Adds a pointer to `child` under `key` on index level `level`
    /// (0 is the level directly above the leaves). `levels[l]` is the node
    /// currently being filled on level `l`.
    fn promote_key(&mut self, key: &[u8], child: u32, level: usize, levels: &mut Vec<u32>) -> Result<()> {
        let node_size = self.config.node_size;
        let mut record = Vec::with_capacity(key.len() + 4);
        record.extend_from_slice(key);
        record.extend_from_slice(&child.to_be_bytes());
        // An index node must hold at least two pointers or promotion never ends.
        if 2 * (record.len() + 2) > node_size as usize - BTNodeDescriptor::SIZE - 2 {
            return Err(Error::RecordTooLarge {
                len: record.len(),
                node_size,
            });
        }

        let height = level as u8 + 2;
        if level == levels.len() {
            let index = self.allocate_node(Node::create_index_node(height, node_size))?;
            levels.push(index);
        }

        let active = levels[level];
        if self.nodes[active as usize].can_fit(record.len()) {
            return self.nodes[active as usize].add_record(&record);
        }

        if level + 1 == levels.len() {
            let first = &self.nodes[active as usize].records[0];
            let first_key = first[..first.len() - 4].to_vec();
            self.promote_key(&first_key, active, level + 1, levels)?;
        }

        let sibling = self.allocate_node(Node::create_index_node(height, node_size))?;
        self.nodes[active as usize].f_link = sibling;
        self.nodes[sibling as usize].b_link = active;
        levels[level] = sibling;
        trace!("index node {active} at height {height} full, continuing in {sibling}");
        self.promote_key(key, sibling, level + 1, levels)?;
        self.nodes[sibling as usize].add_record(&record)
    }

    /// Sizes the file to whole allocation blocks, appends map nodes when the
    /// header node's map is too small, and rewrites the header node.
    pub fn finalize(&mut self, block_size: u32) -> Result<()> {
        let node_size = self.config.node_size;
        let header_bits = header_map_len(node_size) * 8;
        let map_node_bits = map_node_map_len(node_size) * 8;

        let mut map_nodes: Vec<u32> = Vec::new();
        let total_nodes = loop {
            let bytes = (self.nodes.len() as u64) * node_size as u64;
            let rounded = bytes.div_ceil(block_size as u64) * block_size as u64;
            let total = rounded / node_size as u64;
            let capacity = header_bits as u64 + (map_nodes.len() * map_node_bits) as u64;
            if total <= capacity {
                break u32::try_from(total).map_err(|_| Error::VolumeTooLarge(total))?;
            }
            let index = self.allocate_node(Node::create_map_node(node_size)?)?;
            match map_nodes.last() {
                Some(&prev) => self.nodes[prev as usize].f_link = index,
                None => self.nodes[0].f_link = index,
            }
            map_nodes.push(index);
        };

        let used = self.nodes.len() as u32;
        self.header.totalNodes = total_nodes;
        self.header.freeNodes = total_nodes - used;
        self.header.clumpSize = total_nodes.saturating_mul(node_size as u32);

        let mut header_node = Node::create_header_node(&self.header, node_size)?;
        header_node.f_link = self.nodes[0].f_link;
        set_map_bits(&mut header_node.records[2], 0, used);
        self.nodes[0] = header_node;
        for (i, &index) in map_nodes.iter().enumerate() {
            let first = (header_bits + i * map_node_bits) as u32;
            set_map_bits(&mut self.nodes[index as usize].records[0], first, used);
        }
        if !map_nodes.is_empty() {
            debug!("B-tree of {total_nodes} nodes needs {} map nodes", map_nodes.len());
        }
        Ok(())
    }

    /// Size of the serialized file in bytes.
    pub fn byte_len(&self) -> u64 {
        self.header.totalNodes as u64 * self.config.node_size as u64
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.byte_len() as usize);
        for node in &self.nodes {
            bytes.extend_from_slice(&node.to_bytes()?);
        }
        bytes.resize(self.byte_len() as usize, 0);
        Ok(bytes)
    }

    /// Leaf records in chain order, following forward links from the first
    /// leaf.
    pub fn leaf_records(&self) -> Result<Vec<&[u8]>> {
        let mut records = Vec::with_capacity(self.header.leafRecords as usize);
        if self.header.treeDepth == 0 {
            return Ok(records);
        }
        let mut index = self.header.firstLeafNode;
        loop {
            let node = self.node(index).ok_or(Error::BadNode)?;
            if node.kind != NodeKind::Leaf {
                return Err(Error::BadNode);
            }
            records.extend(node.records.iter().map(Vec::as_slice));
            if index == self.header.lastLeafNode {
                break;
            }
            index = node.f_link;
        }
        Ok(records)
    }
}

/// Marks nodes `first..used` that fall into a map record covering nodes
/// starting at `first`. Bits are MSB-first.
fn set_map_bits(map: &mut [u8], first: u32, used: u32) {
    let bits = map.len() as u32 * 8;
    let end = used.saturating_sub(first).min(bits);
    for bit in 0..end {
        map[(bit / 8) as usize] |= 0x80 >> (bit % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: u16 = 512;

    fn config() -> TreeConfig {
        TreeConfig {
            node_size: SMALL,
            max_key_length: 4,
            key_compare_type: 0,
            attributes: BTreeAttributes::BIG_KEYS | BTreeAttributes::VARIABLE_INDEX_KEYS,
        }
    }

    fn entries(count: u32, data_len: usize) -> Vec<LeafEntry> {
        (0..count)
            .map(|i| {
                let mut key = vec![0, 4];
                key.extend_from_slice(&i.to_be_bytes());
                LeafEntry {
                    key,
                    data: vec![(i % 251) as u8; data_len],
                }
            })
            .collect()
    }

    fn first_key(tree: &BTreeFile, index: u32) -> Vec<u8> {
        let node = tree.node(index).unwrap();
        let record = &node.records()[0];
        match node.kind {
            NodeKind::Leaf => record[..6].to_vec(),
            _ => split_index_record(record).unwrap().0.to_vec(),
        }
    }

    fn collect_leaves(tree: &BTreeFile, index: u32, out: &mut Vec<u32>) {
        let node = tree.node(index).unwrap();
        match node.kind {
            NodeKind::Leaf => out.push(index),
            NodeKind::Index => {
                for record in node.records() {
                    let (key, child) = split_index_record(record).unwrap();
                    assert_eq!(key, &first_key(tree, child)[..]);
                    assert_eq!(tree.node(child).unwrap().height + 1, node.height);
                    collect_leaves(tree, child, out);
                }
            }
            kind => panic!("unexpected {kind:?} node in tree"),
        }
    }

    #[test]
    fn record_fits_its_node() -> Result<()> {
        let mut node = Node::create_leaf_node(1, SMALL);
        let mut len = 1;
        while node.can_fit(len) {
            node.add_record(&vec![0xAA; len])?;
            assert_eq!(node.to_bytes()?.len(), SMALL as usize);
            len += 7;
        }
        assert!(matches!(
            node.add_record(&vec![0; len]),
            Err(Error::NodeOverflow { .. })
        ));
        Ok(())
    }

    #[test]
    fn node_decodes_to_itself() -> Result<()> {
        let mut node = Node::create_index_node(3, SMALL);
        node.f_link = 9;
        node.b_link = 4;
        node.add_record(&[1, 2, 3])?;
        node.add_record(&[4, 5])?;
        let decoded = Node::decode(&node.to_bytes()?)?;
        assert_eq!(decoded.kind, NodeKind::Index);
        assert_eq!((decoded.f_link, decoded.b_link, decoded.height), (9, 4, 3));
        assert_eq!(decoded.records(), node.records());
        Ok(())
    }

    #[test]
    fn header_node_layout() -> Result<()> {
        let node = Node::create_header_node(&BTHeaderRec::default(), 4096)?;
        assert_eq!(node.records()[0].len(), 106);
        assert_eq!(node.records()[1].len(), 128);
        assert_eq!(node.records()[2].len(), 3840);
        assert_eq!(node.free_space(), 0);
        Ok(())
    }

    #[test]
    fn empty_tree_is_header_only() -> Result<()> {
        let mut tree = BTreeFile::new(TreeConfig::extents())?;
        tree.build_from_sorted_records(&[])?;
        tree.finalize(4096)?;
        let header = tree.header();
        assert_eq!((header.treeDepth, header.rootNode, header.leafRecords), (0, 0, 0));
        assert_eq!((header.totalNodes, header.freeNodes), (1, 0));
        let bytes = tree.to_bytes()?;
        assert_eq!(bytes.len(), 4096);
        let node = Node::decode(&bytes)?;
        assert_eq!(node.kind, NodeKind::Header);
        assert_eq!(node.records()[2][0], 0x80);
        Ok(())
    }

    #[test]
    fn single_leaf_is_root() -> Result<()> {
        let mut tree = BTreeFile::new(config())?;
        tree.build_from_sorted_records(&entries(3, 8))?;
        let header = tree.header();
        assert_eq!((header.treeDepth, header.rootNode), (1, 1));
        assert_eq!((header.firstLeafNode, header.lastLeafNode), (1, 1));
        assert_eq!(tree.leaf_records()?.len(), 3);
        Ok(())
    }

    #[test]
    fn multi_level_tree_is_consistent() -> Result<()> {
        let input = entries(2000, 40);
        let mut tree = BTreeFile::new(config())?;
        tree.build_from_sorted_records(&input)?;
        tree.finalize(512)?;
        let header = tree.header().clone();
        assert!(header.treeDepth >= 3);
        assert_eq!(header.leafRecords, 2000);
        assert_eq!(tree.node(header.rootNode).unwrap().height as u16, header.treeDepth);

        let chained = tree.leaf_records()?;
        assert_eq!(chained.len(), input.len());
        for (record, entry) in chained.iter().zip(&input) {
            assert_eq!(*record, &entry.to_record()[..]);
        }

        let mut reachable = Vec::new();
        collect_leaves(&tree, header.rootNode, &mut reachable);
        let mut index = header.firstLeafNode;
        for &leaf in &reachable {
            assert_eq!(leaf, index);
            index = tree.node(leaf).unwrap().f_link;
        }
        assert_eq!(*reachable.last().unwrap(), header.lastLeafNode);

        let bytes = tree.to_bytes()?;
        assert_eq!(bytes.len() as u64, tree.byte_len());
        for (i, chunk) in bytes.chunks(SMALL as usize).enumerate().take(tree.nodes().len()) {
            let node = Node::decode(chunk)?;
            assert_eq!(node.records(), tree.nodes()[i].records());
        }
        Ok(())
    }

    #[test]
    fn oversized_record_is_rejected() -> Result<()> {
        let mut tree = BTreeFile::new(config())?;
        let err = tree.build_from_sorted_records(&entries(1, 600)).unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { len: 606, node_size: SMALL }));
        Ok(())
    }

    #[test]
    fn large_tree_gets_map_nodes() -> Result<()> {
        // Two records per leaf: enough leaves to exceed the header map.
        let mut tree = BTreeFile::new(config())?;
        tree.build_from_sorted_records(&entries(4400, 200))?;
        tree.finalize(512)?;
        let header_node = tree.node(0).unwrap();
        assert_ne!(header_node.f_link, 0);
        let map = tree.node(header_node.f_link).unwrap();
        assert_eq!(map.kind, NodeKind::Map);
        assert!(tree.header().totalNodes as usize > (SMALL as usize - 256) * 8);
        assert!(header_node.records()[2].iter().all(|&b| b == 0xFF));
        Ok(())
    }
}
