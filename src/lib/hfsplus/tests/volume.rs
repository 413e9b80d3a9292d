use hfsplus::*;

struct Tree {
    header: BTHeaderRec,
    nodes: Vec<Node>,
}

impl Tree {
    fn read(bytes: &[u8]) -> Result<Self> {
        let header = BTHeaderRec::import(&mut &bytes[BTNodeDescriptor::SIZE..])?;
        let used = (header.totalNodes - header.freeNodes) as usize;
        let nodes = bytes
            .chunks(header.nodeSize as usize)
            .take(used)
            .map(Node::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { header, nodes })
    }

    fn leaf_records(&self) -> Result<Vec<CatalogRecord>> {
        let mut records = Vec::new();
        if self.header.treeDepth == 0 {
            return Ok(records);
        }
        let mut index = self.header.firstLeafNode;
        loop {
            let node = &self.nodes[index as usize];
            assert_eq!(node.kind, NodeKind::Leaf);
            for bytes in node.records() {
                records.push(decode_catalog_record(bytes)?);
            }
            if index == self.header.lastLeafNode {
                assert_eq!(node.f_link, 0);
                return Ok(records);
            }
            assert_eq!(self.nodes[node.f_link as usize].b_link, index);
            index = node.f_link;
        }
    }

    fn first_key(&self, index: u32) -> Result<Vec<u8>> {
        let node = &self.nodes[index as usize];
        let record = &node.records()[0];
        Ok(match node.kind {
            NodeKind::Leaf => {
                let key = decode_catalog_record(record)?.key;
                let mut bytes = Vec::new();
                Key::export(&key, &mut bytes)?;
                bytes
            }
            _ => split_index_record(record)?.0.to_vec(),
        })
    }
}

struct Image {
    bytes: Vec<u8>,
    header: HFSPlusVolumeHeader,
}

impl Image {
    fn parse(bytes: Vec<u8>) -> Result<Self> {
        let header = HFSPlusVolumeHeader::import(&mut &bytes[1024..1536])?;
        Ok(Self { bytes, header })
    }

    fn fork(&self, fork: &HFSPlusForkData) -> &[u8] {
        let start = fork.extents[0].startBlock as usize * self.header.blockSize as usize;
        &self.bytes[start..start + fork.logicalSize as usize]
    }

    fn catalog(&self) -> Result<Tree> {
        Tree::read(self.fork(&self.header.catalogFile))
    }

    fn is_used(&self, block: u32) -> bool {
        let bitmap = self.fork(&self.header.allocationFile);
        bitmap[(block / 8) as usize] & (0x80 >> (block % 8)) != 0
    }
}

fn build(name: &str, block_size: u32, root: &Directory) -> Result<Image> {
    let writer = VolumeWriter::new(VolumeOptions {
        volume_name: name.into(),
        block_size,
        timestamp: hfs_timestamp(1_700_000_000),
    })?;
    Image::parse(writer.build(root)?)
}

fn file_record(records: &[CatalogRecord], name: &str) -> HFSPlusCatalogFile {
    records
        .iter()
        .find_map(|r| match &r.body {
            CatalogBody::File(file) if r.key.node_name.to_name() == name => Some(*file),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no file record named {name}"))
}

#[test]
fn empty_volume() -> Result<()> {
    let image = build("EMPTY", 4096, &Directory::new(""))?;
    let len = image.bytes.len();
    assert_eq!(len, 7 * 4096);
    assert_eq!(image.header.totalBlocks as usize * 4096, len);
    assert_eq!(&image.bytes[1024..1026], b"H+");
    assert_eq!(image.bytes[1024..1536], image.bytes[len - 1024..len - 512]);
    assert!(image.bytes[..1024].iter().all(|&b| b == 0));
    assert!(image.bytes[len - 512..].iter().all(|&b| b == 0));

    let header = &image.header;
    assert_eq!(header.signature, HFSP_SIGNATURE);
    assert_eq!(header.version, 4);
    assert_eq!((header.fileCount, header.folderCount), (0, 0));
    assert_eq!(header.nextCatalogID, kHFSFirstUserCatalogNodeID);
    assert_eq!(header.attributes, VolumeAttributes::UNMOUNTED.bits());

    let records = image.catalog()?.leaf_records()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, CatalogKey::new(kHFSRootParentID, HFSString::from_name("EMPTY")));
    match &records[1].body {
        CatalogBody::FolderThread(to_key) => {
            assert_eq!(records[1].key, CatalogKey::thread(kHFSRootFolderID));
            assert_eq!(to_key.node_name.to_name(), "EMPTY");
        }
        other => panic!("expected root thread, got {other:?}"),
    }
    Ok(())
}

#[test]
fn single_file_volume() -> Result<()> {
    for block_size in [512, 4096] {
        let root = Directory::new("").with(File::new("hello.txt", b"Hello, World!".to_vec()).into());
        let image = build("Hello", block_size, &root)?;
        assert_eq!(image.header.fileCount, 1);

        let records = image.catalog()?.leaf_records()?;
        assert_eq!(records.len(), 4);
        let file = file_record(&records, "hello.txt");
        assert_eq!(file.fileID, 16);
        assert_eq!(file.dataFork.logicalSize, 13);
        assert_eq!(file.dataFork.extents[0].blockCount, 13u32.div_ceil(block_size));
        assert_eq!(file.permissions.fileMode, S_IFREG | 0o644);
        assert_eq!(image.fork(&file.dataFork), b"Hello, World!");

        let threads: Vec<_> = records
            .iter()
            .filter(|r| r.key == CatalogKey::thread(16))
            .collect();
        assert_eq!(threads.len(), 1);
        assert!(matches!(&threads[0].body, CatalogBody::FileThread(k) if k.parent_id == kHFSRootFolderID));
    }
    Ok(())
}

#[test]
fn overflowing_leaf_grows_index() -> Result<()> {
    let mut root = Directory::new("");
    for i in 0..120 {
        root.push(File::new(format!("file-{i:04}.txt"), vec![i as u8; 10]).into());
    }
    let image = build("Many", 4096, &root)?;
    let tree = image.catalog()?;
    assert!(tree.header.treeDepth >= 2);

    let records = tree.leaf_records()?;
    assert_eq!(records.len(), 2 * 121);
    assert!(records.windows(2).all(|w| w[0].key < w[1].key));

    let index_nodes: Vec<_> = tree.nodes.iter().filter(|n| n.kind == NodeKind::Index).collect();
    assert!(!index_nodes.is_empty());
    for node in index_nodes {
        for record in node.records() {
            let (key, child) = split_index_record(record)?;
            assert_eq!(key, &tree.first_key(child)?[..]);
        }
    }
    let root_node = &tree.nodes[tree.header.rootNode as usize];
    assert_eq!(root_node.height as u16, tree.header.treeDepth);
    Ok(())
}

struct Endless;

impl ContentSource for Endless {
    fn len(&self) -> u64 {
        1 << 44
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        panic!("content must not be read for an impossible layout")
    }
}

#[test]
fn impossible_layout_fails() -> Result<()> {
    let root = Directory::new("").with(File::new("huge.bin", Endless).into());
    let writer = VolumeWriter::new(VolumeOptions {
        block_size: 512,
        ..Default::default()
    })?;
    assert!(matches!(writer.build(&root), Err(Error::VolumeTooLarge(_))));
    Ok(())
}

struct Truncated(Vec<u8>);

impl ContentSource for Truncated {
    fn len(&self) -> u64 {
        self.0.len() as u64 * 2
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(&self.0[..]))
    }
}

#[test]
fn short_content_fails() -> Result<()> {
    let root = Directory::new("").with(File::new("short.bin", Truncated(vec![7; 10])).into());
    let writer = VolumeWriter::new(VolumeOptions::default())?;
    match writer.build(&root) {
        Err(Error::ShortRead { name, read, expected }) => {
            assert_eq!((name.as_str(), read, expected), ("short.bin", 10, 20));
        }
        other => panic!("expected a short read, got {other:?}"),
    }
    Ok(())
}

#[test]
fn sizing_is_idempotent() -> Result<()> {
    let mut root = Directory::new("");
    for i in 0..40u32 {
        root.push(File::new(format!("{i}"), vec![0; (i as usize + 1) * 3000]).into());
    }
    let image = build("Sized", 512, &root)?;
    let bitmap_blocks = image.header.allocationFile.totalBlocks;
    let other = (image.header.totalBlocks - bitmap_blocks) as u64;
    let again = solve_volume_size(other, 512, bitmap_blocks)?;
    assert_eq!(again.bitmap_blocks, bitmap_blocks);
    assert_eq!(again.total_blocks, image.header.totalBlocks);

    let clear = (0..image.header.totalBlocks).filter(|&b| !image.is_used(b)).count();
    assert_eq!(clear as u32, image.header.freeBlocks);
    Ok(())
}

#[test]
fn nested_tree_layout() -> Result<()> {
    let root = Directory::new("")
        .with(Symlink::new("link", "a/x").into())
        .with(File::new("b", b"bee".to_vec()).with_mode(0o755).into())
        .with(
            Directory::new("a")
                .with_mode(0o700)
                .with(File::new("x", b"ex".to_vec()).into())
                .into(),
        );
    let image = build("Nested", 4096, &root)?;
    assert_eq!((image.header.fileCount, image.header.folderCount), (3, 1));
    assert_eq!(image.header.nextCatalogID, 20);

    let records = image.catalog()?.leaf_records()?;
    assert_eq!(records.len(), 2 * 5);

    // Pre-order, siblings in name order.
    let folder = records
        .iter()
        .find_map(|r| match &r.body {
            CatalogBody::Folder(f) if f.folderID == 16 => Some(*f),
            _ => None,
        })
        .unwrap();
    assert_eq!(folder.valence, 1);
    assert_eq!(folder.permissions.fileMode, S_IFDIR | 0o700);
    let x = file_record(&records, "x");
    let b = file_record(&records, "b");
    let link = file_record(&records, "link");
    assert_eq!((x.fileID, b.fileID, link.fileID), (17, 18, 19));
    assert_eq!(b.permissions.fileMode, S_IFREG | 0o755);

    assert_eq!(link.permissions.fileMode & S_IFMT, S_IFLNK);
    assert_eq!(link.userInfo.fileType, kSymLinkFileType);
    assert_eq!(link.userInfo.fileCreator, kSymLinkCreator);
    assert_eq!(image.fork(&link.dataFork), b"a/x");
    assert!(link.dataFork.extents[0].startBlock > b.dataFork.extents[0].startBlock);
    assert!(b.dataFork.extents[0].startBlock > x.dataFork.extents[0].startBlock);

    // One thread per entry, pointing back at it.
    for record in &records {
        let (id, parent, name) = match &record.body {
            CatalogBody::Folder(f) => (f.folderID, record.key.parent_id, &record.key.node_name),
            CatalogBody::File(f) => (f.fileID, record.key.parent_id, &record.key.node_name),
            _ => continue,
        };
        let threads: Vec<_> = records.iter().filter(|r| r.key == CatalogKey::thread(id)).collect();
        assert_eq!(threads.len(), 1);
        match &threads[0].body {
            CatalogBody::FolderThread(k) | CatalogBody::FileThread(k) => {
                assert_eq!((k.parent_id, &k.node_name), (parent, name));
            }
            other => panic!("expected thread, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn special_files_come_first() -> Result<()> {
    let root = Directory::new("").with(File::new("data", vec![1; 5000]).into());
    let image = build("Order", 4096, &root)?;
    let h = &image.header;
    let starts = [
        h.allocationFile.extents[0].startBlock,
        h.extentsFile.extents[0].startBlock,
        h.catalogFile.extents[0].startBlock,
        h.attributesFile.extents[0].startBlock,
    ];
    assert_eq!(starts[0], 1);
    assert!(starts.windows(2).all(|w| w[0] < w[1]));

    let extents = Tree::read(image.fork(&h.extentsFile))?;
    assert_eq!((extents.header.treeDepth, extents.header.maxKeyLength), (0, 10));
    let attributes = Tree::read(image.fork(&h.attributesFile))?;
    assert_eq!(attributes.header.maxKeyLength, 266);
    let catalog = image.catalog()?;
    assert_eq!(catalog.header.keyCompareType, kHFSCaseFolding);
    assert_eq!(catalog.header.maxKeyLength, 516);
    Ok(())
}

#[test]
fn case_folding_follows_the_hfs_table() -> Result<()> {
    let root = Directory::new("")
        .with(File::new("\u{24D0}", b"small".to_vec()).into())
        .with(File::new("\u{24B7}", b"B".to_vec()).into())
        .with(File::new("\u{24B6}", b"A".to_vec()).into());
    let image = build("Circled", 4096, &root)?;
    assert_eq!(image.header.fileCount, 3);

    let names: Vec<String> = image
        .catalog()?
        .leaf_records()?
        .iter()
        .filter(|r| r.key.parent_id == kHFSRootFolderID && !r.key.node_name.is_empty())
        .map(|r| r.key.node_name.to_name())
        .collect();
    assert_eq!(names, ["\u{24B6}", "\u{24B7}", "\u{24D0}"]);
    assert_eq!(file_record(&image.catalog()?.leaf_records()?, "\u{24B6}").fileID, 16);

    let root = Directory::new("")
        .with(File::new("\u{10A0}", Vec::new()).into())
        .with(File::new("\u{10D0}", Vec::new()).into());
    assert!(matches!(
        build("Georgian", 4096, &root),
        Err(Error::DuplicateName { parent: 2, .. })
    ));
    Ok(())
}
