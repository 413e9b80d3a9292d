use crate::bitmap::{AllocationBitmap, bitmap_blocks};
use crate::btree::{BTreeFile, TreeConfig};
use crate::catalog::CatalogBuilder;
use crate::internal::*;
use crate::{Error, HFS_MAX_NAME_UNITS, HFSString, Read, Result};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use hashbrown::HashMap;
use log::{debug, info};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Seconds between the HFS+ epoch (1904-01-01) and the Unix epoch.
pub const HFS_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Byte offset of the primary volume header.
pub const VOLUME_HEADER_OFFSET: u64 = 1024;

/// Converts Unix seconds to an HFS+ date, saturating at the 2040 limit.
pub fn hfs_timestamp(unix_seconds: u64) -> u32 {
    u32::try_from(unix_seconds.saturating_add(HFS_EPOCH_OFFSET)).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone)]
pub struct VolumeOptions {
    pub volume_name: String,
    /// Allocation block size in bytes: a power of two, at least 512.
    pub block_size: u32,
    /// Creation and modification date of every entry, in HFS+ seconds.
    pub timestamp: u32,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            volume_name: String::from("Untitled"),
            block_size: DEFAULT_BLOCK_SIZE,
            timestamp: hfs_timestamp(0),
        }
    }
}

/// Bytes of a file, read once while the image is assembled.
pub trait ContentSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open(&self) -> Result<Box<dyn Read + '_>>;
}

impl ContentSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.as_slice()))
    }
}

pub enum Entry {
    Directory(Directory),
    File(File),
    Symlink(Symlink),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Directory(dir) => &dir.name,
            Entry::File(file) => &file.name,
            Entry::Symlink(link) => &link.name,
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Entry::Directory(dir) => fmt::Debug::fmt(dir, f),
            Entry::File(file) => fmt::Debug::fmt(file, f),
            Entry::Symlink(link) => fmt::Debug::fmt(link, f),
        }
    }
}

#[derive(Debug)]
pub struct Directory {
    pub name: String,
    pub mode: u16,
    pub children: Vec<Entry>,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: 0o755,
            children: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    pub fn push(&mut self, entry: Entry) {
        self.children.push(entry);
    }

    pub fn with(mut self, entry: Entry) -> Self {
        self.push(entry);
        self
    }
}

pub struct File {
    pub name: String,
    pub mode: u16,
    pub content: Box<dyn ContentSource>,
}

impl File {
    pub fn new(name: impl Into<String>, content: impl ContentSource + 'static) -> Self {
        Self {
            name: name.into(),
            mode: 0o644,
            content: Box::new(content),
        }
    }

    pub fn with_mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("len", &self.content.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct Symlink {
    pub name: String,
    pub target: String,
}

impl Symlink {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }
}

impl From<Directory> for Entry {
    fn from(dir: Directory) -> Self {
        Entry::Directory(dir)
    }
}

impl From<File> for Entry {
    fn from(file: File) -> Self {
        Entry::File(file)
    }
}

impl From<Symlink> for Entry {
    fn from(link: Symlink) -> Self {
        Entry::Symlink(link)
    }
}

/// Encodes and validates one POSIX path component for the catalog.
pub fn encode_name(name: &str) -> Result<HFSString> {
    let invalid = |reason| Error::InvalidName {
        name: name.into(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.contains('/') {
        return Err(invalid("name contains '/'"));
    }
    let encoded = HFSString::from_name(name);
    if encoded.len() > HFS_MAX_NAME_UNITS {
        return Err(invalid("name is longer than 255 UTF-16 units"));
    }
    Ok(encoded)
}

/// Blocks reserved at the start of the volume: boot blocks and the primary
/// volume header.
pub fn header_blocks(block_size: u32) -> u32 {
    (VOLUME_HEADER_OFFSET as u32 + HFSPlusVolumeHeader::SIZE as u32).div_ceil(block_size)
}

/// Blocks reserved at the end: the alternate header and the last sector.
pub fn alternate_header_blocks(block_size: u32) -> u32 {
    (VOLUME_HEADER_OFFSET as u32).div_ceil(block_size)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VolumeSize {
    pub total_blocks: u32,
    pub bitmap_blocks: u32,
}

/// Sizes the allocation file, whose length depends on the volume size it
/// is part of. `other_blocks` is everything except the allocation file.
/// Starting from `bitmap_blocks`, the estimate only grows, so the loop
/// settles on the smallest count covering its own total.
pub fn solve_volume_size(other_blocks: u64, block_size: u32, bitmap_blocks_hint: u32) -> Result<VolumeSize> {
    let mut bitmap = bitmap_blocks_hint.max(1) as u64;
    loop {
        let total = other_blocks + bitmap;
        if total > u32::MAX as u64 {
            return Err(Error::VolumeTooLarge(total));
        }
        let needed = bitmap_blocks(total, block_size);
        if needed <= bitmap {
            return Ok(VolumeSize {
                total_blocks: total as u32,
                bitmap_blocks: bitmap as u32,
            });
        }
        bitmap = needed;
    }
}

#[derive(Debug, Copy, Clone)]
enum Stage {
    CollectEntries,
    ProvisionallyBuildCatalog,
    SizeFixedPointLoop,
    AllocateAll,
    RebuildCatalogWithFinalBlocks,
    AssembleBuffer,
    Done,
}

struct FolderPlan {
    id: HFSCatalogNodeID,
    parent: HFSCatalogNodeID,
    name: HFSString,
    mode: u16,
    valence: u32,
}

struct FilePlan<'a> {
    id: HFSCatalogNodeID,
    parent: HFSCatalogNodeID,
    name: HFSString,
    path_name: &'a str,
    mode: u16,
    len: u64,
    source: &'a dyn ContentSource,
}

struct SymlinkPlan<'a> {
    id: HFSCatalogNodeID,
    parent: HFSCatalogNodeID,
    name: HFSString,
    target: &'a [u8],
}

/// Everything learned from one walk over the input tree. Entries appear in
/// pre-order with siblings in catalog order, which is also CNID order.
struct Plan<'a> {
    root_valence: u32,
    next_id: HFSCatalogNodeID,
    folders: Vec<FolderPlan>,
    files: Vec<FilePlan<'a>>,
    symlinks: Vec<SymlinkPlan<'a>>,
}

impl<'a> Plan<'a> {
    fn collect(root: &'a Directory) -> Result<Self> {
        let mut plan = Plan {
            root_valence: root.children.len() as u32,
            next_id: kHFSFirstUserCatalogNodeID,
            folders: Vec::new(),
            files: Vec::new(),
            symlinks: Vec::new(),
        };
        plan.walk(root, kHFSRootFolderID)?;
        Ok(plan)
    }

    fn assign_id(&mut self) -> Result<HFSCatalogNodeID> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(Error::CatalogIdsExhausted)?;
        Ok(id)
    }

    fn walk(&mut self, dir: &'a Directory, dir_id: HFSCatalogNodeID) -> Result<()> {
        let mut children = Vec::with_capacity(dir.children.len());
        for child in &dir.children {
            children.push((encode_name(child.name())?, child));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));
        for pair in children.windows(2) {
            if pair[0].0.cmp(&pair[1].0) == Ordering::Equal {
                return Err(Error::DuplicateName {
                    parent: dir_id,
                    name: pair[1].1.name().into(),
                });
            }
        }

        for (name, child) in children {
            let id = self.assign_id()?;
            match child {
                Entry::Directory(sub) => {
                    self.folders.push(FolderPlan {
                        id,
                        parent: dir_id,
                        name,
                        mode: sub.mode,
                        valence: sub.children.len() as u32,
                    });
                    self.walk(sub, id)?;
                }
                Entry::File(file) => self.files.push(FilePlan {
                    id,
                    parent: dir_id,
                    name,
                    path_name: &file.name,
                    mode: file.mode,
                    len: file.content.len(),
                    source: file.content.as_ref(),
                }),
                Entry::Symlink(link) => self.symlinks.push(SymlinkPlan {
                    id,
                    parent: dir_id,
                    name,
                    target: link.target.as_bytes(),
                }),
            }
        }
        Ok(())
    }
}

/// Where each special file landed.
struct SpecialExtents {
    allocation: HFSPlusExtentDescriptor,
    extents: HFSPlusExtentDescriptor,
    catalog: HFSPlusExtentDescriptor,
    attributes: HFSPlusExtentDescriptor,
}

/// Builds a complete HFS+ image from a directory tree.
#[derive(Debug)]
pub struct VolumeWriter {
    options: VolumeOptions,
    volume_name: HFSString,
}

impl VolumeWriter {
    pub fn new(options: VolumeOptions) -> Result<Self> {
        let block_size = options.block_size;
        if block_size < 512 || !block_size.is_power_of_two() {
            return Err(Error::InvalidBlockSize(block_size));
        }
        let volume_name = encode_name(&options.volume_name)?;
        Ok(Self {
            options,
            volume_name,
        })
    }

    pub fn options(&self) -> &VolumeOptions {
        &self.options
    }

    /// Runs every build stage and returns the finished image. The name of
    /// `root` is ignored; the volume name takes its place.
    pub fn build(&self, root: &Directory) -> Result<Vec<u8>> {
        let block_size = self.options.block_size;
        let bs = block_size as u64;

        debug!("{:?}", Stage::CollectEntries);
        let plan = Plan::collect(root)?;
        info!(
            "building volume {:?}: {} folders, {} files, {} symlinks",
            self.options.volume_name,
            plan.folders.len(),
            plan.files.len(),
            plan.symlinks.len()
        );

        debug!("{:?}", Stage::ProvisionallyBuildCatalog);
        let catalog = self.build_catalog(&plan, &HashMap::new())?;
        let extents_tree = empty_tree(TreeConfig::extents(), block_size)?;
        let attributes_tree = empty_tree(TreeConfig::attributes(), block_size)?;

        debug!("{:?}", Stage::SizeFixedPointLoop);
        let catalog_blocks = catalog.byte_len().div_ceil(bs);
        let extents_blocks = extents_tree.byte_len().div_ceil(bs).max(1);
        let attributes_blocks = attributes_tree.byte_len().div_ceil(bs).max(1);
        let content_blocks: u64 = plan.files.iter().map(|f| f.len.div_ceil(bs)).sum::<u64>()
            + plan
                .symlinks
                .iter()
                .map(|s| (s.target.len() as u64).div_ceil(bs))
                .sum::<u64>();
        let other_blocks = header_blocks(block_size) as u64
            + alternate_header_blocks(block_size) as u64
            + catalog_blocks
            + extents_blocks
            + attributes_blocks
            + content_blocks;
        let size = solve_volume_size(other_blocks, block_size, 1)?;
        debug!(
            "{} blocks: catalog {catalog_blocks}, content {content_blocks}, bitmap {}",
            size.total_blocks, size.bitmap_blocks
        );

        debug!("{:?}", Stage::AllocateAll);
        let total = size.total_blocks;
        let mut bitmap = AllocationBitmap::new(total);
        bitmap.mark_used(0, header_blocks(block_size))?;
        let alternate = alternate_header_blocks(block_size);
        bitmap.mark_used(total - alternate, alternate)?;

        let mut next = header_blocks(block_size);
        let mut allocate = |bitmap: &mut AllocationBitmap, count: u64| -> Result<HFSPlusExtentDescriptor> {
            let count = u32::try_from(count).map_err(|_| Error::VolumeTooLarge(count))?;
            if count == 0 {
                return Ok(HFSPlusExtentDescriptor::default());
            }
            let start = bitmap.allocate(count, next)?;
            next = start + count;
            Ok(HFSPlusExtentDescriptor::new(start, count))
        };
        let special = SpecialExtents {
            allocation: allocate(&mut bitmap, size.bitmap_blocks as u64)?,
            extents: allocate(&mut bitmap, extents_blocks)?,
            catalog: allocate(&mut bitmap, catalog_blocks)?,
            attributes: allocate(&mut bitmap, attributes_blocks)?,
        };
        let mut file_extents = HashMap::with_capacity(plan.files.len() + plan.symlinks.len());
        for file in &plan.files {
            let extent = allocate(&mut bitmap, file.len.div_ceil(bs))?;
            if extent.blockCount > 0 {
                file_extents.insert(file.id, extent);
            }
        }
        for link in &plan.symlinks {
            let extent = allocate(&mut bitmap, (link.target.len() as u64).div_ceil(bs))?;
            if extent.blockCount > 0 {
                file_extents.insert(link.id, extent);
            }
        }
        let next_allocation = next;

        debug!("{:?}", Stage::RebuildCatalogWithFinalBlocks);
        let catalog = self.build_catalog(&plan, &file_extents)?;
        if catalog.byte_len().div_ceil(bs) != catalog_blocks {
            return Err(Error::InvalidData("catalog size changed between builds".into()));
        }

        debug!("{:?}", Stage::AssembleBuffer);
        let image_len = total as u64 * bs;
        let image_len = usize::try_from(image_len).map_err(|_| Error::VolumeTooLarge(total as u64))?;
        let mut image = vec![0u8; image_len];

        let bitmap_bytes = bitmap.to_bytes(size.bitmap_blocks as usize * block_size as usize);
        place(&mut image, special.allocation, block_size, &bitmap_bytes);
        place(&mut image, special.extents, block_size, &extents_tree.to_bytes()?);
        place(&mut image, special.catalog, block_size, &catalog.to_bytes()?);
        place(&mut image, special.attributes, block_size, &attributes_tree.to_bytes()?);
        for link in &plan.symlinks {
            if let Some(&extent) = file_extents.get(&link.id) {
                place(&mut image, extent, block_size, link.target);
            }
        }
        copy_file_contents(&mut image, &plan.files, &file_extents, block_size)?;

        let header = HFSPlusVolumeHeader {
            signature: HFSP_SIGNATURE,
            version: kHFSPlusVersion,
            attributes: VolumeAttributes::UNMOUNTED.bits(),
            lastMountedVersion: kHFSPlusMountVersion,
            createDate: self.options.timestamp,
            modifyDate: self.options.timestamp,
            checkedDate: self.options.timestamp,
            fileCount: (plan.files.len() + plan.symlinks.len()) as u32,
            folderCount: plan.folders.len() as u32,
            blockSize: block_size,
            totalBlocks: total,
            freeBlocks: bitmap.free_blocks(),
            nextAllocation: next_allocation,
            rsrcClumpSize: block_size,
            dataClumpSize: block_size,
            nextCatalogID: plan.next_id,
            writeCount: 1,
            encodingsBitmap: 1,
            allocationFile: special_fork(special.allocation, block_size),
            extentsFile: special_fork(special.extents, block_size),
            catalogFile: special_fork(special.catalog, block_size),
            attributesFile: special_fork(special.attributes, block_size),
            ..Default::default()
        };
        let mut header_bytes = Vec::with_capacity(HFSPlusVolumeHeader::SIZE);
        header.export(&mut header_bytes)?;
        let primary = VOLUME_HEADER_OFFSET as usize;
        let alternate = image_len - VOLUME_HEADER_OFFSET as usize;
        image[primary..primary + header_bytes.len()].copy_from_slice(&header_bytes);
        image[alternate..alternate + header_bytes.len()].copy_from_slice(&header_bytes);

        debug!("{:?}", Stage::Done);
        info!(
            "volume {:?}: {} blocks of {} bytes, {} free",
            self.options.volume_name,
            total,
            block_size,
            header.freeBlocks
        );
        Ok(image)
    }

    fn build_catalog(
        &self,
        plan: &Plan<'_>,
        extents: &HashMap<HFSCatalogNodeID, HFSPlusExtentDescriptor>,
    ) -> Result<BTreeFile> {
        let date = self.options.timestamp;
        let data_fork = |id: HFSCatalogNodeID, len: u64| match extents.get(&id) {
            Some(&extent) => HFSPlusForkData::contiguous(len, 0, extent),
            None => HFSPlusForkData {
                logicalSize: len,
                ..Default::default()
            },
        };

        let mut catalog = CatalogBuilder::new();
        catalog.add_root_folder(self.volume_name.clone(), plan.root_valence, date);
        for folder in &plan.folders {
            let record = HFSPlusCatalogFolder::new(folder.id, folder.valence, date, folder.mode);
            catalog.add_folder(folder.parent, folder.name.clone(), record);
        }
        for file in &plan.files {
            let record = HFSPlusCatalogFile::new(file.id, date, file.mode, data_fork(file.id, file.len));
            catalog.add_file(file.parent, file.name.clone(), record);
        }
        for link in &plan.symlinks {
            let fork = data_fork(link.id, link.target.len() as u64);
            catalog.add_file(link.parent, link.name.clone(), HFSPlusCatalogFile::symlink(link.id, date, fork));
        }
        catalog.build(self.options.block_size)
    }
}

fn empty_tree(config: TreeConfig, block_size: u32) -> Result<BTreeFile> {
    let mut tree = BTreeFile::new(config)?;
    tree.build_from_sorted_records(&[])?;
    tree.finalize(block_size)?;
    Ok(tree)
}

fn special_fork(extent: HFSPlusExtentDescriptor, block_size: u32) -> HFSPlusForkData {
    let bytes = extent.blockCount as u64 * block_size as u64;
    HFSPlusForkData::contiguous(bytes, u32::try_from(bytes).unwrap_or(u32::MAX), extent)
}

fn place(image: &mut [u8], extent: HFSPlusExtentDescriptor, block_size: u32, bytes: &[u8]) {
    let offset = extent.startBlock as usize * block_size as usize;
    image[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// Reads every regular file into its extent. Extents never overlap, so
/// each file gets a disjoint slice of the image.
fn copy_file_contents(
    image: &mut [u8],
    files: &[FilePlan<'_>],
    extents: &HashMap<HFSCatalogNodeID, HFSPlusExtentDescriptor>,
    block_size: u32,
) -> Result<()> {
    let mut jobs: Vec<(usize, &FilePlan<'_>)> = files
        .iter()
        .filter_map(|file| {
            let extent = extents.get(&file.id)?;
            Some((extent.startBlock as usize * block_size as usize, file))
        })
        .collect();
    jobs.sort_by_key(|&(offset, _)| offset);

    let mut slots = Vec::with_capacity(jobs.len());
    let mut rest: &mut [u8] = image;
    let mut consumed = 0;
    for (offset, file) in jobs {
        let (_, tail) = core::mem::take(&mut rest).split_at_mut(offset - consumed);
        let (slot, tail) = tail.split_at_mut(file.len as usize);
        rest = tail;
        consumed = offset + file.len as usize;
        slots.push((file, slot));
    }

    #[cfg(feature = "parallel")]
    let result = slots.into_par_iter().try_for_each(|(file, slot)| fill(file, slot));
    #[cfg(not(feature = "parallel"))]
    let result = slots.into_iter().try_for_each(|(file, slot)| fill(file, slot));
    result
}

fn fill(file: &FilePlan<'_>, slot: &mut [u8]) -> Result<()> {
    let mut reader = file.source.open()?;
    let mut filled = 0;
    while filled < slot.len() {
        let n = reader.read(&mut slot[filled..])?;
        if n == 0 {
            return Err(Error::ShortRead {
                name: file.path_name.into(),
                read: filled as u64,
                expected: file.len,
            });
        }
        filled += n;
    }
    Ok(())
}
