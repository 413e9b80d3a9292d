#![allow(non_snake_case, non_upper_case_globals)]

use crate::{HFSString, Read, ReadExt, Result, Write, WriteExt};
use bitflags::bitflags;

/// Owner and group recorded on every catalog entry ("unknown", so the
/// mounting user owns the files).
pub const UNKNOWN_OWNER_ID: u32 = 99;
pub const UNKNOWN_GROUP_ID: u32 = 99;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusBSDInfo {
    pub ownerID: u32,
    pub groupID: u32,
    pub adminFlags: u8,
    pub ownerFlags: u8,
    pub fileMode: u16,
    pub special: u32,
}

impl HFSPlusBSDInfo {
    pub fn new(fileMode: u16) -> Self {
        Self {
            ownerID: UNKNOWN_OWNER_ID,
            groupID: UNKNOWN_GROUP_ID,
            adminFlags: 0,
            ownerFlags: 0,
            fileMode,
            special: 0,
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            ownerID: source.read_u32_be()?,
            groupID: source.read_u32_be()?,
            adminFlags: source.read_u8()?,
            ownerFlags: source.read_u8()?,
            fileMode: source.read_u16_be()?,
            special: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.ownerID)?;
        source.write_u32_be(self.groupID)?;
        source.write_u8(self.adminFlags)?;
        source.write_u8(self.ownerFlags)?;
        source.write_u16_be(self.fileMode)?;
        source.write_u32_be(self.special)?;
        Ok(())
    }
}

pub const S_IRWXU: u16 = 0o0000700;
pub const S_IRWXG: u16 = 0o0000070;
pub const S_IRWXO: u16 = 0o0000007;

/// Permission bits, including setuid/setgid/sticky.
pub const S_IPERM: u16 = 0o0007777;

pub const S_IFMT: u16 = 0o0170000;
pub const S_IFDIR: u16 = 0o0040000;
pub const S_IFREG: u16 = 0o0100000;
pub const S_IFLNK: u16 = 0o0120000;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusForkData {
    pub logicalSize: u64,
    pub clumpSize: u32,
    pub totalBlocks: u32,
    pub extents: HFSPlusExtentRecord,
}

pub type HFSPlusExtentRecord = [HFSPlusExtentDescriptor; 8];

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusExtentDescriptor {
    pub startBlock: u32,
    pub blockCount: u32,
}

impl HFSPlusForkData {
    pub const SIZE: usize = 80;

    /// A fork stored in one contiguous run of blocks.
    pub fn contiguous(logicalSize: u64, clumpSize: u32, extent: HFSPlusExtentDescriptor) -> Self {
        let mut extents = HFSPlusExtentRecord::default();
        extents[0] = extent;
        Self {
            logicalSize,
            clumpSize,
            totalBlocks: extent.blockCount,
            extents,
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            logicalSize: source.read_u64_be()?,
            clumpSize: source.read_u32_be()?,
            totalBlocks: source.read_u32_be()?,
            extents: import_record(source)?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u64_be(self.logicalSize)?;
        source.write_u32_be(self.clumpSize)?;
        source.write_u32_be(self.totalBlocks)?;
        export_record(&self.extents, source)?;
        Ok(())
    }
}

pub fn import_record(source: &mut dyn Read) -> Result<HFSPlusExtentRecord> {
    let mut record = HFSPlusExtentRecord::default();
    for extent in &mut record {
        *extent = HFSPlusExtentDescriptor::import(source)?;
    }
    Ok(record)
}

pub fn export_record(record: &[HFSPlusExtentDescriptor], source: &mut dyn Write) -> Result<()> {
    for r in record {
        r.export(source)?;
    }
    Ok(())
}

impl HFSPlusExtentDescriptor {
    pub fn new(startBlock: u32, blockCount: u32) -> Self {
        Self {
            startBlock,
            blockCount,
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            startBlock: source.read_u32_be()?,
            blockCount: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.startBlock)?;
        source.write_u32_be(self.blockCount)?;
        Ok(())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VolumeAttributes: u32 {
        const HARDWARE_LOCK = 1 << 7;
        const UNMOUNTED = 1 << 8;
        const SPARED_BLOCKS = 1 << 9;
        const NO_CACHE_REQUIRED = 1 << 10;
        const BOOT_VOLUME_INCONSISTENT = 1 << 11;
        const CATALOG_NODE_IDS_REUSED = 1 << 12;
        const JOURNALED = 1 << 13;
        const SOFTWARE_LOCK = 1 << 15;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HFSPlusVolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub lastMountedVersion: u32,
    pub journalInfoBlock: u32,
    pub createDate: u32,
    pub modifyDate: u32,
    pub backupDate: u32,
    pub checkedDate: u32,
    pub fileCount: u32,
    pub folderCount: u32,
    pub blockSize: u32,
    pub totalBlocks: u32,
    pub freeBlocks: u32,
    pub nextAllocation: u32,
    pub rsrcClumpSize: u32,
    pub dataClumpSize: u32,
    pub nextCatalogID: u32,
    pub writeCount: u32,
    pub encodingsBitmap: u64,
    pub finderInfo: [u32; 8],
    pub allocationFile: HFSPlusForkData,
    pub extentsFile: HFSPlusForkData,
    pub catalogFile: HFSPlusForkData,
    pub attributesFile: HFSPlusForkData,
    pub startupFile: HFSPlusForkData,
}

impl HFSPlusVolumeHeader {
    pub const SIZE: usize = 512;

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            signature: source.read_u16_be()?,
            version: source.read_u16_be()?,
            attributes: source.read_u32_be()?,
            lastMountedVersion: source.read_u32_be()?,
            journalInfoBlock: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            modifyDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            checkedDate: source.read_u32_be()?,
            fileCount: source.read_u32_be()?,
            folderCount: source.read_u32_be()?,
            blockSize: source.read_u32_be()?,
            totalBlocks: source.read_u32_be()?,
            freeBlocks: source.read_u32_be()?,
            nextAllocation: source.read_u32_be()?,
            rsrcClumpSize: source.read_u32_be()?,
            dataClumpSize: source.read_u32_be()?,
            nextCatalogID: source.read_u32_be()?,
            writeCount: source.read_u32_be()?,
            encodingsBitmap: source.read_u64_be()?,
            finderInfo: [
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
                source.read_u32_be()?,
            ],
            allocationFile: HFSPlusForkData::import(source)?,
            extentsFile: HFSPlusForkData::import(source)?,
            catalogFile: HFSPlusForkData::import(source)?,
            attributesFile: HFSPlusForkData::import(source)?,
            startupFile: HFSPlusForkData::import(source)?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.signature)?;
        source.write_u16_be(self.version)?;
        source.write_u32_be(self.attributes)?;
        source.write_u32_be(self.lastMountedVersion)?;
        source.write_u32_be(self.journalInfoBlock)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.modifyDate)?;
        source.write_u32_be(self.backupDate)?;
        source.write_u32_be(self.checkedDate)?;
        source.write_u32_be(self.fileCount)?;
        source.write_u32_be(self.folderCount)?;
        source.write_u32_be(self.blockSize)?;
        source.write_u32_be(self.totalBlocks)?;
        source.write_u32_be(self.freeBlocks)?;
        source.write_u32_be(self.nextAllocation)?;
        source.write_u32_be(self.rsrcClumpSize)?;
        source.write_u32_be(self.dataClumpSize)?;
        source.write_u32_be(self.nextCatalogID)?;
        source.write_u32_be(self.writeCount)?;
        source.write_u64_be(self.encodingsBitmap)?;
        for info in &self.finderInfo {
            source.write_u32_be(*info)?;
        }
        self.allocationFile.export(source)?;
        self.extentsFile.export(source)?;
        self.catalogFile.export(source)?;
        self.attributesFile.export(source)?;
        self.startupFile.export(source)?;
        Ok(())
    }
}

pub const HFSP_SIGNATURE: u16 = 0x482b;
pub const kHFSPlusVersion: u16 = 4;
/// "10.0": last written by a non-journaling implementation.
pub const kHFSPlusMountVersion: u32 = 0x3130_2e30;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BTNodeDescriptor {
    pub fLink: u32,
    pub bLink: u32,
    pub kind: i8,
    pub height: u8,
    pub numRecords: u16,
    pub reserved: u16,
}

impl BTNodeDescriptor {
    pub const SIZE: usize = 14;

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            fLink: source.read_u32_be()?,
            bLink: source.read_u32_be()?,
            kind: source.read_i8()?,
            height: source.read_u8()?,
            numRecords: source.read_u16_be()?,
            reserved: source.read_u16_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.fLink)?;
        source.write_u32_be(self.bLink)?;
        source.write_i8(self.kind)?;
        source.write_u8(self.height)?;
        source.write_u16_be(self.numRecords)?;
        source.write_u16_be(self.reserved)?;
        Ok(())
    }
}

pub const kBTLeafNode: i8 = -1;
pub const kBTIndexNode: i8 = 0;
pub const kBTHeaderNode: i8 = 1;
pub const kBTMapNode: i8 = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BTreeAttributes: u32 {
        const BAD_CLOSE = 0x0000_0001;
        const BIG_KEYS = 0x0000_0002;
        const VARIABLE_INDEX_KEYS = 0x0000_0004;
    }
}

pub const kHFSBTreeType: u8 = 0;
pub const kHFSCaseFolding: u8 = 0xCF;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BTHeaderRec {
    pub treeDepth: u16,
    pub rootNode: u32,
    pub leafRecords: u32,
    pub firstLeafNode: u32,
    pub lastLeafNode: u32,
    pub nodeSize: u16,
    pub maxKeyLength: u16,
    pub totalNodes: u32,
    pub freeNodes: u32,
    pub reserved1: u16,
    pub clumpSize: u32,
    pub btreeType: u8,
    pub keyCompareType: u8,
    pub attributes: u32,
    pub reserved3: [u32; 16],
}

impl BTHeaderRec {
    pub const SIZE: usize = 106;

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        let mut header = Self {
            treeDepth: source.read_u16_be()?,
            rootNode: source.read_u32_be()?,
            leafRecords: source.read_u32_be()?,
            firstLeafNode: source.read_u32_be()?,
            lastLeafNode: source.read_u32_be()?,
            nodeSize: source.read_u16_be()?,
            maxKeyLength: source.read_u16_be()?,
            totalNodes: source.read_u32_be()?,
            freeNodes: source.read_u32_be()?,
            reserved1: source.read_u16_be()?,
            clumpSize: source.read_u32_be()?,
            btreeType: source.read_u8()?,
            keyCompareType: source.read_u8()?,
            attributes: source.read_u32_be()?,
            reserved3: [0; 16],
        };
        for r in &mut header.reserved3 {
            *r = source.read_u32_be()?;
        }
        Ok(header)
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.treeDepth)?;
        source.write_u32_be(self.rootNode)?;
        source.write_u32_be(self.leafRecords)?;
        source.write_u32_be(self.firstLeafNode)?;
        source.write_u32_be(self.lastLeafNode)?;
        source.write_u16_be(self.nodeSize)?;
        source.write_u16_be(self.maxKeyLength)?;
        source.write_u32_be(self.totalNodes)?;
        source.write_u32_be(self.freeNodes)?;
        source.write_u16_be(self.reserved1)?;
        source.write_u32_be(self.clumpSize)?;
        source.write_u8(self.btreeType)?;
        source.write_u8(self.keyCompareType)?;
        source.write_u32_be(self.attributes)?;
        for r in &self.reserved3 {
            source.write_u32_be(*r)?;
        }
        Ok(())
    }
}

pub type HFSCatalogNodeID = u32;
pub const kHFSRootParentID: HFSCatalogNodeID = 1;
pub const kHFSRootFolderID: HFSCatalogNodeID = 2;
pub const kHFSExtentsFileID: HFSCatalogNodeID = 3;
pub const kHFSCatalogFileID: HFSCatalogNodeID = 4;
pub const kHFSBadBlockFileID: HFSCatalogNodeID = 5;
pub const kHFSAllocationFileID: HFSCatalogNodeID = 6;
pub const kHFSStartupFileID: HFSCatalogNodeID = 7;
pub const kHFSAttributesFileID: HFSCatalogNodeID = 8;
pub const kHFSFirstUserCatalogNodeID: HFSCatalogNodeID = 16;

pub const kHFSPlusCatalogKeyMaximumLength: u16 = 516;
pub const kHFSPlusExtentKeyMaximumLength: u16 = 10;
pub const kHFSPlusAttrKeyMaximumLength: u16 = 266;

pub const kHFSPlusFolderRecord: i16 = 0x0001;
pub const kHFSPlusFileRecord: i16 = 0x0002;
pub const kHFSPlusFolderThreadRecord: i16 = 0x0003;
pub const kHFSPlusFileThreadRecord: i16 = 0x0004;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CatalogFlags: u16 {
        const FILE_LOCKED = 0x0001;
        const THREAD_EXISTS = 0x0002;
    }
}

/// Finder type and creator of symbolic links.
pub const kSymLinkFileType: u32 = 0x736c_6e6b;
pub const kSymLinkCreator: u32 = 0x7268_6170;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusCatalogFolder {
    pub flags: u16,
    pub valence: u32,
    pub folderID: HFSCatalogNodeID,
    pub createDate: u32,
    pub contentModDate: u32,
    pub attributeModDate: u32,
    pub accessDate: u32,
    pub backupDate: u32,
    pub permissions: HFSPlusBSDInfo,
    pub userInfo: FolderInfo,
    pub finderInfo: ExtendedFolderInfo,
    pub textEncoding: u32,
    pub reserved: u32,
}

impl HFSPlusCatalogFolder {
    /// Record size including the leading record type.
    pub const SIZE: usize = 88;

    pub fn new(folderID: HFSCatalogNodeID, valence: u32, date: u32, fileMode: u16) -> Self {
        Self {
            valence,
            folderID,
            createDate: date,
            contentModDate: date,
            attributeModDate: date,
            accessDate: date,
            permissions: HFSPlusBSDInfo::new(S_IFDIR | (fileMode & S_IPERM)),
            ..Default::default()
        }
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16_be()?,
            valence: source.read_u32_be()?,
            folderID: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            contentModDate: source.read_u32_be()?,
            attributeModDate: source.read_u32_be()?,
            accessDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            permissions: HFSPlusBSDInfo::import(source)?,
            userInfo: FolderInfo::import(source)?,
            finderInfo: ExtendedFolderInfo::import(source)?,
            textEncoding: source.read_u32_be()?,
            reserved: source.read_u32_be()?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.flags)?;
        source.write_u32_be(self.valence)?;
        source.write_u32_be(self.folderID)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.contentModDate)?;
        source.write_u32_be(self.attributeModDate)?;
        source.write_u32_be(self.accessDate)?;
        source.write_u32_be(self.backupDate)?;
        self.permissions.export(source)?;
        self.userInfo.export(source)?;
        self.finderInfo.export(source)?;
        source.write_u32_be(self.textEncoding)?;
        source.write_u32_be(self.reserved)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HFSPlusCatalogFile {
    pub flags: u16,
    pub reserved1: u32,
    pub fileID: HFSCatalogNodeID,
    pub createDate: u32,
    pub contentModDate: u32,
    pub attributeModDate: u32,
    pub accessDate: u32,
    pub backupDate: u32,
    pub permissions: HFSPlusBSDInfo,
    pub userInfo: FileInfo,
    pub finderInfo: ExtendedFileInfo,
    pub textEncoding: u32,
    pub reserved2: u32,
    pub dataFork: HFSPlusForkData,
    pub resourceFork: HFSPlusForkData,
}

impl HFSPlusCatalogFile {
    /// Record size including the leading record type.
    pub const SIZE: usize = 248;

    pub fn new(fileID: HFSCatalogNodeID, date: u32, fileMode: u16, dataFork: HFSPlusForkData) -> Self {
        Self {
            flags: CatalogFlags::THREAD_EXISTS.bits(),
            fileID,
            createDate: date,
            contentModDate: date,
            attributeModDate: date,
            accessDate: date,
            permissions: HFSPlusBSDInfo::new(S_IFREG | (fileMode & S_IPERM)),
            dataFork,
            ..Default::default()
        }
    }

    /// A symbolic link: the target path is the data fork.
    pub fn symlink(fileID: HFSCatalogNodeID, date: u32, dataFork: HFSPlusForkData) -> Self {
        let mut file = Self::new(fileID, date, 0, dataFork);
        file.permissions.fileMode = S_IFLNK | S_IRWXU | S_IRWXG | S_IRWXO;
        file.userInfo.fileType = kSymLinkFileType;
        file.userInfo.fileCreator = kSymLinkCreator;
        file
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16_be()?,
            reserved1: source.read_u32_be()?,
            fileID: source.read_u32_be()?,
            createDate: source.read_u32_be()?,
            contentModDate: source.read_u32_be()?,
            attributeModDate: source.read_u32_be()?,
            accessDate: source.read_u32_be()?,
            backupDate: source.read_u32_be()?,
            permissions: HFSPlusBSDInfo::import(source)?,
            userInfo: FileInfo::import(source)?,
            finderInfo: ExtendedFileInfo::import(source)?,
            textEncoding: source.read_u32_be()?,
            reserved2: source.read_u32_be()?,
            dataFork: HFSPlusForkData::import(source)?,
            resourceFork: HFSPlusForkData::import(source)?,
        })
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.flags)?;
        source.write_u32_be(self.reserved1)?;
        source.write_u32_be(self.fileID)?;
        source.write_u32_be(self.createDate)?;
        source.write_u32_be(self.contentModDate)?;
        source.write_u32_be(self.attributeModDate)?;
        source.write_u32_be(self.accessDate)?;
        source.write_u32_be(self.backupDate)?;
        self.permissions.export(source)?;
        self.userInfo.export(source)?;
        self.finderInfo.export(source)?;
        source.write_u32_be(self.textEncoding)?;
        source.write_u32_be(self.reserved2)?;
        self.dataFork.export(source)?;
        self.resourceFork.export(source)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Point {
    pub v: i16,
    pub h: i16,
}
impl Point {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            v: source.read_i16_be()?,
            h: source.read_i16_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_i16_be(self.v)?;
        source.write_i16_be(self.h)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}
impl Rect {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            top: source.read_i16_be()?,
            left: source.read_i16_be()?,
            bottom: source.read_i16_be()?,
            right: source.read_i16_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_i16_be(self.top)?;
        source.write_i16_be(self.left)?;
        source.write_i16_be(self.bottom)?;
        source.write_i16_be(self.right)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub fileType: u32,
    pub fileCreator: u32,
    pub finderFlags: u16,
    pub location: Point,
    pub reservedField: u16,
}
impl FileInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            fileType: source.read_u32_be()?,
            fileCreator: source.read_u32_be()?,
            finderFlags: source.read_u16_be()?,
            location: Point::import(source)?,
            reservedField: source.read_u16_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u32_be(self.fileType)?;
        source.write_u32_be(self.fileCreator)?;
        source.write_u16_be(self.finderFlags)?;
        self.location.export(source)?;
        source.write_u16_be(self.reservedField)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExtendedFileInfo {
    pub reserved1: [i16; 4],
    pub extendedFinderFlags: u16,
    pub reserved2: i16,
    pub putAwayFolderID: i32,
}
impl ExtendedFileInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            reserved1: [
                source.read_i16_be()?,
                source.read_i16_be()?,
                source.read_i16_be()?,
                source.read_i16_be()?,
            ],
            extendedFinderFlags: source.read_u16_be()?,
            reserved2: source.read_i16_be()?,
            putAwayFolderID: source.read_i32_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        for r in &self.reserved1 {
            source.write_i16_be(*r)?;
        }
        source.write_u16_be(self.extendedFinderFlags)?;
        source.write_i16_be(self.reserved2)?;
        source.write_i32_be(self.putAwayFolderID)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FolderInfo {
    pub windowBounds: Rect,
    pub finderFlags: u16,
    pub location: Point,
    pub reservedField: u16,
}
impl FolderInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            windowBounds: Rect::import(source)?,
            finderFlags: source.read_u16_be()?,
            location: Point::import(source)?,
            reservedField: source.read_u16_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        self.windowBounds.export(source)?;
        source.write_u16_be(self.finderFlags)?;
        self.location.export(source)?;
        source.write_u16_be(self.reservedField)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExtendedFolderInfo {
    pub scrollPosition: Point,
    pub reserved1: i32,
    pub extendedFinderFlags: u16,
    pub reserved2: i16,
    pub putAwayFolderID: i32,
}
impl ExtendedFolderInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            scrollPosition: Point::import(source)?,
            reserved1: source.read_i32_be()?,
            extendedFinderFlags: source.read_u16_be()?,
            reserved2: source.read_i16_be()?,
            putAwayFolderID: source.read_i32_be()?,
        })
    }
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        self.scrollPosition.export(source)?;
        source.write_i32_be(self.reserved1)?;
        source.write_u16_be(self.extendedFinderFlags)?;
        source.write_i16_be(self.reserved2)?;
        source.write_i32_be(self.putAwayFolderID)
    }
}

#[derive(Debug, Clone)]
pub struct CatalogKey {
    pub parent_id: HFSCatalogNodeID,
    pub node_name: HFSString,
}

impl CatalogKey {
    pub fn new(parent_id: HFSCatalogNodeID, node_name: HFSString) -> Self {
        Self {
            parent_id,
            node_name,
        }
    }

    /// Key of the thread record belonging to `id`.
    pub fn thread(id: HFSCatalogNodeID) -> Self {
        Self::new(id, HFSString::default())
    }

    /// Bytes this key occupies in a node, including the length field.
    pub fn encoded_len(&self) -> usize {
        2 + 4 + 2 + 2 * self.node_name.len()
    }
}

impl crate::Key for CatalogKey {
    fn import(source: &mut dyn Read) -> Result<Self> {
        let key_length = source.read_u16_be()?;
        if key_length < 6 {
            return Err(crate::Error::InvalidData(alloc::format!(
                "catalog key length {key_length} is shorter than its fixed part"
            )));
        }
        let parent_id = source.read_u32_be()?;
        let node_name = HFSString::import(source)?;
        Ok(Self {
            parent_id,
            node_name,
        })
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be((self.encoded_len() - 2) as u16)?;
        source.write_u32_be(self.parent_id)?;
        self.node_name.export(source)
    }
}

impl core::cmp::PartialOrd for CatalogKey {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl core::cmp::Ord for CatalogKey {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        match self.parent_id.cmp(&other.parent_id) {
            core::cmp::Ordering::Less => core::cmp::Ordering::Less,
            core::cmp::Ordering::Greater => core::cmp::Ordering::Greater,
            core::cmp::Ordering::Equal => self.node_name.cmp(&other.node_name),
        }
    }
}

impl core::cmp::PartialEq for CatalogKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == core::cmp::Ordering::Equal
    }
}

impl core::cmp::Eq for CatalogKey {}

#[derive(Debug, Clone)]
pub enum CatalogBody {
    Folder(HFSPlusCatalogFolder),
    File(HFSPlusCatalogFile),
    FolderThread(CatalogKey),
    FileThread(CatalogKey),
}

impl CatalogBody {
    pub fn record_type(&self) -> i16 {
        match self {
            CatalogBody::Folder(_) => kHFSPlusFolderRecord,
            CatalogBody::File(_) => kHFSPlusFileRecord,
            CatalogBody::FolderThread(_) => kHFSPlusFolderThreadRecord,
            CatalogBody::FileThread(_) => kHFSPlusFileThreadRecord,
        }
    }

    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_i16_be(self.record_type())?;
        match self {
            CatalogBody::Folder(folder) => folder.export(source),
            CatalogBody::File(file) => file.export(source),
            CatalogBody::FolderThread(to_key) | CatalogBody::FileThread(to_key) => {
                source.write_i16_be(0)?;
                source.write_u32_be(to_key.parent_id)?;
                to_key.node_name.export(source)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub key: CatalogKey,
    pub body: CatalogBody,
}

impl crate::Record<CatalogKey> for CatalogRecord {
    fn import(source: &mut dyn Read, key: CatalogKey) -> Result<Self> {
        let record_type = source.read_i16_be()?;
        let body = match record_type {
            kHFSPlusFolderRecord => CatalogBody::Folder(HFSPlusCatalogFolder::import(source)?),
            kHFSPlusFileRecord => CatalogBody::File(HFSPlusCatalogFile::import(source)?),
            kHFSPlusFolderThreadRecord | kHFSPlusFileThreadRecord => {
                let _reserved = source.read_i16_be()?;
                let parent_id = source.read_u32_be()?;
                let to_key = CatalogKey::new(parent_id, HFSString::import(source)?);
                if record_type == kHFSPlusFolderThreadRecord {
                    CatalogBody::FolderThread(to_key)
                } else {
                    CatalogBody::FileThread(to_key)
                }
            }
            other => {
                return Err(crate::Error::InvalidRecordType(other));
            }
        };
        Ok(CatalogRecord { key, body })
    }

    fn export(&self, source: &mut dyn Write) -> Result<()> {
        crate::Key::export(&self.key, source)?;
        self.body.export(source)
    }

    fn get_key(&self) -> &CatalogKey {
        &self.key
    }
}
