use crate::btree::{BTreeFile, LeafEntry, TreeConfig};
use crate::internal::*;
use crate::{Error, HFSString, Key, Record, Result};
use alloc::vec::Vec;
use log::debug;

/// Collects every catalog record of a volume, then bulk loads them in one
/// pass. Each folder and file gets its thread record alongside.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    records: Vec<CatalogRecord>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&mut self, parent: HFSCatalogNodeID, name: HFSString, folder: HFSPlusCatalogFolder) {
        let key = CatalogKey::new(parent, name);
        self.records.push(CatalogRecord {
            key: CatalogKey::thread(folder.folderID),
            body: CatalogBody::FolderThread(key.clone()),
        });
        self.records.push(CatalogRecord {
            key,
            body: CatalogBody::Folder(folder),
        });
    }

    pub fn add_file(&mut self, parent: HFSCatalogNodeID, name: HFSString, file: HFSPlusCatalogFile) {
        let key = CatalogKey::new(parent, name);
        self.records.push(CatalogRecord {
            key: CatalogKey::thread(file.fileID),
            body: CatalogBody::FileThread(key.clone()),
        });
        self.records.push(CatalogRecord {
            key,
            body: CatalogBody::File(file),
        });
    }

    /// The root folder lives in the root parent under the volume name.
    pub fn add_root_folder(&mut self, volume_name: HFSString, valence: u32, date: u32) {
        let root = HFSPlusCatalogFolder::new(kHFSRootFolderID, valence, date, 0o755);
        self.add_folder(kHFSRootParentID, volume_name, root);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    /// Sorts all records into catalog key order and builds the tree, sized
    /// for volumes with `block_size` allocation blocks.
    pub fn build(&self, block_size: u32) -> Result<BTreeFile> {
        let mut sorted: Vec<&CatalogRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let mut entries = Vec::with_capacity(sorted.len());
        for (i, record) in sorted.iter().enumerate() {
            if i > 0 && sorted[i - 1].key == record.key {
                return Err(Error::DuplicateName {
                    parent: record.key.parent_id,
                    name: record.key.node_name.to_name(),
                });
            }
            let mut key = Vec::with_capacity(record.key.encoded_len());
            record.get_key().export(&mut key)?;
            let mut data = Vec::new();
            record.body.export(&mut data)?;
            entries.push(LeafEntry { key, data });
        }

        let mut tree = BTreeFile::new(TreeConfig::catalog())?;
        tree.build_from_sorted_records(&entries)?;
        tree.finalize(block_size)?;
        debug!(
            "catalog: {} records, {} bytes",
            entries.len(),
            tree.byte_len()
        );
        Ok(tree)
    }
}

/// Decodes a catalog leaf record (key followed by body).
pub fn decode_catalog_record(bytes: &[u8]) -> Result<CatalogRecord> {
    let mut source = bytes;
    let key = CatalogKey::import(&mut source)?;
    CatalogRecord::import(&mut source, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    fn file(id: HFSCatalogNodeID) -> HFSPlusCatalogFile {
        HFSPlusCatalogFile::new(id, 0, 0o644, HFSPlusForkData::default())
    }

    fn summary(tree: &BTreeFile) -> Result<Vec<(HFSCatalogNodeID, String, i16)>> {
        tree.leaf_records()?
            .into_iter()
            .map(|bytes| {
                let record = decode_catalog_record(bytes)?;
                Ok((
                    record.key.parent_id,
                    record.key.node_name.to_name(),
                    record.body.record_type(),
                ))
            })
            .collect()
    }

    #[test]
    fn records_come_out_in_key_order() -> Result<()> {
        let mut catalog = CatalogBuilder::new();
        catalog.add_root_folder(HFSString::from_name("Vol"), 2, 0);
        catalog.add_file(kHFSRootFolderID, HFSString::from_name("b.txt"), file(17));
        catalog.add_file(kHFSRootFolderID, HFSString::from_name("A.txt"), file(16));
        assert_eq!(catalog.len(), 6);

        let tree = catalog.build(4096)?;
        assert_eq!(tree.header().leafRecords, 6);
        assert_eq!(
            summary(&tree)?,
            [
                (1, "Vol".into(), kHFSPlusFolderRecord),
                (2, String::new(), kHFSPlusFolderThreadRecord),
                (2, "A.txt".into(), kHFSPlusFileRecord),
                (2, "b.txt".into(), kHFSPlusFileRecord),
                (16, String::new(), kHFSPlusFileThreadRecord),
                (17, String::new(), kHFSPlusFileThreadRecord),
            ]
        );
        Ok(())
    }

    #[test]
    fn thread_points_back_at_entry() -> Result<()> {
        let mut catalog = CatalogBuilder::new();
        catalog.add_root_folder(HFSString::from_name("Vol"), 1, 0);
        catalog.add_folder(
            kHFSRootFolderID,
            HFSString::from_name("docs"),
            HFSPlusCatalogFolder::new(16, 0, 0, 0o755),
        );
        let tree = catalog.build(4096)?;
        let threads: Vec<CatalogRecord> = tree
            .leaf_records()?
            .into_iter()
            .map(decode_catalog_record)
            .filter(|r| !matches!(r, Ok(CatalogRecord { body: CatalogBody::Folder(_), .. })))
            .collect::<Result<_>>()?;
        assert_eq!(threads.len(), 2);
        match &threads[1].body {
            CatalogBody::FolderThread(to_key) => {
                assert_eq!(threads[1].key, CatalogKey::thread(16));
                assert_eq!(to_key.parent_id, kHFSRootFolderID);
                assert_eq!(to_key.node_name.to_name(), "docs");
            }
            other => panic!("expected folder thread, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn case_insensitive_duplicates_are_rejected() {
        let mut catalog = CatalogBuilder::new();
        catalog.add_file(kHFSRootFolderID, HFSString::from_name("Readme"), file(16));
        catalog.add_file(kHFSRootFolderID, HFSString::from_name("README"), file(17));
        assert!(matches!(
            catalog.build(4096),
            Err(Error::DuplicateName { parent: 2, .. })
        ));
    }
}
