// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use {
    anyhow::{Context, Result},
    crc32fast::Hasher,
    flate2::{Compression, bufread::ZlibDecoder, bufread::ZlibEncoder},
    hfsplus::{HFSP_SIGNATURE, HFSPlusVolumeHeader},
    std::{
        fs::File,
        io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
        path::Path,
    },
};

mod blkx;
mod koly;
mod xml;

pub use crate::{blkx::*, koly::*, xml::*};

/// Partition name hdiutil gives a bare HFS+ volume.
pub const HFS_PARTITION_NAME: &str = "disk image (Apple_HFS : 0)";

/// Sectors compressed together in one zlib chunk.
const SECTORS_PER_CHUNK: usize = 2048;

pub struct DmgReader<R: Read + Seek> {
    koly: KolyTrailer,
    xml: Plist,
    r: R,
}

impl DmgReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let r = BufReader::with_capacity(10 * 1024 * 1024, File::open(path)?);
        Self::new(r)
    }
}

impl<R: Read + Seek + BufRead> DmgReader<R> {
    pub fn new(mut r: R) -> Result<Self> {
        let koly = KolyTrailer::read_from(&mut r)?;
        r.seek(SeekFrom::Start(koly.plist_offset))?;
        let mut xml = Vec::with_capacity(koly.plist_length as usize);
        (&mut r).take(koly.plist_length).read_to_end(&mut xml)?;
        let xml: Plist = plist::from_reader_xml(&xml[..])?;
        Ok(Self { koly, xml, r })
    }

    pub fn koly(&self) -> &KolyTrailer {
        &self.koly
    }

    pub fn plist(&self) -> &Plist {
        &self.xml
    }

    pub fn sector(&mut self, chunk: &BlkxChunk) -> Result<Box<dyn Read + '_>> {
        let ty = chunk
            .ty()
            .with_context(|| format!("unknown chunk type 0x{:08x}", chunk.ty))?;
        match ty {
            ChunkType::Ignore | ChunkType::Zero => {
                Ok(Box::new(std::io::repeat(0).take(chunk.sector_count * 512)))
            }
            ChunkType::Comment | ChunkType::Term => Ok(Box::new(std::io::empty())),
            ChunkType::Raw => {
                self.r.seek(SeekFrom::Start(chunk.compressed_offset))?;
                Ok(Box::new((&mut self.r).take(chunk.compressed_length)))
            }
            ChunkType::Zlib => {
                self.r.seek(SeekFrom::Start(chunk.compressed_offset))?;
                let compressed_chunk = (&mut self.r).take(chunk.compressed_length);
                Ok(Box::new(ZlibDecoder::new(compressed_chunk)))
            }
            ChunkType::Adc | ChunkType::Bzlib | ChunkType::Lzfse => {
                anyhow::bail!("unsupported chunk type {ty:?}")
            }
        }
    }

    pub fn data_checksum(&mut self) -> Result<u32> {
        self.r.seek(SeekFrom::Start(self.koly.data_fork_offset))?;
        let mut hasher = Hasher::new();
        let mut data_fork = (&mut self.r).take(self.koly.data_fork_length);
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let n = data_fork.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }

    pub fn partition_table(&self, i: usize) -> Result<BlkxTable> {
        self.plist().partitions()[i].table()
    }

    pub fn partition_name(&self, i: usize) -> &str {
        &self.plist().partitions()[i].name
    }

    pub fn partition_data(&mut self, i: usize) -> Result<Vec<u8>> {
        let table = self.partition_table(i)?;
        let mut partition = vec![];
        for chunk in &table.chunks {
            std::io::copy(&mut self.sector(chunk)?, &mut partition)?;
        }
        Ok(partition)
    }
}

pub struct DmgWriter<W: Write + Seek> {
    xml: Plist,
    w: W,
    data_hasher: Hasher,
    main_hasher: Hasher,
    sector_number: u64,
    compressed_offset: u64,
}

impl DmgWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let w = BufWriter::new(File::create(path)?);
        Ok(Self::new(w))
    }
}

impl<W: Write + Seek> DmgWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            xml: Default::default(),
            w,
            data_hasher: Hasher::new(),
            main_hasher: Hasher::new(),
            sector_number: 0,
            compressed_offset: 0,
        }
    }

    /// Writes a single-partition image holding an HFS+ volume.
    pub fn create_hfs(mut self, volume: &[u8]) -> Result<()> {
        anyhow::ensure!(volume.len() >= 1536, "volume too small for an HFS+ header");
        let header = HFSPlusVolumeHeader::import(&mut &volume[1024..1536])
            .map_err(|e| anyhow::anyhow!("bad volume header: {e}"))?;
        anyhow::ensure!(header.signature == HFSP_SIGNATURE, "not an HFS+ volume");
        anyhow::ensure!(
            header.totalBlocks as u64 * header.blockSize as u64 == volume.len() as u64,
            "volume header describes {} blocks of {} bytes, image holds {} bytes",
            header.totalBlocks,
            header.blockSize,
            volume.len()
        );
        self.add_partition(HFS_PARTITION_NAME, volume)?;
        self.finish()
    }

    pub fn add_partition(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(bytes.len() % 512 == 0);
        let id = self.xml.partitions().len() as u32;
        let name = name.to_string();
        let first_sector = self.sector_number;
        let mut table = BlkxTable::new(id, first_sector, crc32fast::hash(bytes));
        for chunk in bytes.chunks(SECTORS_PER_CHUNK * 512) {
            let mut encoder = ZlibEncoder::new(chunk, Compression::best());
            let mut compressed = vec![];
            encoder.read_to_end(&mut compressed)?;
            let compressed_length = compressed.len() as u64;
            let sector_count = chunk.len() as u64 / 512;
            self.w.write_all(&compressed)?;
            self.data_hasher.update(&compressed);
            table.add_chunk(BlkxChunk::new(
                ChunkType::Zlib,
                self.sector_number - first_sector,
                sector_count,
                self.compressed_offset,
                compressed_length,
            ));
            self.sector_number += sector_count;
            self.compressed_offset += compressed_length;
        }
        table.add_chunk(BlkxChunk::term(
            self.sector_number - first_sector,
            self.compressed_offset,
        ));
        self.main_hasher.update(&table.checksum.data[..4]);
        log::debug!(
            "partition {name:?}: {} sectors in {} chunks",
            table.sector_count,
            table.chunks.len() - 1
        );
        self.xml
            .add_partition(Partition::new(id as i32 - 1, name, table));
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        let mut xml = vec![];
        plist::to_writer_xml(&mut xml, &self.xml)?;
        let pos = self.w.stream_position()?;
        let data_digest = self.data_hasher.finalize();
        let main_digest = self.main_hasher.finalize();
        let koly = KolyTrailer::new(
            pos,
            self.sector_number,
            pos,
            xml.len() as _,
            data_digest,
            main_digest,
        );
        self.w.write_all(&xml)?;
        koly.write_to(&mut self.w)?;
        self.w.flush()?;
        Ok(())
    }
}

/// Writes `volume`, a finished HFS+ image, to `dmg` as a compressed UDIF
/// disk image.
pub fn create_dmg(volume: &[u8], dmg: &Path) -> Result<()> {
    DmgWriter::create(dmg)?.create_hfs(volume)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        hfsplus::{Directory, File as HfsFile, VolumeOptions, VolumeWriter},
        std::io::Cursor,
    };

    fn volume() -> Result<Vec<u8>> {
        let root = Directory::new("")
            .with(HfsFile::new("readme.txt", b"read me".to_vec()).into())
            .with(HfsFile::new("zeros.bin", vec![0; 3 * 1024 * 1024]).into());
        let writer = VolumeWriter::new(VolumeOptions {
            volume_name: "Test".into(),
            ..Default::default()
        })?;
        Ok(writer.build(&root)?)
    }

    fn write_dmg(volume: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        DmgWriter::new(Cursor::new(&mut buffer)).create_hfs(volume)?;
        Ok(buffer)
    }

    #[test]
    fn koly_trailer_round_trip() -> Result<()> {
        let koly = KolyTrailer::new(1000, 8, 1000, 300, 0xdead_beef, 0x1234_5678);
        let mut bytes = [0; 512];
        koly.write_to(&mut &mut bytes[..])?;
        assert_eq!(&bytes[..4], b"koly");
        let koly2 = KolyTrailer::read_from(&mut Cursor::new(&bytes))?;
        assert_eq!(koly, koly2);
        assert_eq!(u32::from(koly2.data_fork_digest), 0xdead_beef);
        Ok(())
    }

    #[test]
    fn hfs_volume_round_trip() -> Result<()> {
        let volume = volume()?;
        let dmg = write_dmg(&volume)?;
        let mut reader = DmgReader::new(Cursor::new(dmg))?;
        assert_eq!(
            UdifChecksum::new(reader.data_checksum()?),
            reader.koly().data_fork_digest
        );
        assert_eq!(reader.koly().sector_count, volume.len() as u64 / 512);
        assert_eq!(reader.plist().partitions().len(), 1);
        assert_eq!(reader.partition_name(0), HFS_PARTITION_NAME);

        let table = reader.partition_table(0)?;
        assert_eq!(table.chunks.last().and_then(BlkxChunk::ty), Some(ChunkType::Term));
        let data = reader.partition_data(0)?;
        assert_eq!(u32::from(table.checksum), crc32fast::hash(&data));
        assert!(data == volume);
        Ok(())
    }

    #[test]
    fn compresses_zero_runs() -> Result<()> {
        let volume = volume()?;
        let dmg = write_dmg(&volume)?;
        assert!(dmg.len() < volume.len() / 10);
        Ok(())
    }

    #[test]
    fn rejects_non_hfs_input() {
        let mut buffer = vec![];
        let result = DmgWriter::new(Cursor::new(&mut buffer)).create_hfs(&[0; 4096]);
        assert!(result.is_err());
    }
}
