use {
    crate::UdifChecksum,
    anyhow::Result,
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Read, Write},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkType {
    Zero,
    Raw,
    Ignore,
    Comment,
    Adc,
    Zlib,
    Bzlib,
    Lzfse,
    Term,
}

impl ChunkType {
    pub fn from_u32(ty: u32) -> Option<Self> {
        Some(match ty {
            0x0000_0000 => Self::Zero,
            0x0000_0001 => Self::Raw,
            0x0000_0002 => Self::Ignore,
            0x7fff_fffe => Self::Comment,
            0x8000_0004 => Self::Adc,
            0x8000_0005 => Self::Zlib,
            0x8000_0006 => Self::Bzlib,
            0x8000_0007 => Self::Lzfse,
            0xffff_ffff => Self::Term,
            _ => return None,
        })
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Zero => 0x0000_0000,
            Self::Raw => 0x0000_0001,
            Self::Ignore => 0x0000_0002,
            Self::Comment => 0x7fff_fffe,
            Self::Adc => 0x8000_0004,
            Self::Zlib => 0x8000_0005,
            Self::Bzlib => 0x8000_0006,
            Self::Lzfse => 0x8000_0007,
            Self::Term => 0xffff_ffff,
        }
    }
}

/// One run of sectors, numbered from the start of its partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlkxChunk {
    pub ty: u32,
    pub comment: u32,
    pub sector_number: u64,
    pub sector_count: u64,
    pub compressed_offset: u64,
    pub compressed_length: u64,
}

impl BlkxChunk {
    pub const SIZE: usize = 40;

    pub fn new(
        ty: ChunkType,
        sector_number: u64,
        sector_count: u64,
        compressed_offset: u64,
        compressed_length: u64,
    ) -> Self {
        Self {
            ty: ty.to_u32(),
            comment: 0,
            sector_number,
            sector_count,
            compressed_offset,
            compressed_length,
        }
    }

    pub fn term(sector_number: u64, compressed_offset: u64) -> Self {
        Self::new(ChunkType::Term, sector_number, 0, compressed_offset, 0)
    }

    pub fn ty(&self) -> Option<ChunkType> {
        ChunkType::from_u32(self.ty)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            ty: r.read_u32::<BigEndian>()?,
            comment: r.read_u32::<BigEndian>()?,
            sector_number: r.read_u64::<BigEndian>()?,
            sector_count: r.read_u64::<BigEndian>()?,
            compressed_offset: r.read_u64::<BigEndian>()?,
            compressed_length: r.read_u64::<BigEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.ty)?;
        w.write_u32::<BigEndian>(self.comment)?;
        w.write_u64::<BigEndian>(self.sector_number)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_u64::<BigEndian>(self.compressed_offset)?;
        w.write_u64::<BigEndian>(self.compressed_length)?;
        Ok(())
    }
}

const MISH_SIGNATURE: [u8; 4] = *b"mish";

/// The "mish" block table describing where a partition's sectors live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlkxTable {
    pub version: u32,
    pub sector_number: u64,
    pub sector_count: u64,
    pub data_offset: u64,
    pub buffers_needed: u32,
    pub block_descriptors: u32,
    pub checksum: UdifChecksum,
    pub chunks: Vec<BlkxChunk>,
}

impl BlkxTable {
    pub const HEADER_SIZE: usize = 204;

    pub fn new(id: u32, sector_number: u64, crc32: u32) -> Self {
        Self {
            version: 1,
            sector_number,
            sector_count: 0,
            data_offset: 0,
            buffers_needed: 2056,
            block_descriptors: id,
            checksum: UdifChecksum::new(crc32),
            chunks: Vec::new(),
        }
    }

    pub fn add_chunk(&mut self, chunk: BlkxChunk) {
        self.sector_count += chunk.sector_count;
        self.chunks.push(chunk);
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut signature = [0; 4];
        r.read_exact(&mut signature)?;
        anyhow::ensure!(signature == MISH_SIGNATURE, "invalid blkx signature");
        let version = r.read_u32::<BigEndian>()?;
        let sector_number = r.read_u64::<BigEndian>()?;
        let sector_count = r.read_u64::<BigEndian>()?;
        let data_offset = r.read_u64::<BigEndian>()?;
        let buffers_needed = r.read_u32::<BigEndian>()?;
        let block_descriptors = r.read_u32::<BigEndian>()?;
        let mut reserved = [0; 24];
        r.read_exact(&mut reserved)?;
        let checksum = UdifChecksum::read_from(r)?;
        let count = r.read_u32::<BigEndian>()?;
        let mut chunks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            chunks.push(BlkxChunk::read_from(r)?);
        }
        Ok(Self {
            version,
            sector_number,
            sector_count,
            data_offset,
            buffers_needed,
            block_descriptors,
            checksum,
            chunks,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&MISH_SIGNATURE)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u64::<BigEndian>(self.sector_number)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_u32::<BigEndian>(self.buffers_needed)?;
        w.write_u32::<BigEndian>(self.block_descriptors)?;
        w.write_all(&[0; 24])?;
        self.checksum.write_to(w)?;
        w.write_u32::<BigEndian>(self.chunks.len() as u32)?;
        for chunk in &self.chunks {
            chunk.write_to(w)?;
        }
        Ok(())
    }
}
