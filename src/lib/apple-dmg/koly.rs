use {
    anyhow::Result,
    byteorder::{BigEndian, ReadBytesExt, WriteBytesExt},
    std::io::{Read, Seek, SeekFrom, Write},
};

/// CRC32 checksum in the fixed-size UDIF checksum slot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct UdifChecksum {
    pub ty: u32,
    pub size: u32,
    pub data: [u8; 128],
}

impl Default for UdifChecksum {
    fn default() -> Self {
        Self {
            ty: 2,
            size: 32,
            data: [0; 128],
        }
    }
}

impl std::fmt::Debug for UdifChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "UdifChecksum(crc32 0x{:08x})", u32::from(*self))
    }
}

impl UdifChecksum {
    pub const SIZE: usize = 136;

    pub fn new(crc32: u32) -> Self {
        let mut checksum = Self::default();
        checksum.data[..4].copy_from_slice(&crc32.to_be_bytes());
        checksum
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let ty = r.read_u32::<BigEndian>()?;
        let size = r.read_u32::<BigEndian>()?;
        let mut data = [0; 128];
        r.read_exact(&mut data)?;
        Ok(Self { ty, size, data })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.ty)?;
        w.write_u32::<BigEndian>(self.size)?;
        w.write_all(&self.data)?;
        Ok(())
    }
}

impl From<UdifChecksum> for u32 {
    fn from(checksum: UdifChecksum) -> Self {
        let mut crc = [0; 4];
        crc.copy_from_slice(&checksum.data[..4]);
        u32::from_be_bytes(crc)
    }
}

const KOLY_SIGNATURE: [u8; 4] = *b"koly";

/// The 512-byte trailer closing every UDIF image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KolyTrailer {
    pub version: u32,
    pub header_size: u32,
    pub flags: u32,
    pub running_data_fork_offset: u64,
    pub data_fork_offset: u64,
    pub data_fork_length: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub segment_number: u32,
    pub segment_count: u32,
    pub segment_id: [u8; 16],
    pub data_fork_digest: UdifChecksum,
    pub plist_offset: u64,
    pub plist_length: u64,
    pub code_signature_offset: u64,
    pub code_signature_size: u64,
    pub main_digest: UdifChecksum,
    pub image_variant: u32,
    pub sector_count: u64,
}

impl KolyTrailer {
    pub const SIZE: usize = 512;

    pub fn new(
        data_fork_length: u64,
        sector_count: u64,
        plist_offset: u64,
        plist_length: u64,
        data_digest: u32,
        main_digest: u32,
    ) -> Self {
        let mut segment_id = [0; 16];
        // An all-zero id is still a valid image.
        if let Err(err) = getrandom::fill(&mut segment_id) {
            log::warn!("no random segment id: {err}");
        }
        Self {
            version: 4,
            header_size: Self::SIZE as u32,
            flags: 1,
            running_data_fork_offset: 0,
            data_fork_offset: 0,
            data_fork_length,
            rsrc_fork_offset: 0,
            rsrc_fork_length: 0,
            segment_number: 1,
            segment_count: 1,
            segment_id,
            data_fork_digest: UdifChecksum::new(data_digest),
            plist_offset,
            plist_length,
            code_signature_offset: 0,
            code_signature_size: 0,
            main_digest: UdifChecksum::new(main_digest),
            image_variant: 1,
            sector_count,
        }
    }

    /// Reads the trailer from the last 512 bytes of `r`.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<Self> {
        r.seek(SeekFrom::End(-(Self::SIZE as i64)))?;
        let mut signature = [0; 4];
        r.read_exact(&mut signature)?;
        anyhow::ensure!(signature == KOLY_SIGNATURE, "missing koly trailer");
        let version = r.read_u32::<BigEndian>()?;
        let header_size = r.read_u32::<BigEndian>()?;
        let flags = r.read_u32::<BigEndian>()?;
        let running_data_fork_offset = r.read_u64::<BigEndian>()?;
        let data_fork_offset = r.read_u64::<BigEndian>()?;
        let data_fork_length = r.read_u64::<BigEndian>()?;
        let rsrc_fork_offset = r.read_u64::<BigEndian>()?;
        let rsrc_fork_length = r.read_u64::<BigEndian>()?;
        let segment_number = r.read_u32::<BigEndian>()?;
        let segment_count = r.read_u32::<BigEndian>()?;
        let mut segment_id = [0; 16];
        r.read_exact(&mut segment_id)?;
        let data_fork_digest = UdifChecksum::read_from(r)?;
        let plist_offset = r.read_u64::<BigEndian>()?;
        let plist_length = r.read_u64::<BigEndian>()?;
        let mut reserved1 = [0; 64];
        r.read_exact(&mut reserved1)?;
        let code_signature_offset = r.read_u64::<BigEndian>()?;
        let code_signature_size = r.read_u64::<BigEndian>()?;
        let mut reserved2 = [0; 40];
        r.read_exact(&mut reserved2)?;
        let main_digest = UdifChecksum::read_from(r)?;
        let image_variant = r.read_u32::<BigEndian>()?;
        let sector_count = r.read_u64::<BigEndian>()?;
        Ok(Self {
            version,
            header_size,
            flags,
            running_data_fork_offset,
            data_fork_offset,
            data_fork_length,
            rsrc_fork_offset,
            rsrc_fork_length,
            segment_number,
            segment_count,
            segment_id,
            data_fork_digest,
            plist_offset,
            plist_length,
            code_signature_offset,
            code_signature_size,
            main_digest,
            image_variant,
            sector_count,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&KOLY_SIGNATURE)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u32::<BigEndian>(self.header_size)?;
        w.write_u32::<BigEndian>(self.flags)?;
        w.write_u64::<BigEndian>(self.running_data_fork_offset)?;
        w.write_u64::<BigEndian>(self.data_fork_offset)?;
        w.write_u64::<BigEndian>(self.data_fork_length)?;
        w.write_u64::<BigEndian>(self.rsrc_fork_offset)?;
        w.write_u64::<BigEndian>(self.rsrc_fork_length)?;
        w.write_u32::<BigEndian>(self.segment_number)?;
        w.write_u32::<BigEndian>(self.segment_count)?;
        w.write_all(&self.segment_id)?;
        self.data_fork_digest.write_to(w)?;
        w.write_u64::<BigEndian>(self.plist_offset)?;
        w.write_u64::<BigEndian>(self.plist_length)?;
        w.write_all(&[0; 64])?;
        w.write_u64::<BigEndian>(self.code_signature_offset)?;
        w.write_u64::<BigEndian>(self.code_signature_size)?;
        w.write_all(&[0; 40])?;
        self.main_digest.write_to(w)?;
        w.write_u32::<BigEndian>(self.image_variant)?;
        w.write_u64::<BigEndian>(self.sector_count)?;
        w.write_all(&[0; 12])?;
        Ok(())
    }
}
