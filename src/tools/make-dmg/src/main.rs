use clap::{Parser, ValueEnum};
use hfsplus::{ContentSource, Directory, Entry, Symlink, VolumeOptions, VolumeWriter};
use log::{info, warn};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("DMG error: {0}")]
    Dmg(String),
    #[error("HFS+ error: {0}")]
    Hfs(#[from] hfsplus::Error),
    #[error("{}: {reason}", path.display())]
    Input { path: PathBuf, reason: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// zlib-compressed UDIF disk image
    Dmg,
    /// Bare HFS+ volume
    Raw,
}

#[derive(Parser, Debug)]
#[command(about = "Build an HFS+ disk image from a directory")]
struct Args {
    /// Directory whose contents become the volume root
    source: PathBuf,

    /// Output image path
    #[arg(long, short, default_value = "image.dmg")]
    output: PathBuf,

    /// Volume name, defaults to the source directory name
    #[arg(long)]
    volume_name: Option<String>,

    /// Allocation block size in bytes
    #[arg(long, default_value_t = hfsplus::DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    #[arg(long, value_enum, default_value_t = Format::Dmg)]
    format: Format,
}

/// A regular file on the host, opened again when the image is assembled.
struct HostFile {
    path: PathBuf,
    len: u64,
}

struct HostReader(File);

impl hfsplus::Read for HostReader {
    fn read(&mut self, buf: &mut [u8]) -> hfsplus::Result<usize> {
        Read::read(&mut self.0, buf).map_err(|e| hfsplus::Error::Io(e.to_string()))
    }
}

impl ContentSource for HostFile {
    fn len(&self) -> u64 {
        self.len
    }

    fn open(&self) -> hfsplus::Result<Box<dyn hfsplus::Read + '_>> {
        let file = File::open(&self.path)
            .map_err(|e| hfsplus::Error::Io(format!("{}: {e}", self.path.display())))?;
        Ok(Box::new(HostReader(file)))
    }
}

fn file_name(path: &Path) -> Result<String, DiskError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .ok_or_else(|| DiskError::Input {
            path: path.to_path_buf(),
            reason: "file name is not valid UTF-8",
        })
}

fn mode_of(metadata: &std::fs::Metadata) -> u16 {
    (metadata.permissions().mode() & 0o7777) as u16
}

/// Mirrors a host directory into the builder's input tree.
fn load_dir(path: &Path) -> Result<Directory, DiskError> {
    let metadata = std::fs::metadata(path)?;
    let mut dir = Directory::new(file_name(path).unwrap_or_default()).with_mode(mode_of(&metadata));
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let source = entry.path();
        let name = file_name(&source)?;
        let metadata = std::fs::symlink_metadata(&source)?;
        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(&source)?;
            let target = target.to_str().ok_or_else(|| DiskError::Input {
                path: source.clone(),
                reason: "symlink target is not valid UTF-8",
            })?;
            dir.push(Symlink::new(name, target).into());
        } else if file_type.is_dir() {
            dir.push(load_dir(&source)?.into());
        } else if file_type.is_file() {
            let content = HostFile {
                path: source,
                len: metadata.len(),
            };
            dir.push(Entry::File(
                hfsplus::File::new(name, content).with_mode(mode_of(&metadata)),
            ));
        } else {
            warn!("skipping {}: not a file, directory or symlink", source.display());
        }
    }
    Ok(dir)
}

fn now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    hfsplus::hfs_timestamp(unix)
}

fn run(args: &Args) -> Result<(), DiskError> {
    let root = load_dir(&args.source)?;
    let volume_name = match &args.volume_name {
        Some(name) => name.clone(),
        None => file_name(&args.source).unwrap_or_else(|_| VolumeOptions::default().volume_name),
    };
    let writer = VolumeWriter::new(VolumeOptions {
        volume_name,
        block_size: args.block_size,
        timestamp: now(),
    })?;

    info!("building HFS+ volume from {}", args.source.display());
    let volume = writer.build(&root)?;
    match args.format {
        Format::Raw => std::fs::write(&args.output, &volume)?,
        Format::Dmg => apple_dmg::create_dmg(&volume, &args.output)
            .map_err(|e| DiskError::Dmg(e.to_string()))?,
    }
    info!("wrote {} ({} byte volume)", args.output.display(), volume.len());
    Ok(())
}

fn main() -> Result<(), DiskError> {
    env_logger::init();
    let args = Args::parse();
    run(&args)?;
    println!("Disk image created: {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apple_dmg::DmgReader;
    use hfsplus::HFSPlusVolumeHeader;

    fn sample_tree() -> Result<tempfile::TempDir, DiskError> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("App");
        std::fs::create_dir_all(root.join("Contents/MacOS"))?;
        std::fs::write(root.join("Contents/Info.plist"), b"<plist/>")?;
        let binary = root.join("Contents/MacOS/app");
        std::fs::write(&binary, vec![0xCF; 10_000])?;
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755))?;
        std::os::unix::fs::symlink("Contents/MacOS/app", root.join("launcher"))?;
        Ok(dir)
    }

    fn header(volume: &[u8]) -> HFSPlusVolumeHeader {
        HFSPlusVolumeHeader::import(&mut &volume[1024..1536]).unwrap()
    }

    #[test]
    fn parses_arguments() {
        let args = Args::try_parse_from(["make-dmg", "dist", "-o", "out.img", "--format", "raw"]).unwrap();
        assert_eq!(args.source, PathBuf::from("dist"));
        assert_eq!(args.output, PathBuf::from("out.img"));
        assert_eq!(args.format, Format::Raw);
        assert_eq!(args.block_size, 4096);
        assert!(args.volume_name.is_none());
    }

    #[test]
    fn loads_host_directory() -> Result<(), DiskError> {
        let dir = sample_tree()?;
        let root = load_dir(&dir.path().join("App"))?;
        assert_eq!(root.children.len(), 2);
        let launcher = root.children.iter().find(|e| e.name() == "launcher").unwrap();
        assert!(matches!(launcher, Entry::Symlink(link) if link.target == "Contents/MacOS/app"));

        let volume = VolumeWriter::new(VolumeOptions::default())?.build(&root)?;
        let header = header(&volume);
        assert_eq!((header.fileCount, header.folderCount), (3, 2));
        Ok(())
    }

    #[test]
    fn writes_raw_and_dmg_images() -> Result<(), DiskError> {
        let dir = sample_tree()?;
        let raw = dir.path().join("app.img");
        let dmg = dir.path().join("app.dmg");
        let mut args = Args {
            source: dir.path().join("App"),
            output: raw.clone(),
            volume_name: None,
            block_size: 512,
            format: Format::Raw,
        };
        run(&args)?;
        args.output = dmg.clone();
        args.format = Format::Dmg;
        run(&args)?;

        let volume = std::fs::read(&raw)?;
        assert_eq!(header(&volume).blockSize, 512);
        let mut reader = DmgReader::open(&dmg).map_err(|e| DiskError::Dmg(e.to_string()))?;
        let data = reader.partition_data(0).map_err(|e| DiskError::Dmg(e.to_string()))?;
        // Timestamps differ between the two runs.
        assert_eq!(data.len(), volume.len());
        assert_eq!(header(&data).totalBlocks, header(&volume).totalBlocks);
        Ok(())
    }

    #[test]
    fn missing_source_is_an_error() {
        let args = Args::try_parse_from(["make-dmg", "/nonexistent/make-dmg-test"]).unwrap();
        assert!(matches!(run(&args), Err(DiskError::Io(_))));
    }
}
