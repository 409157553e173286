use std::{fs, io::Write, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use sdfat::{
    format, DirEntry, FatType, File, FormatOptions, OpenFlags, RootDir, ShortName, Volume,
};

use crate::image::{ImageDevice, WallClock};

pub type ImageVolume = Volume<ImageDevice, WallClock>;

pub struct MkfsOptions {
    pub fat_type: FatType,
    pub blocks: u32,
    pub blocks_per_cluster: u8,
    pub partitioned: bool,
    pub label: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LsOptions {
    pub long: bool,
    pub recursive: bool,
}

pub fn mkfs(image: &Path, options: MkfsOptions) -> Result<()> {
    let volume_label = options
        .label
        .as_deref()
        .map(|label| ShortName::new(label).map_err(|_| anyhow!("invalid volume label `{label}`")))
        .transpose()?;
    let mut device = ImageDevice::create(image, options.blocks)?;

    let mut format_options =
        FormatOptions::new(options.fat_type, options.blocks, options.blocks_per_cluster);
    format_options.partitioned = options.partitioned;
    format_options.volume_label = volume_label;
    format_options.volume_id = chrono::Local::now().timestamp() as u32;
    format(&mut device, &format_options)
        .with_context(|| format!("format {}", image.display()))?;

    info!(
        "fatctl: mkfs image={} type={} blocks={} blocks_per_cluster={}",
        image.display(),
        fat_name(options.fat_type),
        device.block_count(),
        options.blocks_per_cluster
    );
    Ok(())
}

pub fn open_volume(image: &Path) -> Result<ImageVolume> {
    let device = ImageDevice::open(image)?;
    let vol = Volume::mount(device, WallClock)
        .with_context(|| format!("mount {}", image.display()))?;
    info!(
        "fatctl: mounted image={} type={} clusters={}",
        image.display(),
        fat_name(vol.fat_type()),
        vol.cluster_count()
    );
    Ok(vol)
}

pub fn info<W: Write>(vol: &mut ImageVolume, out: &mut W) -> Result<()> {
    let geometry = *vol.geometry();
    let free = vol.free_cluster_count()?;
    writeln!(out, "fat type:           {}", fat_name(geometry.fat_type))?;
    writeln!(out, "volume start:       {}", geometry.volume_start_block)?;
    writeln!(out, "blocks per cluster: {}", geometry.blocks_per_cluster)?;
    writeln!(out, "clusters:           {}", geometry.cluster_count)?;
    writeln!(out, "free clusters:      {free}")?;
    writeln!(out, "fat start:          {}", geometry.fat_start_block)?;
    writeln!(out, "fat copies:         {}", geometry.fat_count)?;
    writeln!(out, "blocks per fat:     {}", geometry.blocks_per_fat)?;
    match geometry.root {
        RootDir::Fixed {
            start_block,
            entries,
        } => writeln!(out, "root directory:     block {start_block}, {entries} entries")?,
        RootDir::Cluster(cluster) => writeln!(out, "root directory:     cluster {cluster}")?,
    }
    writeln!(out, "data start:         {}", geometry.data_start_block)?;
    Ok(())
}

pub fn ls<W: Write>(
    vol: &mut ImageVolume,
    path: &str,
    options: LsOptions,
    out: &mut W,
) -> Result<()> {
    let mut dir = open_dir(vol, path)?;
    list_dir(vol, &mut dir, options, 0, out)
}

fn list_dir<W: Write>(
    vol: &mut ImageVolume,
    dir: &mut File,
    options: LsOptions,
    indent: usize,
    out: &mut W,
) -> Result<()> {
    dir.rewind();
    while let Some(entry) = dir.read_dir(vol)? {
        write_entry(&entry, options, indent, out)?;
        if !options.recursive || !entry.is_subdir() {
            continue;
        }
        let index = dir.cur_position() / 32 - 1;
        let mut child = File::new();
        child.open_index(vol, dir, index as u16, OpenFlags::READ)?;
        // a directory entry without a cluster points back at the root
        if child.is_subdir() {
            list_dir(vol, &mut child, options, indent + 2, out)?;
        }
    }
    Ok(())
}

fn write_entry<W: Write>(
    entry: &DirEntry,
    options: LsOptions,
    indent: usize,
    out: &mut W,
) -> Result<()> {
    write!(out, "{:indent$}{}", "", entry.name)?;
    if entry.is_subdir() {
        write!(out, "/")?;
    }
    if options.long {
        let stamp = entry.last_write;
        write!(
            out,
            " {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            stamp.year(),
            stamp.month(),
            stamp.day(),
            stamp.hour(),
            stamp.minute(),
            stamp.second()
        )?;
        if !entry.is_subdir() {
            write!(out, " {}", entry.file_size)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

pub fn cat<W: Write>(vol: &mut ImageVolume, path: &str, out: &mut W) -> Result<u64> {
    let (mut dir, name) = open_parent(vol, path)?;
    let mut file = File::new();
    file.open(vol, &mut dir, name, OpenFlags::READ)
        .with_context(|| path.to_string())?;
    if file.is_dir() {
        bail!("{path}: is a directory");
    }
    let mut buf = [0u8; 4096];
    let mut total = 0u64;
    loop {
        let n = file.read(vol, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    file.close(vol)?;
    Ok(total)
}

pub fn put(vol: &mut ImageVolume, src: &Path, dst: &str) -> Result<u32> {
    let data = fs::read(src).with_context(|| format!("read {}", src.display()))?;
    let size = u32::try_from(data.len())
        .map_err(|_| anyhow!("{}: larger than 4 GiB", src.display()))?;
    let (mut dir, name) = open_parent(vol, dst)?;
    let mut file = File::new();
    file.open(
        vol,
        &mut dir,
        name,
        OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::WRITE,
    )
    .with_context(|| dst.to_string())?;
    file.write(vol, &data)?;
    file.close(vol)?;
    info!("fatctl: put src={} dst={dst} bytes={size}", src.display());
    Ok(size)
}

pub fn rm(vol: &mut ImageVolume, path: &str) -> Result<()> {
    let (mut dir, name) = open_parent(vol, path)?;
    File::remove_in(vol, &mut dir, name).with_context(|| path.to_string())?;
    info!("fatctl: rm path={path}");
    Ok(())
}

pub fn mkdir(vol: &mut ImageVolume, path: &str) -> Result<()> {
    let (mut parent, name) = open_parent(vol, path)?;
    let mut dir = File::new();
    dir.make_dir(vol, &mut parent, name)
        .with_context(|| path.to_string())?;
    dir.close(vol)?;
    info!("fatctl: mkdir path={path}");
    Ok(())
}

pub fn rmdir(vol: &mut ImageVolume, path: &str, recursive: bool) -> Result<()> {
    let (mut parent, name) = open_parent(vol, path)?;
    let mut dir = File::new();
    dir.open(vol, &mut parent, name, OpenFlags::READ)
        .with_context(|| path.to_string())?;
    let removed = if recursive {
        dir.rm_rf_star(vol)
    } else {
        dir.rm_dir(vol)
    };
    removed.with_context(|| path.to_string())?;
    info!("fatctl: rmdir path={path} recursive={recursive}");
    Ok(())
}

pub fn mv(vol: &mut ImageVolume, from: &str, to: &str) -> Result<()> {
    let (mut src_dir, src_name) = open_parent(vol, from)?;
    let mut file = File::new();
    file.open(vol, &mut src_dir, src_name, OpenFlags::READ)
        .with_context(|| from.to_string())?;
    let (mut dst_dir, dst_name) = open_parent(vol, to)?;
    file.rename(vol, &mut dst_dir, dst_name)
        .with_context(|| to.to_string())?;
    file.close(vol)?;
    info!("fatctl: mv from={from} to={to}");
    Ok(())
}

fn fat_name(fat_type: FatType) -> &'static str {
    match fat_type {
        FatType::Fat12 => "FAT12",
        FatType::Fat16 => "FAT16",
        FatType::Fat32 => "FAT32",
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Walks `path` from the root, one 8.3 name per segment.
pub fn open_dir(vol: &mut ImageVolume, path: &str) -> Result<File> {
    let mut dir = File::new();
    dir.open_root(vol)?;
    for segment in segments(path) {
        let mut next = File::new();
        next.open(vol, &mut dir, segment, OpenFlags::READ)
            .with_context(|| format!("{path}: {segment}"))?;
        if !next.is_dir() {
            bail!("{path}: {segment} is not a directory");
        }
        dir = next;
    }
    Ok(dir)
}

/// Opens the directory holding the last segment of `path` and returns that segment.
pub fn open_parent<'p>(vol: &mut ImageVolume, path: &'p str) -> Result<(File, &'p str)> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        bail!("`{path}` does not name an entry");
    }
    Ok((open_dir(vol, parent)?, name))
}
