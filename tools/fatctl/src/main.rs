mod commands;
mod image;
mod logging;

use std::{
    io::{self, StdoutLock, Write},
    path::{Path, PathBuf},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sdfat::FatType;

use commands::{ImageVolume, LsOptions, MkfsOptions};

#[derive(Debug, Parser)]
#[command(name = "fatctl")]
#[command(about = "Inspect and edit FAT12/16/32 disk images")]
struct Cli {
    /// Disk image file
    #[arg(long, short = 'i', global = true, default_value = "disk.img")]
    image: PathBuf,
    /// Repeat for more log output on stderr
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a fresh image and format it
    Mkfs(MkfsArgs),
    Info,
    Ls(LsArgs),
    Cat(PathArgs),
    /// Copy a host file into the image
    Put(PutArgs),
    Rm(PathArgs),
    Mkdir(PathArgs),
    Rmdir(RmdirArgs),
    Mv(MvArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FatKind {
    Fat12,
    Fat16,
    Fat32,
}

impl From<FatKind> for FatType {
    fn from(kind: FatKind) -> Self {
        match kind {
            FatKind::Fat12 => FatType::Fat12,
            FatKind::Fat16 => FatType::Fat16,
            FatKind::Fat32 => FatType::Fat32,
        }
    }
}

#[derive(Debug, Args)]
struct MkfsArgs {
    #[arg(long = "type", value_enum, default_value = "fat16")]
    fat_type: FatKind,
    #[arg(long)]
    blocks: u32,
    #[arg(long = "cluster-blocks", default_value_t = 4)]
    blocks_per_cluster: u8,
    /// Write an MBR with a single partition
    #[arg(long)]
    mbr: bool,
    #[arg(long)]
    label: Option<String>,
}

#[derive(Debug, Args)]
struct LsArgs {
    #[arg(default_value = "/")]
    path: String,
    /// Show modification time and size
    #[arg(short = 'l')]
    long: bool,
    #[arg(short = 'R')]
    recursive: bool,
}

#[derive(Debug, Args)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Args)]
struct PutArgs {
    src: PathBuf,
    dst: String,
}

#[derive(Debug, Args)]
struct RmdirArgs {
    path: String,
    /// Remove the directory and everything below it
    #[arg(short = 'r')]
    recursive: bool,
}

#[derive(Debug, Args)]
struct MvArgs {
    from: String,
    to: String,
}

fn with_volume(
    image: &Path,
    action: impl FnOnce(&mut ImageVolume, &mut StdoutLock<'static>) -> Result<()>,
) -> Result<()> {
    let mut vol = commands::open_volume(image)?;
    let mut stdout = io::stdout().lock();
    action(&mut vol, &mut stdout)?;
    stdout.flush()?;
    vol.flush()?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    logging::init(cli.verbose);
    let image = cli.image;

    match cli.command {
        Commands::Mkfs(args) => commands::mkfs(
            &image,
            MkfsOptions {
                fat_type: args.fat_type.into(),
                blocks: args.blocks,
                blocks_per_cluster: args.blocks_per_cluster,
                partitioned: args.mbr,
                label: args.label,
            },
        ),
        Commands::Info => with_volume(&image, |vol, out| commands::info(vol, out)),
        Commands::Ls(args) => with_volume(&image, |vol, out| {
            let options = LsOptions {
                long: args.long,
                recursive: args.recursive,
            };
            commands::ls(vol, &args.path, options, out)
        }),
        Commands::Cat(args) => with_volume(&image, |vol, out| {
            commands::cat(vol, &args.path, out).map(|_| ())
        }),
        Commands::Put(args) => with_volume(&image, |vol, out| {
            let bytes = commands::put(vol, &args.src, &args.dst)?;
            writeln!(out, "{bytes} bytes written to {}", args.dst)?;
            Ok(())
        }),
        Commands::Rm(args) => with_volume(&image, |vol, _| commands::rm(vol, &args.path)),
        Commands::Mkdir(args) => with_volume(&image, |vol, _| commands::mkdir(vol, &args.path)),
        Commands::Rmdir(args) => with_volume(&image, |vol, _| {
            commands::rmdir(vol, &args.path, args.recursive)
        }),
        Commands::Mv(args) => with_volume(&image, |vol, _| commands::mv(vol, &args.from, &args.to)),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
