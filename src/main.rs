use std::fs;
use std::path::{Path, PathBuf};

use amd_psp_directory::config::load_config;
use amd_psp_directory::export;
use amd_psp_directory::program::ProgramProfile;
use amd_psp_directory::writer::{build_directories, patch_image, BuildContext};
use amd_psp_directory::{BinaryImage, Efs};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

/// Exit status of every fatal error.
const FATAL_EXIT_CODE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "psp-dir-tool", version, about = "Build, patch and dump AMD PSP/BIOS directories")]
struct Cli {
    /// Directory for generated files
    #[arg(short = 'o', long = "outputpath", default_value = "Output", global = true)]
    output_path: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Verbosity::Info, global = true)]
    verbosity: Verbosity,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the directory headers only
    Bd {
        /// Image whose size sets the physical address window
        in_bios_image: PathBuf,
        cfg_file: PathBuf,
    },
    /// Build the directories and patch them into a copy of the image
    Bb {
        in_bios_image: PathBuf,
        cfg_file: PathBuf,
        out_bios_image: PathBuf,
    },
    /// Dump the directories of an existing image
    Dp {
        in_bios_image: PathBuf,
        /// Program profile, e.g. GN
        #[arg(short, long)]
        program: String,
        /// Write PspDirInfo.xml
        #[arg(short = 'x', long)]
        xml: bool,
        /// Extract every entry to its own file
        #[arg(short, long)]
        binary: bool,
        /// Write PspDirectory.xml, a rebuildable config
        #[arg(short, long)]
        directory: bool,
        /// Write PspVersion.txt
        #[arg(short = 't', long)]
        version_text: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Verbosity {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl From<Verbosity> for log::LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Critical | Verbosity::Error => log::LevelFilter::Error,
            Verbosity::Warning => log::LevelFilter::Warn,
            Verbosity::Info => log::LevelFilter::Info,
            Verbosity::Debug => log::LevelFilter::Debug,
        }
    }
}

fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

fn create_output_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("creating output directory {}", path.display()))
}

fn build_headers(output_path: &Path, in_bios_image: &Path, cfg_file: &Path) -> Result<()> {
    let image_size = fs::metadata(in_bios_image)
        .with_context(|| format!("reading {}", in_bios_image.display()))?
        .len();
    let mut config = load_config(cfg_file)?;
    let context = BuildContext::new(image_size, config.settings);
    let headers = build_directories(&mut config, &context)?;
    create_output_dir(output_path)?;
    for header in headers {
        let path = output_path.join(&header.file_name);
        log::info!("Write {} header to {}", <&str>::from(header.kind), path.display());
        write_file(&path, &header.bytes)?;
    }
    Ok(())
}

fn build_image(in_bios_image: &Path, cfg_file: &Path, out_bios_image: &Path) -> Result<()> {
    let mut image = BinaryImage::load(in_bios_image)?;
    let mut config = load_config(cfg_file)?;
    patch_image(&mut image, &mut config)?;
    log::info!("Write patched image to {}", out_bios_image.display());
    write_file(out_bios_image, image.into_bytes())
}

struct DumpOutputs {
    xml: bool,
    binary: bool,
    directory: bool,
    version_text: bool,
}

fn dump_image(output_path: &Path, in_bios_image: &Path, program: &str, outputs: DumpOutputs) -> Result<()> {
    let program = ProgramProfile::by_name(program)?;
    let image = BinaryImage::load(in_bios_image)?;
    let set = Efs::load(image.as_bytes(), image.size())
        .directories(program)
        .with_context(|| format!("parsing {}", in_bios_image.display()))?;
    if set.is_empty() {
        bail!("no PSP or BIOS directory found in {}", in_bios_image.display());
    }

    if outputs.xml || outputs.binary || outputs.directory {
        create_output_dir(output_path)?;
    }
    if outputs.binary {
        let files = export::extract_binaries(image.as_bytes(), &set, output_path)?;
        log::info!("{} entries extracted", files.len());
    }
    if outputs.xml {
        write_file(&output_path.join(export::INFO_XML), export::info_xml(image.as_bytes(), &set)?)?;
    }
    if outputs.directory {
        write_file(&output_path.join(export::DIRECTORY_XML), export::directory_xml(&set, output_path)?)?;
    }
    if outputs.version_text {
        create_output_dir(output_path)?;
        write_file(&output_path.join(export::VERSION_REPORT), export::version_report(image.as_bytes(), &set)?)?;
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Bd { in_bios_image, cfg_file } => build_headers(&cli.output_path, &in_bios_image, &cfg_file),
        Command::Bb { in_bios_image, cfg_file, out_bios_image } => {
            build_image(&in_bios_image, &cfg_file, &out_bios_image)
        }
        Command::Dp { in_bios_image, program, xml, binary, directory, version_text } => dump_image(
            &cli.output_path,
            &in_bios_image,
            &program,
            DumpOutputs { xml, binary, directory, version_text },
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.verbosity.into()).format_timestamp(None).init();

    if let Err(e) = run(cli) {
        log::error!("{:#}", e);
        std::process::exit(FATAL_EXIT_CODE);
    }
}
