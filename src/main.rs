//! tuna - command line front end for the Tuna cartridge bridge
//!
//! One subcommand per tool: NES dump/write, Game Boy dump (including the
//! GB Memory multi-cart), save RAM restore, flash programming, GBA dump and
//! offline checksum reports.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, info, warn};
use serial::prelude::*;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tunaflash::cartridge::{GbHeader, NesDescriptor, INES_HEADER_SIZE, INES_MAGIC};
use tunaflash::gb::flash::FlashProgrammer;
use tunaflash::gb::gbm::{self, Gbm, MappingTable};
use tunaflash::gb::{self, GameBoy, Mbc};
use tunaflash::gba;
use tunaflash::image::{gb_global_checksum, ines_header, snes_checksum};
use tunaflash::mappers::{create_mapper, Mapper, MapperKind};
use tunaflash::request::{Bridge, Link, NesBus, WideLink};
use tunaflash::util::{self, combine_bytes, format_size, hexdump};

/// Default rate of the 8-bit bus bridge
const BAUD_8BIT: usize = 115_200;

/// Default rate of the 32-bit bus bridge
const BAUD_32BIT: usize = 500_000;

/// Command line arguments for tuna
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Serial device the bridge is attached to
    #[clap(short, long, default_value = "/dev/ttyS5", global = true)]
    port: String,

    /// Baud rate (115200 for the 8-bit bridge, 500000 for the 32-bit one)
    #[clap(short, long, global = true)]
    baud: Option<usize>,

    /// Read timeout in milliseconds
    #[clap(long, default_value = "2000", global = true)]
    timeout: u64,

    /// Enable debug logging
    #[clap(short, long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump an NES cartridge to an iNES image
    NesDump {
        /// Board: nrom, sxrom, txrom, axrom, raw, or an iNES mapper number
        #[clap(short, long, default_value = "txrom")]
        mapper: MapperKind,

        /// Size of PRG ROM in 16KB units
        #[clap(long, default_value = "32")]
        prg: u8,

        /// Size of CHR ROM in 8KB units (0 means the board uses CHR RAM)
        #[clap(long, default_value = "32")]
        chr: u8,

        /// 0:H, 1:V, +2 for battery-backed PRG RAM
        #[clap(long, default_value = "0")]
        mirror: u8,

        /// Dump through the 32-bit bus bridge (NROM, TxROM and AxROM only)
        #[clap(long)]
        wide: bool,

        #[clap(name = "FILE")]
        file: PathBuf,
    },

    /// Write an image back to an EEPROM/flash NES board
    NesWrite {
        /// Board; taken from the iNES header when omitted
        #[clap(short, long)]
        mapper: Option<MapperKind>,

        /// PRG size in 16KB units for headerless images
        #[clap(long)]
        prg: Option<u8>,

        #[clap(name = "FILE")]
        file: PathBuf,
    },

    /// Dump ROM and save RAM of a Game Boy cartridge
    GbDump,

    /// Restore Game Boy save RAM from a file
    GbWriteRam {
        #[clap(name = "FILE")]
        file: PathBuf,
    },

    /// Program a Game Boy flash cartridge
    GbFlash {
        #[clap(name = "FILE")]
        file: PathBuf,
    },

    /// Dump a GBA cartridge through the 32-bit bridge
    GbaDump {
        /// ROM size in KB
        #[clap(long, default_value = "4096")]
        size: usize,

        /// Also dump SRAM
        #[clap(long)]
        sram: bool,

        /// Output image (named after the header title when omitted)
        #[clap(name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Report the checksum of an image file
    Checksum {
        #[clap(value_enum)]
        system: System,

        /// SNES image uses the HiROM header location
        #[clap(long)]
        hirom: bool,

        #[clap(name = "FILE")]
        file: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum System {
    Gb,
    Snes,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(&args) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::NesDump { mapper, prg, chr, mirror, wide, file } => {
            nes_dump(args, *mapper, *prg, *chr, *mirror, *wide, file)
        }
        Command::NesWrite { mapper, prg, file } => nes_write(args, *mapper, *prg, file),
        Command::GbDump => gb_dump(args),
        Command::GbWriteRam { file } => gb_write_ram(args, file),
        Command::GbFlash { file } => gb_flash(args, file),
        Command::GbaDump { size, sram, file } => gba_dump(args, *size * 1024, *sram, file.as_deref()),
        Command::Checksum { system, hirom, file } => checksum(*system, *hirom, file),
    }
}

/// Open and configure the serial device
fn open_port(args: &Args, default_baud: usize) -> Result<serial::SystemPort> {
    let baud = args.baud.unwrap_or(default_baud);
    info!("COM: {} @ {}", args.port, baud);

    let mut port = serial::open(&args.port)
        .with_context(|| format!("Failed to open {}", args.port))?;
    port.configure(&serial::PortSettings {
        baud_rate: serial::BaudRate::from_speed(baud),
        char_size: serial::Bits8,
        parity: serial::ParityNone,
        stop_bits: serial::Stop1,
        flow_control: serial::FlowNone,
    })
    .with_context(|| format!("Failed to configure {}", args.port))?;
    port.set_timeout(Duration::from_millis(args.timeout))
        .with_context(|| format!("Failed to set timeout on {}", args.port))?;
    Ok(port)
}

fn create_file(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn open_file(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn nes_dump(args: &Args, kind: MapperKind, prg: u8, chr: u8, mirror: u8, wide: bool, path: &Path) -> Result<()> {
    let descriptor = NesDescriptor::from_mirror_code(kind.ines_number(), prg, chr, mirror);
    let mut driver = create_mapper(kind);
    info!("{}: {}", driver.name(), descriptor);

    let (prg_bytes, chr_bytes) = if wide {
        let mut link = WideLink::new(open_port(args, BAUD_32BIT)?);
        dump_nes(driver.as_mut(), &mut link, &descriptor, path)?
    } else {
        let mut link = Link::new(open_port(args, BAUD_8BIT)?);
        dump_nes(driver.as_mut(), &mut link, &descriptor, path)?
    };

    info!(
        "{}: PRG {}, CHR {}",
        path.display(),
        format_size(prg_bytes),
        format_size(chr_bytes)
    );
    Ok(())
}

/// Write the header (if the board has one), then PRG and CHR
fn dump_nes(driver: &mut dyn Mapper, bus: &mut dyn NesBus, descriptor: &NesDescriptor, path: &Path)
    -> Result<(u64, u64)>
{
    let mut out = create_file(path)?;
    if driver.has_header() {
        out.write_all(&ines_header(descriptor))?;
    }

    let prg_bytes = driver
        .dump_program(bus, &mut out, descriptor.prg_banks as usize)
        .context("PRG dump failed")?;
    let chr_bytes = driver
        .dump_character(bus, &mut out, descriptor.chr_banks as usize)
        .context("CHR dump failed")?;
    out.flush()?;
    Ok((prg_bytes, chr_bytes))
}

fn nes_write(args: &Args, kind: Option<MapperKind>, prg: Option<u8>, path: &Path) -> Result<()> {
    let mut source = open_file(path)?;
    let mut header = [0u8; INES_HEADER_SIZE];
    let has_header = source.read_exact(&mut header).is_ok() && header[0..4] == INES_MAGIC;

    let (kind, prg_banks, chr_banks) = if has_header {
        let descriptor = NesDescriptor::parse(&header)?;
        info!("{}", descriptor);
        let kind = match kind {
            Some(kind) => kind,
            None => MapperKind::from_ines(descriptor.mapper)?,
        };
        (kind, descriptor.prg_banks as usize, descriptor.chr_banks as usize)
    } else {
        source.seek(SeekFrom::Start(0))?;
        let Some(kind) = kind else {
            bail!("{} has no iNES header; pass --mapper", path.display());
        };
        let prg = match prg {
            Some(prg) => prg as usize,
            None => (fs::metadata(path)?.len() as usize) / tunaflash::cartridge::PRG_ROM_BANK_SIZE,
        };
        (kind, prg, 0)
    };

    let mut driver = create_mapper(kind);
    let mut link = Link::new(open_port(args, BAUD_8BIT)?);

    info!("{}: writing {} PRG banks", driver.name(), prg_banks);
    driver.write_program(&mut link, &mut source, prg_banks).context("PRG write failed")?;
    if chr_banks > 0 {
        info!("{}: writing {} CHR banks", driver.name(), chr_banks);
        driver.write_character(&mut link, &mut source, chr_banks).context("CHR write failed")?;
    }
    info!("{}: done", path.display());
    Ok(())
}

/// Dump ROM (and save RAM, if any) of the cartridge in the slot
fn gb_dump(args: &Args) -> Result<()> {
    let mut link = Link::new(open_port(args, BAUD_8BIT)?);
    let header = gb::read_header(&mut link).context("Failed to read cartridge header")?;

    if header.title == gbm::MENU_TITLE {
        return gbm_dump(&mut link);
    }

    let cart = GameBoy::for_header(&header);
    let stem = header.file_stem();
    let rom_path = PathBuf::from(format!("{}.{}", stem, header.rom_extension()));
    let checksum = dump_gb_rom(&mut link, &cart, header.rom_size, &rom_path)?;
    if checksum != header.global_checksum {
        warn!(
            "global checksum ${:04X} does not match header ${:04X}",
            checksum, header.global_checksum
        );
    }

    if let Some(layout) = gb::ram_layout(header.cart_type, header.ram_size) {
        let mut out = create_file(Path::new(&format!("{}.sav", stem)))?;
        let n = cart.dump_ram(&mut link, &mut out, layout).context("RAM dump failed")?;
        out.flush()?;
        info!("{}.sav: {}", stem, format_size(n));
    }
    Ok(())
}

fn dump_gb_rom(link: &mut dyn Bridge, cart: &GameBoy, rom_size: u8, path: &Path) -> Result<u16> {
    let mut out = create_file(path)?;
    let dump = cart.dump_rom(link, &mut out, rom_size).context("ROM dump failed")?;
    out.flush()?;
    info!("{}: {:04x} ({})", path.display(), dump.checksum, format_size(dump.written));
    Ok(dump.checksum)
}

/// Dump the GB Memory cart as one whole-flash image
fn gbm_dump(link: &mut dyn Bridge) -> Result<()> {
    let mut gbm = Gbm::new(link);
    gbm.detect().context("GB Memory cartridge did not respond")?;

    let mapping = gbm.read_mapping().context("Failed to read mapping table")?;
    fs::write("GBM.map", mapping).context("Failed to write GBM.map")?;
    debug!("mapping:\n{}", hexdump(&mapping, 0));
    match MappingTable::decode(&mapping) {
        Ok(table) => info!("mapping:\n{}", table),
        Err(e) => warn!("{}", e),
    }

    gbm.map_entire_rom()?;
    drop(gbm);

    let cart = GameBoy::new(Mbc::from_cart_type(gbm::ENTIRE_CART_TYPE));
    dump_gb_rom(link, &cart, gbm::ENTIRE_ROM_SIZE, Path::new("GBMMBC4.gbc"))?;

    if let Some(layout) = gb::ram_layout(gbm::ENTIRE_CART_TYPE, gbm::ENTIRE_RAM_SIZE) {
        let mut out = create_file(Path::new("GBMMBC4.sav"))?;
        let n = cart.dump_ram(link, &mut out, layout).context("RAM dump failed")?;
        out.flush()?;
        info!("GBMMBC4.sav: {}", format_size(n));
    }
    Ok(())
}

fn gb_write_ram(args: &Args, path: &Path) -> Result<()> {
    let mut link = Link::new(open_port(args, BAUD_8BIT)?);
    let header = gb::read_header(&mut link).context("Failed to read cartridge header")?;
    let Some(layout) = gb::ram_layout(header.cart_type, header.ram_size) else {
        bail!("{} has no save RAM", header.title);
    };

    let len = fs::metadata(path)?.len() as usize;
    if len < layout.size() {
        bail!("{} holds {} bytes, the cartridge needs {}", path.display(), len, layout.size());
    }

    let mut source = open_file(path)?;
    let n = GameBoy::for_header(&header)
        .write_ram(&mut link, &mut source, layout)
        .context("RAM write failed")?;
    info!("{}: restored {}", header.title, format_size(n));
    Ok(())
}

fn gb_flash(args: &Args, path: &Path) -> Result<()> {
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .len() as usize;
    let mut source = open_file(path)?;
    let mut link = Link::new(open_port(args, BAUD_8BIT)?);

    let mut flash = FlashProgrammer::detect(&mut link)?;
    info!("flash: {}, writing {}", flash.profile().name, format_size(size as u64));
    flash.write_image(&mut source, size).context("Flash write failed")?;
    info!("{}: done", path.display());
    Ok(())
}

fn gba_dump(args: &Args, size: usize, sram: bool, path: Option<&Path>) -> Result<()> {
    let mut link = WideLink::new(open_port(args, BAUD_32BIT)?);

    let stem = match gba::read_header(&mut link) {
        Ok(header) => util::file_stem(&header.title),
        Err(e) => {
            warn!("{}", e);
            "cartridge".to_string()
        }
    };
    let rom_path = match path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(format!("{}.gba", stem)),
    };

    let mut out = create_file(&rom_path)?;
    let n = gba::dump_rom(&mut link, &mut out, size).context("ROM dump failed")?;
    out.flush()?;
    info!("{}: {}", rom_path.display(), format_size(n));

    if sram {
        let sav_path = rom_path.with_extension("sav");
        let mut out = create_file(&sav_path)?;
        let n = gba::dump_sram(&mut link, &mut out, gba::DEFAULT_SRAM_SIZE).context("SRAM dump failed")?;
        out.flush()?;
        info!("{}: {}", sav_path.display(), format_size(n));
    }
    Ok(())
}

fn checksum(system: System, hirom: bool, path: &Path) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    match system {
        System::Gb => {
            if bytes.len() < 0x0150 {
                bail!("{} is too short for a Game Boy header", path.display());
            }
            if let Err(e) = GbHeader::parse(&bytes) {
                warn!("{}", e);
            }
            let sum = gb_global_checksum(&bytes);
            let stored = combine_bytes(bytes[0x014F], bytes[0x014E]);
            info!("{}: {:04x} (header {:04x}){}", path.display(), sum, stored,
                  if sum == stored { "" } else { " MISMATCH" });
        }
        System::Snes => {
            let Some(report) = snes_checksum(&bytes, hirom) else {
                bail!("{} is too short for a SNES header", path.display());
            };
            info!(
                "{}: sum {:04x} complement {:04x} (header {:04x}/{:04x}){}",
                path.display(), report.sum, report.complement,
                report.stored_sum, report.stored_complement,
                if report.is_valid() { "" } else { " MISMATCH" }
            );
        }
    }
    Ok(())
}
