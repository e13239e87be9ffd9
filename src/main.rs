use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use sim32::asm::encoding::{BinaryFormat, ObjFileFormat, TextFormat};
use sim32::asm::lang::Language;
use sim32::asm::{assemble_with, Program};
use sim32::bits::VirtualAddress;
use sim32::err::Error;
use sim32::isa::RegisterCode;
use sim32::sim::regs::MachineInitStrategy;
use sim32::sim::{Cpu, SimFlags};

#[derive(Parser, Debug)]
#[command(name = "sim32", version, about = "Assemble and run programs for a paged 32-bit CPU")]
struct Cli {
    /// Log every executed instruction (overrides RUST_LOG)
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a source file into an object file
    Assemble {
        /// Assembly source file
        src: PathBuf,

        /// Output path (defaults to the source path with an `.obj` extension)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Object file format
        #[arg(long, value_enum, default_value_t = Format::Binary)]
        format: Format,

        /// Address of the first instruction
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        origin: u32,

        /// Instruction definition file (JSON)
        #[arg(long)]
        lang: Option<PathBuf>,
    },
    /// Run a source or object file until it halts
    Run {
        /// Assembly source or object file
        input: PathBuf,

        /// Stop after this many instructions
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Start in user mode
        #[arg(long)]
        user: bool,

        /// Highest physical address
        #[arg(long, value_parser = parse_u32)]
        ram_capacity: Option<u32>,

        /// Fill the general-purpose registers from a seeded RNG
        #[arg(long)]
        seed: Option<u64>,

        /// Instruction definition file (JSON), for source input
        #[arg(long)]
        lang: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Binary,
    Text,
}

/// Parses decimal or `0x`-prefixed hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

/// A failure which ends the process.
struct Failure {
    message: String,
    help: Option<String>,
}
impl Failure {
    fn io(path: &Path, e: std::io::Error) -> Self {
        Self { message: format!("{}: {e}", path.display()), help: None }
    }
    fn plain(message: impl Into<String>) -> Self {
        Self { message: message.into(), help: None }
    }
}
impl<E: Error> From<E> for Failure {
    fn from(e: E) -> Self {
        Self { message: e.to_string(), help: e.help().map(Cow::into_owned) }
    }
}

fn load_language(path: Option<&Path>) -> Result<Cow<'static, Language>, Failure> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| Failure::io(path, e))?;
            Ok(Cow::Owned(Language::from_json(&json)?))
        },
        None => Ok(Cow::Borrowed(Language::bundled())),
    }
}

fn assemble_file(path: &Path, lang: Option<&Path>, origin: u32) -> Result<Program, Failure> {
    let src = std::fs::read_to_string(path).map_err(|e| Failure::io(path, e))?;
    let lang = load_language(lang)?;
    Ok(assemble_with(&src, &lang, VirtualAddress::from_u32(origin))?)
}

/// Reads an object file in either format, falling back to assembling the file as source.
fn load_input(path: &Path, lang: Option<&Path>) -> Result<Program, Failure> {
    let bytes = std::fs::read(path).map_err(|e| Failure::io(path, e))?;
    if let Some(program) = BinaryFormat::deserialize(&bytes) {
        return Ok(program);
    }
    if let Some(program) = std::str::from_utf8(&bytes).ok().and_then(TextFormat::deserialize) {
        return Ok(program);
    }
    assemble_file(path, lang, 0)
}

fn run(cli: Cli) -> Result<(), Failure> {
    match cli.command {
        Command::Assemble { src, out, format, origin, lang } => {
            let program = assemble_file(&src, lang.as_deref(), origin)?;
            let out = out.unwrap_or_else(|| src.with_extension("obj"));
            let contents = match format {
                Format::Binary => BinaryFormat::serialize(&program),
                Format::Text => TextFormat::serialize(&program).into_bytes(),
            };
            std::fs::write(&out, contents).map_err(|e| Failure::io(&out, e))?;

            tracing::info!(out = %out.display(), words = program.words().len(), labels = program.labels().len(), "assembled");
            Ok(())
        },
        Command::Run { input, max_cycles, user, ram_capacity, seed, lang } => {
            let program = load_input(&input, lang.as_deref())?;

            let defaults = SimFlags::default();
            let mut cpu = Cpu::new(SimFlags {
                ram_capacity: ram_capacity.unwrap_or(defaults.ram_capacity),
                start_in_user_mode: user,
                machine_init: seed.map_or(defaults.machine_init, |seed| MachineInitStrategy::Seeded { seed }),
                ..defaults
            });
            cpu.load_program(&program)?;

            match max_cycles {
                Some(n) => cpu.run_with_limit(n)?,
                None => cpu.run()?,
            }
            print_state(&cpu);

            match cpu.hit_halt() {
                true => Ok(()),
                false => Err(Failure::plain(format!("stopped after {} instructions without halting", cpu.instructions_run))),
            }
        },
    }
}

fn print_state(cpu: &Cpu) {
    for &reg in RegisterCode::ALL {
        let value = cpu.regs.read(reg);
        println!("{:<8} 0x{:08X}  {}", reg.to_string(), value.to_u32(), value.to_signed_integer());
    }
    println!("{:?}", cpu.regs.eflags);
    println!("instructions run: {}", cpu.instructions_run);
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.trace {
        true => EnvFilter::new("trace"),
        false => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure { message, help }) => {
            eprintln!("error: {message}");
            if let Some(help) = help {
                eprintln!("help: {help}");
            }
            ExitCode::FAILURE
        },
    }
}
