use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use cadence_core::codec::FORMAT_VERSION;
use cadence_core::host::{HostCodec, JsonHostCodec};
use cadence_core::machine::ops::{Op, Routine};
use cadence_core::machine::Machine;
use cadence_core::{Engine, EntryPoint, Generator, Method, MethodSignature, TypeTag};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Continuation engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header, state, and entry point of a stored continuation
    Inspect {
        /// Path to a serialized continuation
        file: PathBuf,
    },
    /// Run a counting generator, snapshotting it mid-stream
    Demo {
        /// How many values to generate
        #[arg(long, default_value_t = 5)]
        limit: u64,
        /// Where to write the mid-stream snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Demo { limit, snapshot } => demo(limit, snapshot.as_deref())?,
    }

    Ok(())
}

fn inspect(path: &std::path::Path) -> anyhow::Result<()> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 1];
    file.read_exact(&mut header)?;
    let version = header[0] >> 4;
    println!("format version: {version} (supported: {FORMAT_VERSION})");

    let host = JsonHostCodec;
    let state = host.read_value(&mut file)?;
    let entry = host.read_value(&mut file)?;
    println!("state: {state}");
    println!("entry: {entry}");

    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    if rest.is_empty() {
        println!("frames: none");
    } else {
        println!("frames: {} bytes", rest.len());
    }
    Ok(())
}

/// `count_up`: yields 0..limit, then returns.
fn count_up(limit: u64) -> Routine {
    Routine::new(
        Method::new(
            "demo/Routines",
            "count_up",
            MethodSignature::returning(TypeTag::Void),
        ),
        0,
        1,
        vec![
            Op::SetPrim(0, 0),
            Op::BranchPrimLt(0, limit, 3),
            Op::Return,
            Op::PushPrim(0),
            Op::Yield,
            Op::IncrPrim(0),
            Op::Jump(1),
        ],
    )
}

fn demo(limit: u64, snapshot: Option<&std::path::Path>) -> anyhow::Result<()> {
    let mut machine = Machine::new();
    machine.register(count_up(limit));
    let machine = Arc::new(machine);
    let engine = Engine::new(machine.clone(), machine);

    let cont = engine.create(EntryPoint::new("count_up", json!(null)))?;
    let mut generator = Generator::new(cont);

    if let Some(first) = generator.next_value()? {
        println!("yielded {first}");
    }

    // Freeze the generator mid-stream and thaw a copy of it.
    let mut bytes = Vec::new();
    engine.serialize(generator.continuation(), &mut bytes)?;
    println!("snapshot: {} bytes", bytes.len());
    if let Some(path) = snapshot {
        std::fs::write(path, &bytes)?;
        println!("snapshot written to {}", path.display());
    }

    let restored = engine.deserialize(&mut Cursor::new(bytes))?;
    let mut generator = Generator::new(restored);
    while let Some(value) = generator.next_value()? {
        println!("yielded {value} (restored)");
    }
    println!("done");
    Ok(())
}
