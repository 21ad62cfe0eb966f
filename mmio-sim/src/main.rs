use clap::Parser;
use mmio_sim::config::{self, SimConfig};
use mmio_sim::console::StdinSource;
use mmio_sim::trace::{parse_trace, replay};
use mmio_sim::{HostStatus, MemSystem, SimError};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Replay memory request traces against the speculative memory/MMIO model"
)]
struct Args {
    /// memhex32 image used to initialize memory [default: $MEMHEX32, else test.memhex32]
    #[arg(long)]
    memhex: Option<PathBuf>,

    /// JSON-lines request trace to replay
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Byte distance between UART registers (4 or 8)
    #[arg(long, default_value_t = config::UART_STRIDE)]
    uart_stride: u8,

    /// Size of the memory window in bytes
    #[arg(long, default_value_t = config::MEM_SIZE)]
    mem_size: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: &Args) -> Result<Option<HostStatus>, SimError> {
    let sim_config = SimConfig {
        uart_stride: args.uart_stride,
        mem_size: args.mem_size,
        ..SimConfig::default()
    };
    let mut sys = MemSystem::new(sim_config, Box::new(StdinSource), Box::new(io::stdout()))?;
    let memhex = args.memhex.clone().unwrap_or_else(config::memhex_path);
    sys.load_memhex(&memhex)?;

    let Some(trace_path) = &args.trace else {
        log::info!("no trace given; memory initialized, exiting");
        return Ok(None);
    };
    let steps = parse_trace(&fs::read_to_string(trace_path)?)?;
    log::info!("replaying {} steps from {}", steps.len(), trace_path.display());

    match replay(&mut sys, &steps) {
        Ok(outcome) => {
            log::info!(
                "{} requests, {} ticks",
                outcome.responses.len(),
                outcome.ticks
            );
            Ok(outcome.status)
        }
        Err(err) => {
            log::error!("{}", sys.bus.store_buf.dump());
            Err(err)
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&args) {
        Ok(Some(HostStatus::Pass)) => {
            println!("\ntohost PASS");
            process::exit(0);
        }
        Ok(Some(HostStatus::Fail(test_num))) => {
            println!("\ntohost FAIL on test {test_num}");
            process::exit(1);
        }
        Ok(None) => {
            if args.trace.is_some() {
                log::warn!("trace ended without a tohost verdict");
            }
            Ok(())
        }
        Err(err) => {
            log::error!("simulation aborted: {err}");
            process::exit(1);
        }
    }
}
