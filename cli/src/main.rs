use std::error::Error;
use std::fmt::{self, Display, Formatter};

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use scheduler::{ExecutionController, RunState, SPEED_MAX, SPEED_MIN};

mod harness;
mod term;
mod ticker;

use harness::{HarnessConfig, WorkerEngine};
use term::TerminalView;
use ticker::{FrameClock, HostTicks};

#[derive(Debug, Parser)]
#[command(about = "Frame-paced scheduler driving the reference simulator engine")]
struct Args {
    /// Synthesised display refresh rate, in Hz.
    #[arg(long, default_value_t = 60.0)]
    refresh_rate: f64,

    /// Execution speed (1-100; 100 runs unthrottled).
    #[arg(long, default_value_t = SPEED_MAX)]
    speed: u32,

    /// Number of simulation contexts to load.
    #[arg(long, default_value_t = 2)]
    contexts: usize,

    /// Which context to display.
    #[arg(long, default_value_t = 0)]
    show_context: u32,

    /// Instructions in each context's synthetic program.
    #[arg(long, default_value_t = 2000)]
    program_length: u64,

    /// Emit a stdout line every N instructions (0 = never).
    #[arg(long, default_value_t = 100)]
    print_every: u64,

    /// Breakpoints, as ADDR or CTX:ADDR (addresses in hex with an 0x
    /// prefix, or decimal).
    #[arg(long = "breakpoint")]
    breakpoints: Vec<String>,

    /// Resume automatically when a breakpoint pauses execution.
    #[arg(long)]
    continue_on_breakpoint: bool,

    /// Never colour the output, even on a terminal.
    #[arg(long)]
    no_color: bool,

    /// Stop after this many frames (0 = run until finished).
    #[arg(long, default_value_t = 0)]
    max_frames: u64,
}

#[derive(Debug)]
struct BadBreakpointSpec(String);

impl Display for BadBreakpointSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "invalid breakpoint '{}'; expected ADDR or CTX:ADDR",
            self.0
        )
    }
}

impl Error for BadBreakpointSpec {}

fn parse_address(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    }
}

fn parse_breakpoint(spec: &str) -> Result<(ContextId, Address), BadBreakpointSpec> {
    let bad = || BadBreakpointSpec(spec.to_owned());
    match spec.split_once(':') {
        Some((ctx, addr)) => {
            let ctx = ctx.parse::<u32>().map_err(|_| bad())?;
            let addr = parse_address(addr).ok_or_else(bad)?;
            Ok((ContextId::new(ctx), Address::new(addr)))
        }
        None => {
            let addr = parse_address(spec).ok_or_else(bad)?;
            Ok((ContextId::new(0), Address::new(addr)))
        }
    }
}

fn run_simulator() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    if !(SPEED_MIN..=SPEED_MAX).contains(&args.speed) {
        event!(
            Level::WARN,
            "speed {} is outside [{SPEED_MIN}, {SPEED_MAX}] and will be clamped",
            args.speed
        );
    }

    let engine = WorkerEngine::new(HarnessConfig {
        context_count: args.contexts,
        program_length: args.program_length,
        print_every: args.print_every,
    });
    let (ticks, tick_requests) = HostTicks::new();
    let mut controller = ExecutionController::new(
        engine,
        Box::new(ticks),
        Box::new(TerminalView::new(args.no_color)),
        args.contexts,
        args.speed,
    );

    controller.init(true, ContextId::new(args.show_context))?;
    for spec in &args.breakpoints {
        let (context, address) = parse_breakpoint(spec)?;
        controller.add_breakpoint(context, address)?;
        event!(Level::INFO, "breakpoint armed at {address} for {context}");
    }
    controller.set_speed(args.speed);
    controller.toggle_play();

    let mut clock = FrameClock::new(args.refresh_rate);
    let mut frames: u64 = 0;
    loop {
        match controller.run_state() {
            RunState::Finished => break,
            RunState::BreakpointPaused => {
                if args.continue_on_breakpoint {
                    event!(Level::INFO, "breakpoint hit, continuing");
                    controller.toggle_play();
                } else {
                    event!(Level::INFO, "stopped at a breakpoint");
                    break;
                }
            }
            _ => (),
        }
        let timestamp = clock.wait_for_next_frame();
        if tick_requests.take() {
            controller.on_frame(timestamp);
        }
        frames += 1;
        if args.max_frames != 0 && frames >= args.max_frames {
            event!(Level::INFO, "frame budget of {} reached", args.max_frames);
            break;
        }
    }
    event!(
        Level::INFO,
        "exiting in state {:?} after {frames} frames",
        controller.run_state()
    );
    Ok(())
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
