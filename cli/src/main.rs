//! A small demonstration of the bus and scheduler.
//!
//! This assembles a one-bus system with a line clock and a console
//! teletype, then runs a stand-in for the CPU: a loop which prints a
//! message by polling the teletype's ready bit, takes interrupts,
//! and waits (donating idle time to the devices) once it has nothing
//! else to do.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use sim::devices::{line_clock, teletype, LineClock, Teletype, CSR_INTERRUPT_ENABLE, CSR_READY};
use sim::{AttachError, BusConfig, BusFault, SchedulerConfig, System, ThreadedTicker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Addressing {
    #[value(name = "16")]
    Bits16,
    #[value(name = "18")]
    Bits18,
}

impl From<Addressing> for AddressingMode {
    fn from(a: Addressing) -> AddressingMode {
        match a {
            Addressing::Bits16 => AddressingMode::Bits16,
            Addressing::Bits18 => AddressingMode::Bits18,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Exercise the simulated bus with a clock and a teletype")]
struct Options {
    /// Width of bus addresses.
    #[arg(long, value_enum, default_value = "18")]
    addressing: Addressing,

    /// Text to print on the teletype.
    #[arg(long, default_value = "HELLO, WORLD\r\n")]
    message: String,

    /// Simulated ticks between line clock interrupts.
    #[arg(long, default_value_t = 16_667)]
    clock_period: u64,

    /// Simulated ticks taken to print one character.
    #[arg(long, default_value_t = 1_000)]
    char_ticks: u64,

    /// Stop after this many line clock interrupts.
    #[arg(long, default_value_t = 60)]
    clock_interrupts: u64,

    /// Wall-clock tick period, in milliseconds.
    #[arg(long, default_value_t = 10)]
    wall_tick_ms: u64,

    /// Simulated ticks given to the devices for each wall-clock tick
    /// spent idle.
    #[arg(long, default_value_t = 10_000)]
    idle_ticks: u64,
}

#[derive(Debug)]
enum Fail {
    Attach(AttachError),
    Bus(BusFault),
    InitialisationFailure(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::Attach(e) => write!(f, "failed to configure the bus: {e}"),
            Fail::Bus(e) => write!(f, "unexpected bus fault: {e}"),
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl Error for Fail {}

impl From<AttachError> for Fail {
    fn from(e: AttachError) -> Fail {
        Fail::Attach(e)
    }
}

impl From<BusFault> for Fail {
    fn from(e: BusFault) -> Fail {
        Fail::Bus(e)
    }
}

/// Stand-in for a CPU.  Each call to `step` is one "instruction"
/// and takes one simulated tick.
struct Dispatcher {
    system: System,
    bus: BusId,
    message: Vec<u8>,
    printed: usize,
    clock_interrupts: u64,
    teletype_interrupts: u64,
}

impl Dispatcher {
    fn read(&mut self, address: BusAddress) -> Result<u16, BusFault> {
        self.system.read(self.bus, address, Width::Word)
    }

    fn write(&mut self, address: BusAddress, value: u16) -> Result<(), BusFault> {
        self.system.write(self.bus, address, Width::Word, value)
    }

    /// Service at most one interrupt.  Returns true if there was
    /// one.
    fn take_interrupt(&mut self) -> Result<bool, BusFault> {
        let pending = match self.system.acknowledge_interrupt(self.bus, 0) {
            Some(p) => p,
            None => {
                return Ok(false);
            }
        };
        let span = span!(Level::DEBUG, "interrupt", vector=%pending.vector);
        let _enter = span.enter();
        if pending.vector == line_clock::VECTOR {
            self.clock_interrupts += 1;
            // Clear the monitor bit, leaving interrupts enabled.
            self.write(line_clock::CSR_ADDRESS, CSR_INTERRUPT_ENABLE)?;
        } else if pending.vector == teletype::VECTOR {
            self.teletype_interrupts += 1;
        } else {
            event!(Level::WARN, "interrupt from unexpected vector {}", pending.vector);
        }
        Ok(true)
    }

    /// Execute one instruction of the "program".  Returns false when
    /// the program has nothing left to do but wait for interrupts.
    fn step(&mut self) -> Result<bool, BusFault> {
        let busy = if self.printed < self.message.len() {
            let csr = self.read(teletype::BASE_ADDRESS)?;
            if csr & CSR_READY != 0 {
                let ch = self.message[self.printed];
                self.write(teletype::XBUF_ADDRESS, u16::from(ch))?;
                self.printed += 1;
            }
            true
        } else {
            false
        };
        self.system.advance_one_tick();
        Ok(busy)
    }
}

fn run_demo(options: &Options) -> Result<(), Fail> {
    let wall_tick = Duration::from_millis(options.wall_tick_ms.max(1));
    let mut system = System::new(SchedulerConfig {
        wall_tick,
        sim_ticks_per_wall_tick: options.idle_ticks,
    });
    let bus = system.add_bus(BusConfig {
        name: "unibus".to_string(),
        addressing: options.addressing.into(),
    });
    system.attach(
        bus,
        &LineClock::window_spec(),
        Box::new(LineClock::new(options.clock_period)),
    )?;
    let tty = system.attach(
        bus,
        &Teletype::window_spec(),
        Box::new(Teletype::new(
            Box::new(std::io::stdout()),
            options.char_ticks,
            1,
        )),
    )?;
    event!(
        Level::DEBUG,
        "bus status after configuration: {:?}",
        system.bus(bus).map(|b| b.status())
    );

    let mut dispatcher = Dispatcher {
        system,
        bus,
        message: options.message.as_bytes().to_vec(),
        printed: 0,
        clock_interrupts: 0,
        teletype_interrupts: 0,
    };
    dispatcher.write(line_clock::CSR_ADDRESS, CSR_INTERRUPT_ENABLE)?;
    dispatcher.write(teletype::BASE_ADDRESS, CSR_INTERRUPT_ENABLE)?;

    let mut ticker = ThreadedTicker::start(wall_tick);
    while dispatcher.clock_interrupts < options.clock_interrupts {
        if dispatcher.take_interrupt()? {
            continue;
        }
        if !dispatcher.step()? {
            dispatcher.system.idle(&mut ticker);
        }
        dispatcher.system.service_wall_clock(&mut ticker);
    }
    // Give the teletype a chance to pass on the last of its output.
    for _ in 0..2 {
        dispatcher.system.idle(&mut ticker);
    }

    event!(
        Level::INFO,
        "stopped at tick {} after {} clock and {} teletype interrupts",
        dispatcher.system.global_time(),
        dispatcher.clock_interrupts,
        dispatcher.teletype_interrupts
    );
    if let Some(b) = dispatcher.system.bus(bus) {
        event!(Level::INFO, "bus statistics: {:?}", b.stats());
        if let Some(device) = b.device(tty.window) {
            event!(Level::INFO, "{}: {}", device.name(), device.describe());
        }
    }
    event!(
        Level::INFO,
        "scheduler statistics: {:?}",
        dispatcher.system.scheduler().stats()
    );
    Ok(())
}

fn run() -> Result<(), Fail> {
    let options = Options::parse();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    run_demo(&options)
}

fn main() {
    match run() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
