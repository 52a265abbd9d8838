//! exofork demo binary
//!
//! Runs user programs against the simulated exokernel.

use std::error::Error;
use std::fmt;
use std::io::{self, BufRead, Write};

use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use exofork::memlayout::{PGSIZE, UTEXT};
use exofork::monitor::{self, Flow};
use exofork::sim::{self, MachineConfig, Process, SharedMachine};
use exofork::{console, fork, EnvId, EnvPriority, ForkOutcome, Runtime, Syscalls, VirtAddr};

#[derive(Parser)]
#[command(name = "exofork")]
#[command(about = "User-level copy-on-write fork on a simulated exokernel", long_about = None)]
struct Cli {
    /// Verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Environment slots
    #[arg(long, default_value_t = 64, global = true)]
    nenv: usize,

    /// Physical frames
    #[arg(long, default_value_t = 256, global = true)]
    npages: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fork a tree of three environments and have each report its priority
    Priority,
    /// Fork, write in the child, and show both address spaces
    Cow,
    /// Inspect the copy-on-write scenario with monitor commands from stdin
    Monitor,
}

type DemoResult<T> = Result<T, Box<dyn Error>>;

const TEXT: VirtAddr = VirtAddr::new(UTEXT);
const DATA: VirtAddr = VirtAddr::new(UTEXT + PGSIZE);

fn main() -> DemoResult<()> {
    let cli = Cli::parse();

    console::set_sink(|s| print!("{s}"));
    console::init_logger(match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });

    let machine = sim::boot(MachineConfig {
        nenv: cli.nenv,
        npages: cli.npages,
    });

    match cli.command {
        Command::Priority => priority(&machine),
        Command::Cow => cow(&machine).map(|_| ()),
        Command::Monitor => {
            let mut quiet = String::new();
            let (parent, child) = cow_scenario(&machine, &mut quiet)?;
            println!("parent {} child {}", parent, child);
            let stdin = io::stdin();
            let lines = stdin.lock().lines().map_while(Result::ok);
            monitor::monitor(&machine, lines, &mut Stdout(io::stdout()))?;
            Ok(())
        }
    }
}

// ============================================================================
// Priority Tree
// ============================================================================

/// Root at high priority, one low and one default child
fn priority(machine: &SharedMachine) -> DemoResult<()> {
    let mut root = Runtime::new(Process::boot(machine)?);
    root.load_segment(TEXT, b"testpriority", false)?;

    let mut envs = Vec::new();
    root.kernel_mut().env_set_priority(EnvId::SELF, EnvPriority::High)?;

    if let ForkOutcome::Parent(c1) = fork(&mut root)? {
        envs.push(resume(&root, c1)?);
        root.kernel_mut().env_set_priority(c1, EnvPriority::Low)?;
        if let ForkOutcome::Parent(c2) = fork(&mut root)? {
            envs.push(resume(&root, c2)?);
            root.kernel_mut().env_set_priority(c2, EnvPriority::Default)?;
        }
    }
    envs.insert(0, root);

    // Each environment yields after every line.
    for _ in 0..3 {
        for rt in &envs {
            let me = rt.kernel().getenvid();
            let priority = rt.thisenv().map(|env| env.priority).unwrap_or_default();
            exofork::println!("Env {:x}: My priority is {}", me.0, priority.value());
        }
    }
    Ok(())
}

/// Run `child` up to the point where its `fork` returns
fn resume(parent: &Runtime<Process>, child: EnvId) -> DemoResult<Runtime<Process>> {
    let mut rt = parent.continuation(parent.kernel().resume_child(child));
    match fork(&mut rt)? {
        ForkOutcome::Child => Ok(rt),
        ForkOutcome::Parent(other) => Err(format!("{} resumed as a parent of {}", child, other).into()),
    }
}

// ============================================================================
// Copy-on-Write Scenario
// ============================================================================

/// Parent with a read-only text page and a writable data page forks; the
/// child then writes its data page
fn cow_scenario(machine: &SharedMachine, out: &mut dyn fmt::Write) -> DemoResult<(EnvId, EnvId)> {
    let mut parent = Runtime::new(Process::boot(machine)?);
    parent.load_segment(TEXT, b"text", false)?;
    parent.load_segment(DATA, b"parent data", true)?;

    let child = match fork(&mut parent)? {
        ForkOutcome::Parent(child) => child,
        ForkOutcome::Child => return Err("fresh environment resumed as a child".into()),
    };
    writeln!(out, "[{}] forked {}", parent.this_env(), child)?;

    let mut child_rt = resume(&parent, child)?;
    child_rt.store(DATA, b"child data!")?;
    writeln!(out, "[{}] wrote its data page", child)?;

    for env in [parent.this_env(), child] {
        let mut buf = [0u8; 11];
        machine.lock().peek(env, DATA, &mut buf)?;
        writeln!(
            out,
            "[{}] data: {:?} (faults: {})",
            env,
            String::from_utf8_lossy(&buf),
            machine.lock().faults(env)
        )?;
    }
    Ok((parent.this_env(), child))
}

fn cow(machine: &SharedMachine) -> DemoResult<(EnvId, EnvId)> {
    let mut out = String::new();
    let (parent, child) = cow_scenario(machine, &mut out)?;
    print!("{out}");

    for env in [parent, child] {
        out.clear();
        let line = format!("showmappings {:x} {:#x} {:#x}", env.0, TEXT.as_usize(), DATA.as_usize());
        if monitor::runcmd(&line, &machine.lock(), &mut out)? == Flow::Continue {
            println!("[{}] mappings:", env);
            print!("{out}");
        }
    }
    Ok((parent, child))
}

/// `fmt::Write` adapter over stdout
struct Stdout(io::Stdout);

impl fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_all(s.as_bytes()).map_err(|_| fmt::Error)?;
        self.0.flush().map_err(|_| fmt::Error)
    }
}
