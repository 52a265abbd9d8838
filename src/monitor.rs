//! Kernel monitor
//!
//! A line-oriented command interpreter for inspecting a simulated machine:
//! environments, their mappings and their memory. It never changes machine
//! state.

use core::fmt::{self, Write};

use heapless::Vec;

use crate::memlayout::{PGSIZE, UTOP};
use crate::sim::{Machine, SharedMachine};
use crate::syscall::EnvStatus;
use crate::types::{EnvId, VirtAddr};

/// Maximum number of words on a command line
pub const MAXARGS: usize = 16;

const WHITESPACE: &[char] = &[' ', '\t', '\r', '\n'];

/// What the monitor loop does after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

type CommandFn = fn(&[&str], &Machine, &mut dyn Write) -> Result<Flow, fmt::Error>;

struct Command {
    name: &'static str,
    desc: &'static str,
    func: CommandFn,
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        desc: "Display this list of commands",
        func: mon_help,
    },
    Command {
        name: "kerninfo",
        desc: "Display frame and environment usage",
        func: mon_kerninfo,
    },
    Command {
        name: "envs",
        desc: "List live environments",
        func: mon_envs,
    },
    Command {
        name: "showmappings",
        desc: "Show mappings of <env> in [<start>, <end>]",
        func: mon_showmappings,
    },
    Command {
        name: "dump",
        desc: "Dump <len> bytes of <env>'s memory at <va>",
        func: mon_dump,
    },
    Command {
        name: "exit",
        desc: "Leave the monitor",
        func: mon_exit,
    },
];

// ============================================================================
// Commands
// ============================================================================

fn mon_help(_args: &[&str], _machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    for cmd in COMMANDS {
        writeln!(out, "{} - {}", cmd.name, cmd.desc)?;
    }
    Ok(Flow::Continue)
}

fn mon_kerninfo(_args: &[&str], machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    let config = machine.config();
    writeln!(out, "Simulated exokernel:")?;
    writeln!(
        out,
        "  frames  {:>6} / {:<6} ({} KB per frame)",
        machine.frames_in_use(),
        machine.frames_total(),
        PGSIZE / 1024
    )?;
    writeln!(out, "  envs    {:>6} / {:<6}", machine.envs().count(), config.nenv)?;
    writeln!(out, "  syscalls {:>5}", machine.syscalls())?;
    Ok(Flow::Continue)
}

fn mon_envs(_args: &[&str], machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    writeln!(out, "id       parent   status       prio pages faults")?;
    for info in machine.envs() {
        writeln!(
            out,
            "{} {} {:<12} {:>4} {:>5} {:>6}",
            info.id,
            info.parent_id,
            status_name(info.status),
            info.priority.value(),
            machine.mappings(info.id).len(),
            machine.faults(info.id)
        )?;
    }
    Ok(Flow::Continue)
}

fn mon_showmappings(args: &[&str], machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    let (env, start, end) = match (
        args.get(1).and_then(|s| parse_env(s)),
        args.get(2).and_then(|s| parse_hex(s)),
        args.get(3).and_then(|s| parse_hex(s)),
    ) {
        (Some(env), Some(start), Some(end)) if args.len() == 4 && start <= end => (env, start, end),
        _ => {
            writeln!(out, "usage: showmappings <env> <start> <end>")?;
            return Ok(Flow::Continue);
        }
    };
    if machine.env_info(env).is_none() {
        writeln!(out, "showmappings: no environment {}", env)?;
        return Ok(Flow::Continue);
    }

    let first = VirtAddr::new(start).vpn();
    let last = VirtAddr::new(end).vpn();
    let mut shown = 0;
    for (vpn, pte) in machine.mappings(env) {
        if vpn < first || vpn > last {
            continue;
        }
        writeln!(
            out,
            "{}  frame {:#07x}  refs {}  {}",
            vpn.addr(),
            pte.frame(),
            machine.frame_refs(pte.frame()),
            pte.flags()
        )?;
        shown += 1;
    }
    writeln!(out, "{} page(s) mapped", shown)?;
    Ok(Flow::Continue)
}

fn mon_dump(args: &[&str], machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    let (env, va, len) = match (
        args.get(1).and_then(|s| parse_env(s)),
        args.get(2).and_then(|s| parse_hex(s)),
        args.get(3).and_then(|s| parse_hex(s)),
    ) {
        (Some(env), Some(va), Some(len)) if args.len() == 4 => (env, va, len),
        _ => {
            writeln!(out, "usage: dump <env> <va> <len>")?;
            return Ok(Flow::Continue);
        }
    };

    let start = VirtAddr::new(va);
    match start.checked_offset(len) {
        Some(end) if end.as_usize() <= UTOP => {}
        _ => {
            writeln!(out, "dump: range {:#x}+{:#x} is outside user memory", va, len)?;
            return Ok(Flow::Continue);
        }
    }

    let mut done = 0;
    while done < len {
        let at = start.offset(done);
        let mut line = [0u8; 16];
        let n = (len - done).min(line.len());
        match machine.peek(env, at, &mut line[..n]) {
            Ok(()) => {
                write!(out, "{}:", at)?;
                for byte in &line[..n] {
                    write!(out, " {:02x}", byte)?;
                }
                writeln!(out)?;
            }
            Err(err) => writeln!(out, "{}: {}", at, err)?,
        }
        done += n;
    }
    Ok(Flow::Continue)
}

fn mon_exit(_args: &[&str], _machine: &Machine, _out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    Ok(Flow::Exit)
}

fn status_name(status: EnvStatus) -> &'static str {
    match status {
        EnvStatus::Free => "Free",
        EnvStatus::Runnable => "Runnable",
        EnvStatus::NotRunnable => "NotRunnable",
    }
}

fn parse_hex(s: &str) -> Option<usize> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    usize::from_str_radix(digits, 16).ok()
}

fn parse_env(s: &str) -> Option<EnvId> {
    parse_hex(s).and_then(|id| u32::try_from(id).ok()).map(EnvId)
}

// ============================================================================
// Interpreter
// ============================================================================

/// Parse and run one command line
pub fn runcmd(line: &str, machine: &Machine, out: &mut dyn Write) -> Result<Flow, fmt::Error> {
    let mut args: Vec<&str, MAXARGS> = Vec::new();
    for word in line.split(WHITESPACE).filter(|w| !w.is_empty()) {
        if args.push(word).is_err() {
            writeln!(out, "Too many arguments (max {})", MAXARGS)?;
            return Ok(Flow::Continue);
        }
    }

    let name = match args.first() {
        Some(name) => *name,
        None => return Ok(Flow::Continue),
    };
    match COMMANDS.iter().find(|cmd| cmd.name == name) {
        Some(cmd) => (cmd.func)(&args, machine, out),
        None => {
            writeln!(out, "Unknown command '{}'", name)?;
            Ok(Flow::Continue)
        }
    }
}

/// Run commands from `lines` until one of them is `exit`
pub fn monitor<I>(machine: &SharedMachine, lines: I, out: &mut dyn Write) -> fmt::Result
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    writeln!(out, "Welcome to the exofork monitor!")?;
    writeln!(out, "Type 'help' for a list of commands.")?;
    for line in lines {
        write!(out, "K> ")?;
        let line = line.as_ref();
        writeln!(out, "{}", line.trim_end())?;
        if runcmd(line, &machine.lock(), out)? == Flow::Exit {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cow::fork;
    use crate::memlayout::UTEXT;
    use crate::runtime::Runtime;
    use crate::sim::{boot, MachineConfig, Process};
    use alloc::string::String;

    fn forked() -> (SharedMachine, EnvId, EnvId) {
        let machine = boot(MachineConfig { nenv: 8, npages: 32 });
        let process = Process::boot(&machine).unwrap();
        let mut rt = Runtime::new(process);
        rt.load_segment(VirtAddr::new(UTEXT), b"text", false).unwrap();
        rt.load_segment(VirtAddr::new(UTEXT + PGSIZE), b"data", true)
            .unwrap();
        let parent = rt.this_env();
        let child = fork(&mut rt).unwrap().child_id().unwrap();
        (machine, parent, child)
    }

    fn run(machine: &SharedMachine, line: &str) -> (Flow, String) {
        let mut out = String::new();
        let flow = runcmd(line, &machine.lock(), &mut out).unwrap();
        (flow, out)
    }

    #[test]
    fn test_help_lists_every_command() {
        let (machine, _, _) = forked();
        let (flow, out) = run(&machine, "help");
        assert_eq!(flow, Flow::Continue);
        for cmd in COMMANDS {
            assert!(out.contains(cmd.name));
        }
    }

    #[test]
    fn test_unknown_and_empty_commands() {
        let (machine, _, _) = forked();
        assert_eq!(run(&machine, "frobnicate 1").1, "Unknown command 'frobnicate'\n");
        assert_eq!(run(&machine, "   \t ").1, "");
    }

    #[test]
    fn test_too_many_arguments() {
        let (machine, _, _) = forked();
        let line = "help a b c d e f g h i j k l m n o p";
        assert_eq!(run(&machine, line).1, "Too many arguments (max 16)\n");
    }

    #[test]
    fn test_showmappings_marks_shared_data_cow() {
        let (machine, _, child) = forked();
        let line = alloc::format!("showmappings {:x} {:#x} {:#x}", child.0, UTEXT, UTEXT + PGSIZE);
        let (_, out) = run(&machine, &line);
        assert!(out.contains("refs 2  P U\n"));
        assert!(out.contains("refs 2  P U COW\n"));
        assert!(out.contains("2 page(s) mapped"));
    }

    #[test]
    fn test_showmappings_usage() {
        let (machine, _, _) = forked();
        assert!(run(&machine, "showmappings 1000").1.starts_with("usage"));
        assert!(run(&machine, "showmappings zz 0 1").1.starts_with("usage"));
    }

    #[test]
    fn test_dump_reads_child_memory() {
        let (machine, _, child) = forked();
        let line = alloc::format!("dump {:x} {:#x} 4", child.0, UTEXT + PGSIZE);
        let (_, out) = run(&machine, &line);
        assert_eq!(out, "0x00801000: 64 61 74 61\n");
    }

    #[test]
    fn test_dump_rejects_ranges_outside_user_memory() {
        let (machine, _, child) = forked();
        for line in [
            alloc::format!("dump {:x} ffffffffffffffff 20", child.0),
            alloc::format!("dump {:x} 0 ffffffffffffffff", child.0),
            alloc::format!("dump {:x} {:#x} 10", child.0, UTOP - 8),
        ] {
            let (flow, out) = run(&machine, &line);
            assert_eq!(flow, Flow::Continue);
            assert!(out.starts_with("dump: range"), "{}", out);
        }
    }

    #[test]
    fn test_envs_lists_parent_and_child() {
        let (machine, parent, child) = forked();
        let (_, out) = run(&machine, "envs");
        assert!(out.contains(&alloc::format!("{} 00000000 Runnable", parent)));
        assert!(out.contains(&alloc::format!("{} {} Runnable", child, parent)));
    }

    #[test]
    fn test_monitor_stops_at_exit() {
        let (machine, _, _) = forked();
        let mut out = String::new();
        monitor(&machine, ["kerninfo", "exit", "help"], &mut out).unwrap();
        assert!(out.contains("frames"));
        assert!(!out.contains("help - "));
    }
}
