use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use clap_num::maybe_hex;
use dbk_shared::{CONTRACTS, DEVICE_PATH, PROTOCOL_REVISION};
use dbk_user::logging::setup_logging;
use dbk_user::SessionConfig;

/// `PROCESS_ALL_ACCESS`
const DEFAULT_ACCESS: u32 = 0x001F_0FFF;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Also append the log to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Largest single read or write in bytes, decimal or hex
    #[arg(long, default_value_t = 4096, value_parser=maybe_hex::<usize>, global = true)]
    max_transfer: usize,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the control code and buffer sizes of every driver request
    Codes,
    /// Print the driver version
    Version,
    /// Send 8 bytes (16 hex digits) through the driver's test request
    Test {
        #[arg(default_value = "0000000000000000", value_parser = parse_payload)]
        payload: [u8; 8],
    },
    /// Read memory of a process
    Read {
        #[arg(short, long)]
        pid: u32,

        // Address to read from, may be in decimal or hex (when prefixed with 0x)
        #[arg(short, long, value_parser=maybe_hex::<u64>)]
        address: u64,

        #[arg(short, long, value_parser=maybe_hex::<usize>)]
        size: usize,

        #[arg(long, default_value_t = DEFAULT_ACCESS, value_parser=maybe_hex::<u32>)]
        access: u32,
    },
    /// Write hex-encoded bytes into a process
    Write {
        #[arg(short, long)]
        pid: u32,

        #[arg(short, long, value_parser=maybe_hex::<u64>)]
        address: u64,

        /// Bytes to write, e.g. 9090cc
        #[arg(short, long, value_parser = parse_hex_bytes)]
        data: HexBytes,

        #[arg(long, default_value_t = DEFAULT_ACCESS, value_parser=maybe_hex::<u32>)]
        access: u32,
    },
    /// Show size and protection of the region containing an address
    Query {
        #[arg(short, long)]
        pid: u32,

        #[arg(short, long, value_parser=maybe_hex::<u64>)]
        address: u64,
    },
    /// Print the kernel process object address of a pid
    Peprocess {
        #[arg(short, long)]
        pid: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

fn parse_hex_bytes(s: &str) -> Result<HexBytes, hex::FromHexError> {
    hex::decode(s.trim_start_matches("0x")).map(HexBytes)
}

fn parse_payload(s: &str) -> Result<[u8; 8], String> {
    let mut payload = [0u8; 8];
    hex::decode_to_slice(s, &mut payload).map_err(|e| format!("expected 16 hex digits: {e}"))?;
    Ok(payload)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose, args.log_file.as_deref()).context("failed to set up logging")?;

    let config = SessionConfig {
        max_transfer: args.max_transfer,
        ..SessionConfig::default()
    };
    match args.command {
        Cmd::Codes => {
            print_codes();
            Ok(())
        }
        command => run(command, config),
    }
}

fn print_codes() {
    println!("{DEVICE_PATH}, protocol revision {PROTOCOL_REVISION}");
    for contract in CONTRACTS {
        println!(
            "{:<32} fn 0x{:03X}  code 0x{:08X}  in {:<12} out {}",
            contract.opcode.name(),
            contract.opcode.function(),
            contract.opcode.code(),
            contract.input.to_string(),
            contract.output
        );
    }
}

/// One line per 16 bytes, prefixed with the address of its first byte.
/// Addresses wrap at the top of the address space.
#[cfg_attr(not(windows), allow(dead_code))]
fn hexdump(address: u64, bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, line)| {
            let at = address.wrapping_add((i * 16) as u64);
            format!("{at:016X}  {}", hex::encode(line))
        })
        .collect()
}

#[cfg(windows)]
fn run(command: Cmd, config: SessionConfig) -> anyhow::Result<()> {
    use dbk_user::win32::Win32;
    use dbk_user::{PrivilegeEscalator, Session};

    let mut escalator = PrivilegeEscalator::new(Win32);
    let mut session = Session::connect(Win32, &mut escalator, config)
        .with_context(|| format!("failed to open a session on {DEVICE_PATH}"))?;

    match command {
        Cmd::Codes => print_codes(),
        Cmd::Version => {
            let version = session.get_version().context("version request failed")?;
            println!("driver version {version}");
        }
        Cmd::Test { payload } => {
            let echo = session.test(payload).context("test request failed")?;
            println!("{}", hex::encode(echo));
        }
        Cmd::Read {
            pid,
            address,
            size,
            access,
        } => {
            let process = session
                .open_process(pid, access)
                .with_context(|| format!("failed to open pid {pid}"))?;
            let bytes = session
                .read_memory(&process, address, size)
                .with_context(|| format!("failed to read {size} bytes at 0x{address:X}"))?;
            for line in hexdump(address, &bytes) {
                println!("{line}");
            }
        }
        Cmd::Write {
            pid,
            address,
            data,
            access,
        } => {
            let process = session
                .open_process(pid, access)
                .with_context(|| format!("failed to open pid {pid}"))?;
            session
                .write_memory(&process, address, &data.0)
                .with_context(|| format!("failed to write {} bytes at 0x{address:X}", data.0.len()))?;
            println!("wrote {} bytes to 0x{address:X}", data.0.len());
        }
        Cmd::Query { pid, address } => {
            let region = session
                .query_virtual_memory(pid, address)
                .with_context(|| format!("failed to query 0x{address:X} in pid {pid}"))?;
            println!(
                "0x{address:X}: {} bytes, protection 0x{:X}",
                region.length, region.protection
            );
        }
        Cmd::Peprocess { pid } => {
            let eprocess = session
                .get_peprocess(pid)
                .with_context(|| format!("failed to get the process object of pid {pid}"))?;
            println!("0x{eprocess:016X}");
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn run(command: Cmd, _config: SessionConfig) -> anyhow::Result<()> {
    anyhow::bail!("{command:?} needs the DBK driver, which only runs on Windows")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn addresses_accept_hex() {
        let args = Args::try_parse_from([
            "dbk_user", "read", "--pid", "4", "--address", "0x7ff6000010", "--size", "0x20",
        ])
        .unwrap();
        match args.command {
            Cmd::Read {
                pid,
                address,
                size,
                access,
            } => {
                assert_eq!(pid, 4);
                assert_eq!(address, 0x7f_f600_0010);
                assert_eq!(size, 0x20);
                assert_eq!(access, DEFAULT_ACCESS);
            }
            other => panic!("parsed {other:?}"),
        }
        assert_eq!(args.max_transfer, 4096);
    }

    #[test]
    fn write_data_is_hex() {
        let args = Args::try_parse_from([
            "dbk_user", "-vv", "write", "-p", "1", "-a", "4096", "-d", "9090cc",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        match args.command {
            Cmd::Write { data, .. } => assert_eq!(data, HexBytes(vec![0x90, 0x90, 0xCC])),
            other => panic!("parsed {other:?}"),
        }

        assert!(Args::try_parse_from(["dbk_user", "write", "-p", "1", "-a", "0", "-d", "xyz"])
            .is_err());
    }

    #[test]
    fn test_payload_must_be_eight_bytes() {
        assert_eq!(parse_payload("0102030405060708").unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(parse_payload("0102").is_err());
    }

    #[test]
    fn hexdump_wraps_at_the_top_of_memory() {
        let lines = hexdump(u64::MAX - 7, &[0xAB; 20]);
        assert_eq!(
            lines,
            vec![
                format!("FFFFFFFFFFFFFFF8  {}", "ab".repeat(16)),
                "0000000000000008  abababab".to_string(),
            ]
        );
    }
}
