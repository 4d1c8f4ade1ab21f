//! # JTAG Proxy command line tool
//!
//! Connects to a remote debug bridge and runs a single scan-chain operation on it.
//! Mostly useful to check that a bridge is reachable and that the target responds.
use std::error::Error;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use clap_num::maybe_hex;
use env_logger::Env;
use jtag_proxy_client::{
    JtagProxy, ScanChain,
    config::{Builder, DEFAULT_HOST},
    connection::CableState,
};
use jtag_proxy_protocol::MAX_SCAN_BITS;

/// Raw bytes given on the command line as hex digits
#[derive(Clone, Debug, Eq, PartialEq)]
struct HexBytes(Vec<u8>);

#[derive(Subcommand, Eq, PartialEq, Clone, Debug)]
enum Command {
    /// Pulse the TAP reset line
    TapReset,
    /// Drive the chip reset line
    ChipReset {
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        active: bool,
    },
    /// Shift bits on TDI and optionally print the captured TDO bits
    Shift {
        #[arg(short, long, value_parser = parse_bits)]
        bits: u32,
        #[arg(
            short,
            long,
            value_parser = parse_hex_bytes,
            help = "Bytes to drive on TDI as hex, first byte first, LSB of each byte first"
        )]
        tdi: Option<HexBytes>,
        #[arg(short, long, help = "Capture and print TDO")]
        capture: bool,
        #[arg(short, long, help = "Raise TMS on the last cycle")]
        last: bool,
    },
    /// Connect in the background and report connection changes until interrupted
    Watch,
}

#[derive(Parser)]
#[command(about = "Drive a JTAG scan chain through a remote debug bridge", long_about=None)]
struct Args {
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    #[arg(short, long)]
    port: u16,

    #[arg(long, help = "Connect timeout in milliseconds", default_value = "10000")]
    timeout_ms: u64,

    #[clap(subcommand)]
    command: Command,
}

fn parse_bits(s: &str) -> Result<u32, String> {
    let bits = maybe_hex::<u32>(s)?;
    if bits >= MAX_SCAN_BITS {
        return Err(format!("at most {} bits per scan", MAX_SCAN_BITS - 1));
    }
    Ok(bits)
}

fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: Vec<char> = s
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    if digits.len() % 2 != 0 {
        return Err("expected an even number of hex digits".to_string());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).map_err(|e| format!("invalid hex byte {}: {}", byte, e))
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(HexBytes)
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::debug!("Parsed arguments: host={}, port={}", args.host, args.port);

    let config = Builder::new()
        .host(args.host)
        .connect_timeout(Duration::from_millis(args.timeout_ms))
        .build(args.port);

    let mut cable = JtagProxy::tcp(
        config,
        Box::new(|state: CableState| match state {
            CableState::Connected => println!("connected"),
            CableState::Disconnected => println!("disconnected"),
            CableState::Connecting => {}
        }),
    );

    if args.command == Command::Watch {
        cable.connect_async();
        loop {
            std::thread::park();
        }
    }

    cable.connect()?;

    match args.command {
        Command::TapReset => {
            cable.tap_reset(true)?;
            cable.tap_reset(false)?;
        }
        Command::ChipReset { active } => cable.chip_reset(active)?,
        Command::Shift {
            bits,
            tdi,
            capture,
            last,
        } => {
            let mut tdo = vec![0_u8; bits.div_ceil(8) as usize];
            let capture_buf = if capture { Some(&mut tdo[..]) } else { None };
            let drive = tdi.as_ref().map(|tdi| tdi.0.as_slice());
            cable.shift_stream(capture_buf, drive, bits, last)?;
            if capture {
                println!("{}", hex(&tdo));
            }
        }
        Command::Watch => {}
    }
    cable.flush()?;
    cable.disconnect();
    Ok(())
}
