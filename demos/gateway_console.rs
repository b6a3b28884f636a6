//! Gateway Console Example
//!
//! Plays the gateway side of the link against a real actuator on a serial
//! LoRa modem:
//! - Interactive serial port selection (or command-line argument)
//! - Menu of the eight commands the actuator understands
//! - Decoded receipts and status reports
//!
//! Usage:
//!   cargo run --example gateway_console              # Interactive mode
//!   cargo run --example gateway_console -- COM3      # Specify port
//!   cargo run --example gateway_console -- /dev/ttyUSB0
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example gateway_console

use std::time::{Duration, Instant};

use inquire::{Select, Text};
use log::{error, info, warn};
use roller_actuator::constants::{BAUD_RATE, DEVICE_TYPE_ID, SET_COMM_MODE_INTENT};
use roller_actuator::frame::{Frame, FrameAssembler};
use roller_actuator::hal::Transport;
use roller_actuator::serial::SerialTransport;
use roller_actuator::{Command, Result};

const REPLY_WINDOW: Duration = Duration::from_secs(3);

fn prompt_error(e: inquire::InquireError) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("Selection cancelled: {}", e),
    )
}

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = SerialTransport::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(prompt_error)?;

    // Extract just the port name (before " - ")
    let port_name = selection
        .split(" - ")
        .next()
        .unwrap_or(&selection)
        .to_string();
    Ok(port_name)
}

/// Ask for a byte, accepting decimal or 0x-prefixed hex
fn prompt_byte(message: &str, default: &str) -> Result<u8> {
    loop {
        let answer = Text::new(message)
            .with_default(default)
            .prompt()
            .map_err(prompt_error)?;
        let parsed = match answer.strip_prefix("0x") {
            Some(hex) => u8::from_str_radix(hex, 16).ok(),
            None => answer.parse().ok(),
        };
        match parsed {
            Some(byte) => return Ok(byte),
            None => warn!("Not a byte: {}", answer),
        }
    }
}

/// Build the payload for `command` from prompts
fn payload_for(command: Command) -> Result<Vec<u8>> {
    let payload = match command {
        Command::QueryWorkingParameters => {
            let mut payload = vec![0u8; 19];
            let mode = prompt_byte("Comm mode (0 = just report, 0xF0 / 0xF1 = set)", "0")?;
            if mode != 0 {
                payload[0] = SET_COMM_MODE_INTENT;
                payload[11] = mode;
            }
            payload
        }
        Command::SetGroupNumber => {
            let mut payload = Vec::with_capacity(6);
            for slot in 1..=5 {
                payload.push(prompt_byte(&format!("Group slot {}", slot), "0")?);
            }
            payload.push(0x01);
            payload
        }
        Command::SetSnAreaChannel => {
            let sn = Text::new("Serial number (9 characters)")
                .with_default("RF2024001")
                .prompt()
                .map_err(prompt_error)?;
            let mut bytes = sn.into_bytes();
            bytes.resize(9, b'0');
            let mut payload = vec![0x01, 0x00];
            payload.extend_from_slice(&bytes);
            payload
        }
        Command::QueryStatus => vec![0x01],
        Command::StopWork | Command::ResetTravel => {
            vec![prompt_byte("Group", "0x55")?, 0x01]
        }
        Command::SetOpening => vec![
            prompt_byte("Group", "0x55")?,
            0x01,
            prompt_byte("Opening (0-100, 0xF0 close, 0xF1 open)", "50")?,
        ],
        Command::SetThresholds => vec![
            prompt_byte("Group", "0x55")?,
            0x01,
            0,
            prompt_byte("Low voltage threshold", "20")?,
            0,
            prompt_byte("Current multiple (tenths)", "20")?,
            prompt_byte("Report interval (x10 s)", "3")?,
        ],
    };
    Ok(payload)
}

fn describe(frame: &Frame) -> String {
    let p = &frame.payload;
    match frame.frame_id {
        0xE011 => format!(
            "general parameters: groups {:?}, SN {}",
            &p[..5],
            String::from_utf8_lossy(&p[5..14])
        ),
        0xE012 => "requesting group numbers".to_string(),
        0xE013 => "requesting SN and area".to_string(),
        0xE014 => format!(
            "status {}: opening {}, voltage {} mV, current {}, CSQ {}.{}",
            p[1],
            p[6],
            u16::from_be_bytes([p[2], p[3]]),
            u16::from_be_bytes([p[11], p[12]]),
            p[4],
            p[5]
        ),
        0xE015 => format!("receipt {}", p[1]),
        id => format!("unknown frame {:#06x}", id),
    }
}

/// Print every frame heard within the reply window
fn listen(link: &mut SerialTransport) -> Result<()> {
    let mut assembler = FrameAssembler::new();
    let deadline = Instant::now() + REPLY_WINDOW;
    while Instant::now() < deadline {
        let Some(byte) = link.receive()? else {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        };
        if let Some(raw) = assembler.push(byte) {
            match Frame::parse(&raw) {
                Ok(frame) => info!("<- area {}: {}", frame.area, describe(&frame)),
                Err(e) => warn!("<- unreadable frame: {}", e),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Get port name from command line argument or interactive selection
    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    info!("Opening gateway modem on {}...", port_name);
    let mut link = SerialTransport::new(&port_name, BAUD_RATE)?;
    let area = prompt_byte("Target area (0x55 = all)", "0x55")?;

    let commands = vec![
        Command::QueryStatus,
        Command::SetOpening,
        Command::StopWork,
        Command::ResetTravel,
        Command::SetThresholds,
        Command::SetGroupNumber,
        Command::SetSnAreaChannel,
        Command::QueryWorkingParameters,
    ];

    let names: Vec<String> = commands.iter().map(|c| format!("{:?}", c)).collect();

    loop {
        let choice = Select::new("Command:", names.clone()).raw_prompt();
        let command = match choice {
            Ok(option) => commands[option.index],
            Err(_) => break,
        };

        let payload = payload_for(command)?;
        let mass = if area == 0x55 { 0x55 } else { 0x00 };
        let frame = Frame::new(command.frame_id(), DEVICE_TYPE_ID, mass, area, payload);
        info!("-> {:?}", command);
        if let Err(e) = link.send(&frame.encode()) {
            error!("Send failed: {}", e);
            continue;
        }
        listen(&mut link)?;
    }

    info!("Bye");
    Ok(())
}
