use std::env;

use fugit::{MicrosDurationU32, MillisDurationU32};
use inquire::Select;
use serialport::SerialPort;
use smu_list_sync::{
    channel::{ChannelConfigBuilder, PollConfig, SmuChannel, StopFlag},
    session::{ConnectionId, SessionRegistry},
    types::{ListSweep, ListTiming, SourceMode, SweepMode},
};

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
// A full list sweep reply can be long, keep the per read timeout generous.
const SERIAL_TIMEOUT_MS: u64 = 2000;
const SWEEP_STEPS: usize = 11;
const COMPLIANCE_A: f64 = 0.01;
const GATE_BIAS_V: f64 = 0.5;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

fn main() {
    env_logger::init();

    // Get serial port from command line arg or interactive selection
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using port: {}", port_name);

    let mut registry = SessionRegistry::new();
    let session = registry.get_or_create(&ConnectionId::new("SMU", &port_name), || {
        let port = serialport::new(&port_name, BAUD_RATE)
            .timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()
            .expect("Failed to open serial port");
        PortWrapper(port)
    });

    // Drain sweep on channel 1, constant gate bias on channel 2.
    let drain = ListSweep::new(SweepMode::LinearDual, 0.0, 1.0, SWEEP_STEPS).with_timing(
        ListTiming::new(MicrosDurationU32::millis(100), MicrosDurationU32::millis(10)),
    );
    let drain = ChannelConfigBuilder::new(1, SourceMode::Voltage)
        .compliance(COMPLIANCE_A)
        .list_sweep(drain)
        .build()
        .expect("Invalid drain configuration");
    let gate = ChannelConfigBuilder::new(2, SourceMode::Voltage)
        .value(GATE_BIAS_V)
        .compliance(COMPLIANCE_A)
        .build()
        .expect("Invalid gate configuration");

    let poll = PollConfig {
        interval: MillisDurationU32::millis(100),
        timeout: Some(MillisDurationU32::secs(60)),
    };
    let mut channels = [
        SmuChannel::new(drain, session.clone()).with_poll_config(poll),
        SmuChannel::new(gate, session.clone()).with_poll_config(poll),
    ];
    let stop = StopFlag::new();

    for channel in channels.iter_mut() {
        let role = channel.configure().unwrap();
        println!("Channel {} role: {:?}", channel.id(), role);
    }
    for channel in channels.iter_mut() {
        channel.signin().unwrap();
    }
    for channel in channels.iter_mut() {
        channel.start().unwrap();
    }
    for channel in channels.iter_mut() {
        let value = channel.config().value;
        channel.apply(value).unwrap();
    }
    for channel in channels.iter_mut() {
        channel.measure().unwrap();
    }
    for channel in channels.iter_mut() {
        channel.request_result(&stop).unwrap();
    }
    for channel in channels.iter_mut() {
        channel.read_result().unwrap();
    }

    for channel in &channels {
        let measurement = channel.call().unwrap();
        println!("\n--- Channel {} ---", channel.id());
        for ((source, measured), time) in measurement.pairs().zip(&measurement.timestamps) {
            println!("{:>8.3} s  {:>10.4} V  {:>12.4e} A", time, source, measured);
        }
        if !measurement.flagged.is_empty() {
            println!("Samples with non-zero status: {:?}", measurement.flagged);
        }
    }

    for channel in channels.iter_mut() {
        channel.unconfigure().unwrap();
    }
}
