use std::{env, path::Path, sync::Arc, thread, time::Duration};

use inquire::Select;
use korad_psu::{
    config::PsuConfig,
    device::{Device, DeviceEvent},
    dispatch::{CommandDispatcher, queue_source},
    kd3005p::Kd3005p,
    serial_port::{SystemPortConnector, SystemSerialTransport},
    validator::ComPortValidator,
};
use tracing_subscriber::EnvFilter;

// Commands fed through the dispatcher, as a cloud broker would deliver them.
const COMMANDS: [&str; 4] = [
    r#"{"action":"setCurrent","channel":0,"current":0.1}"#,
    r#"{"action":"setVoltage","channel":0,"voltage":5.5}"#,
    r#"{"action":"allChannelsOn"}"#,
    r#"{"action":"allChannelsOff"}"#,
];
// Read from the working directory when no configuration file is given.
const CONFIG_FILE: &str = "korad.toml";
// Time to watch measurements before switching off.
const OBSERVE_TIME: Duration = Duration::from_secs(5);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Optional second argument: a TOML configuration file
    let config_file = env::args()
        .nth(2)
        .or_else(|| Path::new(CONFIG_FILE).exists().then(|| CONFIG_FILE.to_owned()));
    let config = match &config_file {
        Some(path) => PsuConfig::from_file(path).expect("Failed to load configuration"),
        None => PsuConfig::default(),
    };

    // Get serial port from command line arg, the configuration file or interactive selection
    let from_config = config_file.is_some().then(|| config.connection.clone());
    let port_name = env::args().nth(1).or(from_config).unwrap_or_else(|| {
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

    let transport = SystemSerialTransport::new(SystemPortConnector, config.serial_settings());
    let device = Arc::new(
        Device::new(&config.device_name, Kd3005p::new(transport), ComPortValidator)
            .with_poll_interval(config.poll_interval()),
    );
    let events = device.subscribe();

    if let Err(err) = device.connect(&port_name) {
        eprintln!("Failed to connect to {port_name}: {err}");
        eprintln!("Device control may not work");
    }
    let identity = device.with_hal_ref(|psu| psu.reported_identity().map(str::to_owned));
    println!("Model: {}, reported: {:?}", device.identification(), identity);

    // Print measurements as they change
    let printer = thread::spawn(move || {
        for event in events {
            match event {
                DeviceEvent::MeasurementChanged(sample) => println!(
                    "Ch{}: {:.3}V {:.3}A at {}",
                    sample.channel, sample.voltage, sample.current, sample.timestamp
                ),
                DeviceEvent::SetpointChanged {
                    channel,
                    attribute,
                    value,
                } => println!("Ch{channel}: {attribute} set to {value}"),
            }
        }
    });

    let (sender, mut source) = queue_source();
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let dispatcher =
        CommandDispatcher::new(device.clone()).with_idle_delay(config.command_idle());
    let listener = thread::spawn(move || {
        dispatcher.run(&mut source, &stop_rx);
        source.acknowledged()
    });

    for (index, command) in COMMANDS.iter().enumerate() {
        if index == COMMANDS.len() - 1 {
            thread::sleep(OBSERVE_TIME);
        }
        sender.send(*command).expect("Command listener stopped");
    }
    drop(sender);

    let acknowledged = listener.join().expect("Command listener panicked");
    println!("Acknowledged {} commands", acknowledged.len());
    drop(stop_tx);

    for channel in device.channels() {
        println!("{channel:#?}");
    }

    device.disconnect().expect("Failed to disconnect");
    drop(device);
    printer.join().expect("Printer panicked");
}
