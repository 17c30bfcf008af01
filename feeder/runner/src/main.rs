use clap::{App, Arg};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use skua::buffer::FrameBuffer;
use skua::ctl::Shutdown;
use skua::filter::{Filter, FilterConfig};
use skua::gps::GpsState;
use skua::input::net::NetDriver;
use skua::input::{Driver, InputControl, InputStatistics, Parser};
use skua::login::{Login, Version};
use skua::net::Network;
use skua::serial::SerialStore;
use skua::tb::Talkback;
use skua::types::DeviceType;
use skua::{recv, relay};
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vane::logging::{self, Logger};

mod config;
use config::FeederConfig;

/// Seconds between receiver reconnection attempts.
const INPUT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    let matches = App::new("skuad")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Bush Hammer Industries")
        .about("Feeds Mode-S telemetry from a local receiver to the collection service.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .arg(
            Arg::with_name("save")
                .long("save")
                .takes_value(true)
                .value_name("FILE")
                .help("Write the effective configuration to a file and exit"),
        )
        .arg(
            Arg::with_name("state-dir")
                .long("state-dir")
                .takes_value(true)
                .value_name("DIR")
                .help("Directory holding persistent device state"),
        )
        .get_matches();

    let config_path = matches.value_of("CONFIG_FILE").unwrap();
    let (mut config, load_error) = match FeederConfig::load(config_path) {
        Ok(config) => (config, None),
        Err(err) => (FeederConfig::default(), Some(err)),
    };

    // initialize logging
    let log = logging::init(&config.log.level);

    if let Some(err) = load_error {
        logging::warn!(log, "could not read configuration, using defaults";
                       "path" => config_path, "error" => err);
    }

    config.fix(&log);
    if !config.check(&log) {
        logging::error!(log, "configuration inconsistent, quitting");
        process::exit(1);
    }

    if let Some(save_path) = matches.value_of("save") {
        logging::info!(log, "writing configuration file"; "path" => save_path);
        if let Err(err) = config.save(save_path) {
            logging::error!(log, "could not write configuration";
                            "path" => save_path, "error" => err);
            process::exit(1);
        }
        return;
    }

    let state_dir = matches.value_of("state-dir").unwrap_or("/var/lib/skuad");
    fs::create_dir_all(state_dir).expect("Could not create the state directory");

    run(&config, Path::new(state_dir), &log);
}

fn run(config: &FeederConfig, state_dir: &Path, log: &Logger) {
    let shutdown = Arc::new(Shutdown::new());

    // frame buffer
    let buffer_cfg = config.buffer_config();
    let buffer = Arc::new(FrameBuffer::new(&buffer_cfg, log));

    // filter, shared with the input configuration
    let filter_cfg = Arc::new(FilterConfig::new(
        config.filter.crc,
        config.filter.ext_squitter_only,
        config.filter.sync_filter,
    ));
    let filter = Arc::new(Filter::new(filter_cfg.clone()));

    // receiver input
    let driver = Arc::new(NetDriver::new(
        &config.input.host,
        config.input.port,
        INPUT_RECONNECT_INTERVAL,
        shutdown.clone(),
        log,
    ));
    let input_ctl = Arc::new(InputControl::new(
        driver.clone() as Arc<dyn Driver>,
        filter_cfg,
        config.input.fec,
        log,
    ));
    filter.attach_input(input_ctl.clone());
    let input_stats = Arc::new(InputStatistics::default());

    // uplink
    let net = Arc::new(Network::new(config.network_config(), shutdown.clone(), log));
    let serial = Arc::new(SerialStore::new(state_dir, config.device.serial, log));
    let gps = Arc::new(GpsState::new(net.clone(), log));

    let version =
        Version::parse(env!("CARGO_PKG_VERSION")).expect("Invalid crate version string");
    let login = Arc::new(Login::new(
        DeviceType::RadarcapeNet,
        version,
        config.ident.username.as_deref(),
        serial.clone(),
        gps,
        log,
    ));

    // talkback processors
    let mut talkback = Talkback::new(log);
    talkback.register_filter(filter.clone());
    talkback.register_serial(serial);
    let talkback = Arc::new(talkback);

    // one thread per long-lived component
    let mut components = Vec::new();

    {
        let net = net.clone();
        let login = login.clone();
        components.push((
            "network",
            thread::spawn(move || net.mainloop(|net| login.run(net))),
        ));
    }

    {
        let talkback = talkback.clone();
        let net = net.clone();
        components.push(("talkback", thread::spawn(move || talkback.mainloop(&net))));
    }

    {
        let buffer = buffer.clone();
        let net = net.clone();
        let timeout = Duration::from_millis(config.network.timeout);
        components.push((
            "relay",
            thread::spawn(move || relay::mainloop(&buffer, &net, timeout)),
        ));
    }

    {
        let mut parser = Parser::new(input_ctl, input_stats, log);
        let buffer = buffer.clone();
        let filter = filter.clone();
        let shutdown = shutdown.clone();
        components.push((
            "receive",
            thread::spawn(move || recv::mainloop(&mut parser, &buffer, &filter, &shutdown)),
        ));
    }

    if buffer_cfg.gc {
        let buffer = buffer.clone();
        let shutdown = shutdown.clone();
        components.push((
            "buffer-gc",
            thread::spawn(move || buffer.gc_mainloop(&shutdown)),
        ));
    }

    logging::info!(log, "started"; "components" => components.len());

    // wait for a termination request
    let mut signals = Signals::new(&[SIGINT, SIGTERM]).expect("Could not install signal handlers");
    signals.forever().next();
    logging::info!(log, "stopping");

    // stop in reverse dependency order: unblock every blocking call, then
    // collect the threads
    shutdown.trigger();
    driver.interrupt();
    net.stop();

    for (name, handle) in components.into_iter().rev() {
        join_component(name, handle, log);
    }

    logging::info!(log, "stopped");
}

/// Joins a component thread. Warns after one second, gives up and leaves
/// the thread behind after five: every blocking call was already
/// interrupted, so an overrun means it is wedged beyond rescue.
fn join_component(name: &str, handle: thread::JoinHandle<()>, log: &Logger) {
    let start = Instant::now();
    let mut warned = false;

    while !handle.is_finished() {
        if start.elapsed() >= Duration::from_secs(5) {
            logging::error!(log, "component did not stop, giving up";
                            "component" => name);
            return;
        }
        if start.elapsed() >= Duration::from_secs(1) && !warned {
            logging::warn!(log, "component is slow to stop, keep waiting";
                           "component" => name);
            warned = true;
        }
        thread::sleep(Duration::from_millis(10));
    }

    if handle.join().is_err() {
        logging::error!(log, "component panicked"; "component" => name);
    }
}
