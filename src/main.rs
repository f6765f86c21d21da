use clap::{Arg, ArgMatches, Command};

use log::error;
use simplelog::*;

use std::{fs, fs::File, path::Path, process};

#[cfg(not(target_os = "linux"))]
compile_error!("ufwoxide drives ufw and only builds for Linux");

#[cfg_attr(target_os = "linux", path = "linux/mod.rs")]
pub mod os;
pub mod error;
pub mod utils;

use error::{OxideError, Result};
use utils::{
    config::OxideConfig,
    tools::{install_interrupt_handler, interrupted, timestamp},
};

fn interface_arg() -> Arg<'static> {
    Arg::new("interface")
        .short('i')
        .long("interface")
        .takes_value(true)
        .help("Use this interface instead of probing the outbound route")
}

fn yes_arg() -> Arg<'static> {
    Arg::new("yes")
        .short('y')
        .long("yes")
        .help("Answer yes to every question")
}

fn cli() -> Command<'static> {
    Command::new("ufwoxide")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rebuilds a workstation's UFW rules from its detected LAN, Docker and Tailscale networks")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .global(true)
                .help("JSON config file (defaults to ./ufwoxide.json if present)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .help("Show debug output on the terminal"),
        )
        .subcommand(
            Command::new("detect")
                .about("Print the detected network facts")
                .arg(interface_arg())
                .arg(Arg::new("json").long("json").help("Print as JSON")),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the ufw commands a run would issue")
                .arg(interface_arg())
                .arg(yes_arg()),
        )
        .subcommand(
            Command::new("apply")
                .about("Back up, reset and rebuild the firewall")
                .arg(interface_arg())
                .arg(yes_arg()),
        )
        .subcommand(
            Command::new("revive")
                .about("Restore the rules saved by an earlier run")
                .arg(
                    Arg::new("backup")
                        .short('b')
                        .long("backup")
                        .takes_value(true)
                        .help("Backup directory to restore instead of the newest one"),
                ),
        )
}

fn init_logging(app: &ArgMatches, name: &str, log_dir: Option<(&Path, &str)>) -> Result<()> {
    let term_level = if app.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let term = TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    let loggers: Vec<Box<dyn SharedLogger>> = match log_dir {
        Some((dir, stamp)) => {
            fs::create_dir_all(dir)?;
            let file = File::create(dir.join(format!("ufwoxide_{}_{}.log", name, stamp)))?;
            vec![term, WriteLogger::new(LevelFilter::Debug, Config::default(), file)]
        }
        None => vec![term],
    };
    CombinedLogger::init(loggers).map_err(|e| {
        OxideError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })
}

fn run(app: &ArgMatches) -> Result<()> {
    let stamp = timestamp();
    // clap rejects a missing subcommand before we get here
    let (name, cmd) = match app.subcommand() {
        Some(x) => x,
        None => return Ok(()),
    };

    // config path is known before logging, its errors are reported after
    let config = OxideConfig::load(app.get_one::<String>("config").map(Path::new));
    let log_dir = config
        .as_ref()
        .map(|c| c.log_dir.clone())
        .unwrap_or_else(|_| OxideConfig::default().log_dir);
    match name {
        "apply" | "revive" => init_logging(app, name, Some((log_dir.as_path(), stamp.as_str())))?,
        _ => init_logging(app, name, None)?,
    }
    let config = config?;
    install_interrupt_handler()?;

    match name {
        "detect" => os::setup::show_facts(cmd, &config),
        "plan" => os::setup::show_plan(cmd, &config),
        "apply" => os::setup::main(cmd, &config, &stamp),
        "revive" => os::revive::main(cmd, &config),
        _ => Ok(()),
    }
}

fn main() {
    let app = cli().get_matches();
    if let Err(e) = run(&app) {
        error!("{}", e);
        let code = if interrupted() { 130 } else { e.exit_code() };
        // logger may not be up yet
        if !log::log_enabled!(log::Level::Error) {
            eprintln!("error: {}", e);
        }
        process::exit(code);
    }
}
