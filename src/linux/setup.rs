use crate::error::Result;
use crate::os::{
    detect::{detect, NetworkFacts},
    firewall::{listing, RulePlan, Transaction},
    report::Report,
    validate::validate,
};
use crate::utils::{
    config::OxideConfig,
    tools::{Prompt, Shell, SystemHost, TerminalPrompt},
};
use clap::ArgMatches;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Applied { report: PathBuf, fingerprint: String },
    Declined,
}

fn interface_arg(cmd: &ArgMatches) -> Option<&str> {
    cmd.get_one::<String>("interface").map(String::as_str)
}

/// Detect and validate, returning the facts and the rules they lead to.
pub fn prepare(
    shell: &Shell,
    config: &OxideConfig,
    prompt: &dyn Prompt,
    interface: Option<&str>,
) -> Result<(NetworkFacts, RulePlan)> {
    let facts = detect(shell, config, interface)?;
    shell.check_interrupt()?;
    println!("{}", facts);
    validate(&facts, prompt)?;
    shell.check_interrupt()?;
    let plan = RulePlan::build(&facts, config);
    Ok((facts, plan))
}

pub fn apply(
    shell: &Shell,
    config: &OxideConfig,
    prompt: &dyn Prompt,
    interface: Option<&str>,
    stamp: &str,
) -> Result<Outcome> {
    let (facts, plan) = prepare(shell, config, prompt, interface)?;
    println!();
    print!("{}", plan);
    if !prompt.confirm_timeout(
        &format!("Apply these {} firewall commands", plan.len()),
        config.confirm_timeout(),
        true,
    )? {
        warn!("Firewall left unchanged");
        return Ok(Outcome::Declined);
    }
    shell.check_interrupt()?;

    let mut tx = Transaction::begin(shell, config, stamp)?;
    tx.apply(&plan)?;
    let backup = tx.commit();
    info!("Firewall has been rebuilt");

    let listing = listing(shell)?;
    let report = Report {
        stamp,
        facts: &facts,
        plan: &plan,
        backup: &backup,
        listing: &listing,
    };
    let fingerprint = report.fingerprint();
    info!("Rule listing fingerprint {}", fingerprint);
    let report = report.write(&config.report_dir)?;
    Ok(Outcome::Applied {
        report,
        fingerprint,
    })
}

/// `detect`: print what was found and change nothing.
pub fn show_facts(cmd: &ArgMatches, config: &OxideConfig) -> Result<()> {
    let host = SystemHost;
    let shell = Shell::detect(&host);
    let facts = detect(&shell, config, interface_arg(cmd))?;
    shell.check_interrupt()?;
    if cmd.is_present("json") {
        println!(
            "{}",
            serde_json::to_string_pretty(&facts).map_err(std::io::Error::from)?
        );
    } else {
        println!("{}", facts);
    }
    Ok(())
}

/// `plan`: detect, validate and print the ufw commands without running them.
pub fn show_plan(cmd: &ArgMatches, config: &OxideConfig) -> Result<()> {
    let host = SystemHost;
    let shell = Shell::detect(&host);
    let prompt = TerminalPrompt::new(cmd.is_present("yes"));
    let (_, plan) = prepare(&shell, config, &prompt, interface_arg(cmd))?;
    println!();
    print!("{}", plan);
    shell.check_interrupt()
}

pub fn main(cmd: &ArgMatches, config: &OxideConfig, stamp: &str) -> Result<()> {
    let host = SystemHost;
    let shell = Shell::detect(&host);
    let prompt = TerminalPrompt::new(cmd.is_present("yes"));
    match apply(&shell, config, &prompt, interface_arg(cmd), stamp)? {
        Outcome::Applied {
            report,
            fingerprint,
        } => {
            println!("Report: {}", report.display());
            println!("Rule listing sha1: {}", fingerprint);
        }
        Outcome::Declined => {}
    }
    Ok(())
}
