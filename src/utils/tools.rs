use crate::error::{OxideError, Result};
use crate::utils::net::{prefix_of, InterfaceAddr};
use chrono::Local;
use get_if_addrs::{get_if_addrs, IfAddr};
use log::{debug, warn};
use sha1::{Digest, Sha1};
use std::{
    io::{self, stdin, stdout, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Everything the tool needs from the machine it runs on.
pub trait Host {
    fn run(&self, cmd: &str, args: &[&str], timeout: Option<Duration>) -> Result<CmdOutput>;

    fn interfaces(&self) -> Result<Vec<InterfaceAddr>>;

    /// Whether the operator asked the run to stop.
    fn interrupted(&self) -> bool {
        interrupted()
    }
}

/// The real machine.
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&self, cmd: &str, args: &[&str], timeout: Option<Duration>) -> Result<CmdOutput> {
        exec_cmd(cmd, args, timeout)
    }

    fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        Ok(get_if_addrs()?
            .into_iter()
            .filter_map(|interface| match interface.addr {
                IfAddr::V4(v4) => Some(InterfaceAddr {
                    name: interface.name,
                    ip: v4.ip,
                    prefix: prefix_of(v4.netmask),
                }),
                IfAddr::V6(_) => None,
            })
            .collect())
    }
}

pub fn command_line(cmd: &str, args: &[&str]) -> String {
    let mut line = String::from(cmd);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

pub fn exec_cmd(cmd: &str, args: &[&str], timeout: Option<Duration>) -> Result<CmdOutput> {
    let line = command_line(cmd, args);
    debug!("Running `{}`", line);
    let mut argv = vec![cmd];
    argv.extend_from_slice(args);
    let mut p = Popen::create(
        &argv[..],
        PopenConfig {
            stdout: Redirection::Pipe,
            stderr: Redirection::Pipe,
            ..Default::default()
        },
    )
    .map_err(|source| OxideError::Spawn {
        command: line.clone(),
        source,
    })?;

    let mut comm = p.communicate_start(None);
    if let Some(limit) = timeout {
        comm = comm.limit_time(limit);
    }
    let (out, err) = match comm.read() {
        Ok(captured) => captured,
        Err(e) => {
            let _ = p.kill();
            let _ = p.wait();
            if e.error.kind() == io::ErrorKind::TimedOut {
                return Err(OxideError::Timeout {
                    command: line,
                    secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                });
            }
            return Err(OxideError::Io(e.error));
        }
    };
    let status = p.wait().map_err(|source| OxideError::Spawn {
        command: line.clone(),
        source,
    })?;

    Ok(CmdOutput {
        success: status.success(),
        status: describe_status(status),
        stdout: String::from_utf8_lossy(&out.unwrap_or_default()).into_owned(),
        stderr: String::from_utf8_lossy(&err.unwrap_or_default()).into_owned(),
    })
}

fn describe_status(status: ExitStatus) -> String {
    match status {
        ExitStatus::Exited(code) => format!("exit code {}", code),
        ExitStatus::Signaled(signal) => format!("signal {}", signal),
        other => format!("{:?}", other),
    }
}

/// Runs commands on a [`Host`], elevating through sudo when not root.
pub struct Shell<'a> {
    host: &'a dyn Host,
    elevate: bool,
}

impl<'a> Shell<'a> {
    pub fn new(host: &'a dyn Host, elevate: bool) -> Self {
        Shell { host, elevate }
    }

    /// Elevate unless `id -u` says we already are root.
    pub fn detect(host: &'a dyn Host) -> Self {
        let elevate = match host.run("id", &["-u"], None) {
            Ok(out) if out.success => out.stdout.trim() != "0",
            Ok(_) | Err(_) => {
                warn!("Could not determine user id, assuming sudo is needed");
                true
            }
        };
        if elevate {
            debug!("Not running as root, privileged commands go through sudo");
        }
        Shell::new(host, elevate)
    }

    pub fn host(&self) -> &dyn Host {
        self.host
    }

    pub fn run(&self, cmd: &str, args: &[&str], timeout: Option<Duration>) -> Result<CmdOutput> {
        self.host.run(cmd, args, timeout)
    }

    /// Run `cmd` with root privileges; a non-zero exit is not an error here.
    pub fn privileged(&self, cmd: &str, args: &[&str]) -> Result<CmdOutput> {
        if self.elevate {
            let mut sudo_args = vec![cmd];
            sudo_args.extend_from_slice(args);
            self.host.run("sudo", &sudo_args, None)
        } else {
            self.host.run(cmd, args, None)
        }
    }

    /// Run `cmd` with root privileges and fail on a non-zero exit.
    pub fn checked(&self, cmd: &str, args: &[&str]) -> Result<CmdOutput> {
        let out = self.privileged(cmd, args)?;
        if !out.success {
            return Err(OxideError::CommandFailed {
                command: command_line(cmd, args),
                status: out.status,
                stderr: out.stderr.trim().to_owned(),
            });
        }
        Ok(out)
    }

    pub fn ufw(&self, args: &[&str]) -> Result<CmdOutput> {
        self.checked("ufw", args)
    }

    pub fn check_interrupt(&self) -> Result<()> {
        if self.host.interrupted() {
            return Err(OxideError::Interrupted);
        }
        Ok(())
    }
}

/// Asking the operator things.
pub trait Prompt {
    /// Ask and wait for an answer; anything but yes is no.
    fn confirm(&self, question: &str) -> Result<bool>;

    /// Ask and fall back to `default` once `timeout` passes without an answer.
    fn confirm_timeout(&self, question: &str, timeout: Duration, default: bool) -> Result<bool>;
}

type Lines = Receiver<io::Result<String>>;

pub struct TerminalPrompt {
    assume_yes: bool,
    input: fn() -> Lines,
}

impl TerminalPrompt {
    pub fn new(assume_yes: bool) -> Self {
        TerminalPrompt {
            assume_yes,
            input: stdin_line,
        }
    }

    fn read_answer(&self, deadline: Option<Instant>) -> Result<Option<String>> {
        read_answer(&(self.input)(), deadline)
    }
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        if self.assume_yes {
            check_interrupt()?;
            warn!("{}: assuming yes", question);
            return Ok(true);
        }
        print!("{} (y/n)? ", question);
        let _ = stdout().flush();
        Ok(self.read_answer(None)?.map(|a| is_yes(&a)).unwrap_or(false))
    }

    fn confirm_timeout(&self, question: &str, timeout: Duration, default: bool) -> Result<bool> {
        if self.assume_yes {
            check_interrupt()?;
            return Ok(true);
        }
        print!(
            "{} (y/n, {} in {}s)? ",
            question,
            if default { "yes" } else { "no" },
            timeout.as_secs()
        );
        let _ = stdout().flush();
        match self.read_answer(Some(Instant::now() + timeout))? {
            Some(answer) if answer.trim().is_empty() => Ok(default),
            Some(answer) => Ok(is_yes(&answer)),
            None => {
                println!();
                debug!("No answer within {}s, using default", timeout.as_secs());
                Ok(default)
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().chars().next(), Some('y'))
}

/// One line of stdin, read on its own thread so the wait can be abandoned.
fn stdin_line() -> Lines {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut input = String::new();
        let line = stdin().read_line(&mut input).map(|_| input);
        let _ = tx.send(line);
    });
    rx
}

/// Wait for a line, giving up at `deadline` or on Ctrl-C.
fn read_answer(rx: &Lines, deadline: Option<Instant>) -> Result<Option<String>> {
    loop {
        check_interrupt()?;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => return Ok(Some(line?)),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
        }
    }
}

pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .map_err(|e| OxideError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn check_interrupt() -> Result<()> {
    if interrupted() {
        return Err(OxideError::Interrupted);
    }
    Ok(())
}

pub fn sha1sum_vec(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Stamp shared by the log, backup and report names of one run.
pub fn timestamp() -> String {
    Local::now().format("%Y_%m_%d_%H_%M_%S").to_string()
}
