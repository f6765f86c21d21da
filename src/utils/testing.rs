//! Scripted stand-ins for the machine and the operator.

use crate::error::{OxideError, Result};
use crate::utils::{
    net::InterfaceAddr,
    tools::{command_line, CmdOutput, Host, Prompt},
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, VecDeque},
    fs, io,
    net::Ipv4Addr,
    rc::Rc,
    time::Duration,
};

#[derive(Debug, Default, Clone)]
struct UfwState {
    active: bool,
    defaults: BTreeMap<String, String>,
    logging: Option<String>,
    rules: Vec<String>,
}

impl UfwState {
    fn handle(&mut self, args: &[&str]) -> CmdOutput {
        match args {
            // reset keeps the policy defaults and logging level
            ["--force", "reset"] => {
                self.active = false;
                self.rules.clear();
            }
            ["default", policy, direction] => {
                self.defaults
                    .insert(direction.to_string(), policy.to_string());
            }
            ["logging", level] => self.logging = Some(level.to_string()),
            ["--force", "enable"] => self.active = true,
            ["disable"] => self.active = false,
            ["reload"] => {}
            ["status", ..] => return ok(&self.render()),
            ["allow" | "limit", ..] => {
                let rule = args.join(" ");
                if self.rules.contains(&rule) {
                    return ok("Skipping adding existing rule\n");
                }
                self.rules.push(rule);
                return ok("Rule added\n");
            }
            _ => {}
        }
        ok("")
    }

    fn render(&self) -> String {
        if !self.active {
            return "Status: inactive\n".to_owned();
        }
        let mut out = String::from("Status: active\n");
        out.push_str(&format!(
            "Logging: on ({})\n",
            self.logging.as_deref().unwrap_or("low")
        ));
        let defaults: Vec<String> = self
            .defaults
            .iter()
            .map(|(direction, policy)| format!("{} ({})", policy, direction))
            .collect();
        out.push_str(&format!("Default: {}\n\n", defaults.join(", ")));
        for rule in &self.rules {
            out.push_str(rule);
            out.push('\n');
        }
        out
    }
}

fn ok(stdout: &str) -> CmdOutput {
    CmdOutput {
        success: true,
        status: "exit code 0".to_owned(),
        stdout: stdout.to_owned(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CmdOutput {
    CmdOutput {
        success: false,
        status: "exit code 1".to_owned(),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

/// A host whose command outputs are scripted and whose ufw keeps state in memory.
///
/// `cp` is carried out for real so backups land in temp directories.
#[derive(Default)]
pub struct FakeHost {
    responses: RefCell<HashMap<String, VecDeque<CmdOutput>>>,
    failures: Vec<String>,
    missing: Vec<String>,
    timeouts: Vec<String>,
    interfaces: Vec<InterfaceAddr>,
    ufw: RefCell<UfwState>,
    calls: RefCell<Vec<String>>,
    interrupts: Vec<String>,
    interrupt: Rc<Cell<bool>>,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost::default()
    }

    /// Answer `line` with `stdout`. Repeated calls queue further answers;
    /// the last one sticks.
    pub fn respond(self, line: &str, stdout: &str) -> Self {
        self.responses
            .borrow_mut()
            .entry(line.to_owned())
            .or_default()
            .push_back(ok(stdout));
        self
    }

    pub fn respond_failure(self, line: &str, stderr: &str) -> Self {
        self.responses
            .borrow_mut()
            .entry(line.to_owned())
            .or_default()
            .push_back(failed(stderr));
        self
    }

    /// Commands starting with `prefix` (ignoring sudo) exit non-zero.
    pub fn fail_on(mut self, prefix: &str) -> Self {
        self.failures.push(prefix.to_owned());
        self
    }

    /// Commands starting with `prefix` cannot be spawned.
    pub fn missing(mut self, prefix: &str) -> Self {
        self.missing.push(prefix.to_owned());
        self
    }

    pub fn time_out(mut self, prefix: &str) -> Self {
        self.timeouts.push(prefix.to_owned());
        self
    }

    pub fn interface(mut self, name: &str, ip: Ipv4Addr, prefix: u8) -> Self {
        self.interfaces.push(InterfaceAddr {
            name: name.to_owned(),
            ip,
            prefix,
        });
        self
    }

    /// Behave as if Ctrl-C was pressed before the run started.
    pub fn with_interrupt(self) -> Self {
        self.interrupt.set(true);
        self
    }

    /// Ctrl-C arrives while the command starting with `prefix` runs.
    pub fn interrupt_on(mut self, prefix: &str) -> Self {
        self.interrupts.push(prefix.to_owned());
        self
    }

    pub fn interrupt_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.interrupt)
    }

    pub fn ufw_active(self, active: bool) -> Self {
        self.ufw.borrow_mut().active = active;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Calls that would change firewall state.
    pub fn ufw_mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.trim_start_matches("sudo ").to_owned())
            .filter(|c| c.starts_with("ufw ") && !c.starts_with("ufw status"))
            .collect()
    }

    pub fn ufw_listing(&self) -> String {
        self.ufw.borrow().render()
    }
}

impl Host for FakeHost {
    fn run(&self, cmd: &str, args: &[&str], timeout: Option<Duration>) -> Result<CmdOutput> {
        let line = command_line(cmd, args);
        self.calls.borrow_mut().push(line.clone());

        let bare = line.trim_start_matches("sudo ").to_owned();
        if self.interrupts.iter().any(|p| bare.starts_with(p.as_str())) {
            self.interrupt.set(true);
        }
        if self.missing.iter().any(|p| bare.starts_with(p.as_str())) {
            return Err(OxideError::Spawn {
                command: line,
                source: subprocess::PopenError::IoError(io::Error::new(
                    io::ErrorKind::NotFound,
                    "No such file or directory",
                )),
            });
        }
        if self.timeouts.iter().any(|p| bare.starts_with(p.as_str())) {
            return Err(OxideError::Timeout {
                command: line,
                secs: timeout.map(|t| t.as_secs()).unwrap_or_default(),
            });
        }
        if self.failures.iter().any(|p| bare.starts_with(p.as_str())) {
            return Ok(failed("scripted failure"));
        }
        if let Some(queue) = self.responses.borrow_mut().get_mut(&line) {
            let out = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(out) = out {
                return Ok(out);
            }
        }

        let (cmd, args) = match (cmd, args) {
            ("sudo", [inner, rest @ ..]) => (*inner, rest),
            _ => (cmd, args),
        };
        match cmd {
            "ufw" => Ok(self.ufw.borrow_mut().handle(args)),
            "cp" => {
                let paths: Vec<&str> = args
                    .iter()
                    .copied()
                    .filter(|a| !a.starts_with('-'))
                    .collect();
                match paths.as_slice() {
                    [from, to] => match fs::copy(from, to) {
                        Ok(_) => Ok(ok("")),
                        Err(e) => Ok(failed(&e.to_string())),
                    },
                    _ => Ok(failed("cp: bad arguments")),
                }
            }
            _ => Ok(ok("")),
        }
    }

    fn interfaces(&self) -> Result<Vec<InterfaceAddr>> {
        Ok(self.interfaces.clone())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.get()
    }
}

/// Answers prompts from a script and records the questions asked.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<String>>,
    interrupt: Option<Rc<Cell<bool>>>,
}

impl ScriptedPrompt {
    pub fn answering(answers: &[bool]) -> Self {
        ScriptedPrompt {
            answers: RefCell::new(answers.iter().copied().collect()),
            asked: RefCell::new(Vec::new()),
            interrupt: None,
        }
    }

    /// Raise `flag` as each answer is given, like Ctrl-C at the prompt.
    pub fn interrupting(mut self, flag: Rc<Cell<bool>>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }

    fn next(&self, question: &str) -> bool {
        self.asked.borrow_mut().push(question.to_owned());
        if let Some(flag) = &self.interrupt {
            flag.set(true);
        }
        self.answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected prompt: {}", question))
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        Ok(self.next(question))
    }

    fn confirm_timeout(&self, question: &str, _timeout: Duration, _default: bool) -> Result<bool> {
        Ok(self.next(question))
    }
}
