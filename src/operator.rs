// src/operator.rs

//! Operator interaction
//!
//! Business logic never reads the terminal directly. Decisions that need a
//! human (conflict policy, breaking-change confirmation, key passwords) go
//! through the [`Operator`] trait; the CLI plugs in [`TerminalOperator`],
//! tests and `--yes` runs plug in [`ScriptedOperator`].

use crate::svn::inventory::{ConflictPolicy, Divergence};
use std::io::{self, BufRead, Write};

pub trait Operator {
    /// Choose how to reconcile divergent inventories
    fn choose_policy(&mut self, serial: &str, divergent: &[Divergence]) -> ConflictPolicy;

    fn confirm(&mut self, question: &str) -> bool;

    fn password(&mut self, prompt: &str) -> Option<String>;

    /// Something the operator must see, such as a skipped security check
    fn notice(&mut self, message: &str);
}

/// Prompts on stdout, answers from stdin
#[derive(Debug, Default)]
pub struct TerminalOperator;

impl TerminalOperator {
    fn ask(&self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        io::stdout().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Operator for TerminalOperator {
    fn choose_policy(&mut self, serial: &str, divergent: &[Divergence]) -> ConflictPolicy {
        println!(
            "The local copy of {} differs from the repository in {} files:",
            serial,
            divergent.len()
        );
        for d in divergent {
            println!("  {:<12} {}", d.describe(), d.path);
        }
        println!();

        loop {
            let Some(answer) =
                self.ask("Use [r]emote, use [l]ocal, re[n]ame local files, or [c]ancel? ")
            else {
                return ConflictPolicy::Cancel;
            };
            match answer.parse() {
                Ok(policy) => return policy,
                Err(e) => println!("{}", e),
            }
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        matches!(
            self.ask(&format!("{} (y/n) ", question)).as_deref(),
            Some("y") | Some("Y") | Some("yes")
        )
    }

    fn password(&mut self, prompt: &str) -> Option<String> {
        self.ask(&format!("{}: ", prompt)).filter(|s| !s.is_empty())
    }

    fn notice(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}

/// Pre-supplied answers; never blocks
#[derive(Debug, Clone)]
pub struct ScriptedOperator {
    policy: ConflictPolicy,
    confirm: bool,
    password: Option<String>,
    echo: bool,
    policy_requests: usize,
    notices: Vec<String>,
}

impl Default for ScriptedOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOperator {
    /// Cancels conflicts and declines confirmations
    pub fn new() -> Self {
        Self {
            policy: ConflictPolicy::Cancel,
            confirm: false,
            password: None,
            echo: false,
            policy_requests: 0,
            notices: Vec::new(),
        }
    }

    /// `--yes`: confirm everything, still cancel on inventory conflicts
    pub fn assume_yes() -> Self {
        Self {
            confirm: true,
            echo: true,
            ..Self::new()
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn policy_requests(&self) -> usize {
        self.policy_requests
    }

    pub fn notices(&self) -> &[String] {
        &self.notices
    }
}

impl Operator for ScriptedOperator {
    fn choose_policy(&mut self, _serial: &str, _divergent: &[Divergence]) -> ConflictPolicy {
        self.policy_requests += 1;
        self.policy
    }

    fn confirm(&mut self, _question: &str) -> bool {
        self.confirm
    }

    fn password(&mut self, _prompt: &str) -> Option<String> {
        self.password.clone()
    }

    fn notice(&mut self, message: &str) {
        if self.echo {
            eprintln!("{}", message);
        }
        self.notices.push(message.to_string());
    }
}
