//! Thin textual command layer.
//!
//! Tokenized console lines become typed [`Command`]s which the
//! [`Interpreter`] dispatches onto the motion coordinator and the scan
//! engine. Argument-count and number-format problems surface as syntax
//! errors and are recovered at the console boundary; nothing here touches
//! hardware directly.

use tracing::info;

use crate::axis::HomeOutcome;
use crate::error::{ControlError, Result};
use crate::recorder::{JsonlRecorder, ScanRecorder};
use crate::scan::{ScanEngine, ScanOutcome, ScanSpec};

/// One parsed console command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Wm(Vec<String>),
    Wall,
    Home(Vec<String>),
    Mv(Vec<(String, f64)>),
    Mvr(Vec<(String, f64)>),
    Scan(ScanSpec),
    Set { name: String, value: f64 },
    CrystalInfo,
    NewSession(String),
    Quit,
}

impl Command {
    /// Parse one console line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match verb {
            "wm" => {
                if args.is_empty() {
                    return Err(syntax("Please provide a motor name.", "wm <name1> {<name2>}"));
                }
                Command::Wm(to_names(args))
            }
            "wall" | "wa" => {
                let [] = exactly(args, "wall")?;
                Command::Wall
            }
            "home" => {
                if args.is_empty() {
                    return Err(syntax(
                        "Please provide a motor name.",
                        "home <name1> {<name2>}",
                    ));
                }
                Command::Home(to_names(args))
            }
            "mv" => Command::Mv(to_pairs(args, "mv <name1> <pos1> {<name2> <pos2>}")?),
            "mvr" => Command::Mvr(to_pairs(args, "mvr <name1> <delta1> {<name2> <delta2>}")?),
            "ascan" => {
                let [axis, start, end, n_steps, dwell] =
                    exactly(args, "ascan <name> <start> <end> <nsteps> <time>")?;
                Command::Scan(ScanSpec::Absolute1D {
                    axis: axis.to_string(),
                    start: number(start)?,
                    end: number(end)?,
                    n_steps: step_count(n_steps)?,
                    dwell_s: number(dwell)?,
                })
            }
            "dscan" => {
                let [axis, r_start, r_end, n_steps, dwell] =
                    exactly(args, "dscan <name> <rstart> <rend> <nsteps> <time>")?;
                Command::Scan(ScanSpec::Relative1D {
                    axis: axis.to_string(),
                    r_start: number(r_start)?,
                    r_end: number(r_end)?,
                    n_steps: step_count(n_steps)?,
                    dwell_s: number(dwell)?,
                })
            }
            "mesh" => {
                let [outer, o1, o2, on, inner, i1, i2, inn, dwell] = exactly(
                    args,
                    "mesh <slow> <start1> <end1> <nsteps1> <fast> <start2> <end2> <nsteps2> <time>",
                )?;
                Command::Scan(ScanSpec::Absolute2D {
                    outer: outer.to_string(),
                    outer_start: number(o1)?,
                    outer_end: number(o2)?,
                    outer_steps: step_count(on)?,
                    inner: inner.to_string(),
                    inner_start: number(i1)?,
                    inner_end: number(i2)?,
                    inner_steps: step_count(inn)?,
                    dwell_s: number(dwell)?,
                })
            }
            "dmesh" => {
                let [outer, o1, o2, on, inner, i1, i2, inn, dwell] = exactly(
                    args,
                    "dmesh <slow> <rstart1> <rend1> <nsteps1> <fast> <rstart2> <rend2> <nsteps2> <time>",
                )?;
                Command::Scan(ScanSpec::Relative2D {
                    outer: outer.to_string(),
                    outer_r_start: number(o1)?,
                    outer_r_end: number(o2)?,
                    outer_steps: step_count(on)?,
                    inner: inner.to_string(),
                    inner_r_start: number(i1)?,
                    inner_r_end: number(i2)?,
                    inner_steps: step_count(inn)?,
                    dwell_s: number(dwell)?,
                })
            }
            "set" => {
                let [name, value] = exactly(args, "set <name> <setpos>")?;
                Command::Set {
                    name: name.to_string(),
                    value: number(value)?,
                }
            }
            "crystal" => {
                let [] = exactly(args, "crystal")?;
                Command::CrystalInfo
            }
            "newsession" => {
                let [name] = exactly(args, "newsession <name>")?;
                Command::NewSession(name.to_string())
            }
            "quit" | "exit" => Command::Quit,
            other => {
                return Err(ControlError::Syntax(format!("unknown command '{other}'")));
            }
        };
        Ok(Some(command))
    }
}

fn syntax(message: &str, usage: &str) -> ControlError {
    ControlError::Syntax(format!("{message}\n    {usage}"))
}

fn to_names(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn exactly<'a, const N: usize>(args: &[&'a str], usage: &str) -> Result<[&'a str; N]> {
    <[&'a str; N]>::try_from(args).map_err(|_| syntax("Incorrect number of arguments.", usage))
}

fn number(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| ControlError::Syntax(format!("expected a number, got '{token}'")))
}

fn step_count(token: &str) -> Result<u32> {
    token
        .parse()
        .map_err(|_| ControlError::Syntax(format!("expected a step count, got '{token}'")))
}

fn to_pairs(args: &[&str], usage: &str) -> Result<Vec<(String, f64)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(syntax("Please provide a motor name and position.", usage));
    }
    args.chunks(2)
        .map(|pair| Ok((pair[0].to_string(), number(pair[1])?)))
        .collect()
}

/// Reply from the interpreter to the console loop.
pub enum Response {
    Output(String),
    Quit,
}

/// Dispatches parsed commands and formats operator-facing output.
pub struct Interpreter {
    engine: ScanEngine,
    recorder: Box<dyn ScanRecorder>,
    confirm: Box<dyn FnMut(&str) -> bool + Send>,
}

impl Interpreter {
    pub fn new(
        engine: ScanEngine,
        recorder: Box<dyn ScanRecorder>,
        confirm: Box<dyn FnMut(&str) -> bool + Send>,
    ) -> Self {
        Self {
            engine,
            recorder,
            confirm,
        }
    }

    pub fn engine(&self) -> &ScanEngine {
        &self.engine
    }

    pub async fn execute(&mut self, command: Command) -> Result<Response> {
        match command {
            Command::Wm(names) => {
                let positions = self.engine.motion().positions(&names).await?;
                Ok(Response::Output(format_position_table(&positions)))
            }
            Command::Wall => {
                let positions = self.engine.motion().all_positions().await?;
                Ok(Response::Output(format_position_table(&positions)))
            }
            Command::Home(names) => self.home_each(&names).await,
            Command::Mv(pairs) => {
                self.engine.motion().move_absolute(&pairs).await?;
                Ok(Response::Output(String::new()))
            }
            Command::Mvr(pairs) => {
                self.engine.motion().move_relative(&pairs).await?;
                Ok(Response::Output(String::new()))
            }
            Command::Scan(spec) => {
                let scan_index = self.engine.session().scan_index();
                let outcome = self.engine.run(spec, self.recorder.as_mut()).await?;
                let text = match outcome {
                    ScanOutcome::Completed { points } => {
                        format!("Scan {scan_index} complete: {points} points.")
                    }
                    ScanOutcome::Cancelled { points } => {
                        format!("Scan {scan_index} cancelled after {points} points.")
                    }
                };
                Ok(Response::Output(text))
            }
            Command::Set { name, value } => {
                self.engine.motion().set_position(&name, value).await?;
                Ok(Response::Output(String::new()))
            }
            Command::CrystalInfo => {
                let crystal = self.engine.motion().registry().crystal();
                let crystal = crystal.lock().await;
                let suffix = crystal
                    .preset_name()
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default();
                Ok(Response::Output(format!(
                    "    The current crystal dspace is: {:.4} Angstrom.{suffix}",
                    crystal.lattice_spacing
                )))
            }
            Command::NewSession(name) => {
                self.engine.session_mut().switch(&name)?;
                self.recorder = Box::new(JsonlRecorder::new(self.engine.session().save_dir()));
                info!(session = %name, "session switched");
                Ok(Response::Output(format!(
                    "Current session: {name}.\n\tNext data will be stored in {}",
                    self.engine.session().scan_dir().display()
                )))
            }
            Command::Quit => Ok(Response::Quit),
        }
    }

    async fn home_each(&mut self, names: &[String]) -> Result<Response> {
        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            // resolve before prompting so unknown names fail fast
            let handle = self.engine.motion().registry().find_axis(name)?;
            let needs_confirmation = {
                let axis = handle.lock().await;
                axis.is_physical() && !axis.referenced()
            };
            let confirmed = !needs_confirmation
                || (self.confirm)(&format!(
                    "Axis '{name}' is unreferenced; homing may drive it into a hard stop. \
                     Home anyway?"
                ));
            match self.engine.motion().home(name, confirmed).await? {
                HomeOutcome::Homed(position) => {
                    lines.push(format!("{name} homed at {position:.4}"));
                }
                HomeOutcome::Skipped(reason) => {
                    lines.push(format!("{name} not homed: {reason}"));
                }
            }
        }
        Ok(Response::Output(lines.join("\n")))
    }
}

/// The operator-facing position table: up to five axes per block, names over
/// values.
fn format_position_table(positions: &[(String, f64)]) -> String {
    let mut out = String::from("\n");
    for chunk in positions.chunks(5) {
        let names: String = chunk.iter().map(|(name, _)| format!("{name:^20}")).collect();
        let values: String = chunk
            .iter()
            .map(|(_, position)| format!("{:^20}", format!("{position:.4}")))
            .collect();
        out.push_str("    ");
        out.push_str(names.trim_end());
        out.push('\n');
        out.push_str("    ");
        out.push_str(values.trim_end());
        out.push('\n');
    }
    out
}
