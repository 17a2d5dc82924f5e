//! Controller commands.

use std::io::Write;

use anyhow::Context;
use serde_json::json;
use trio_link::config::{TrioConfig, ENDPOINT_ENV};
use trio_link::diagnostics::EthercatState;
use trio_link::program::{program_name_from_path, ProgramTable};
use trio_link::report::{indent, Reporter};
use trio_link::{Controller, Session};

use crate::cli::{Command, EthercatAction, Target};
use crate::style;

/// Prints controller output and progress on the terminal.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    dots: bool,
}

impl ConsoleReporter {
    fn end_dots(&mut self) {
        if self.dots {
            println!();
            self.dots = false;
        }
    }
}

impl Reporter for ConsoleReporter {
    fn extra_output(&mut self, text: &str) {
        self.end_dots();
        println!("{}", style::console(indent(text)));
    }

    fn status(&mut self, message: &str) {
        self.end_dots();
        println!("{message}");
    }

    fn tick(&mut self) {
        self.dots = true;
        print!(".");
        let _ = std::io::stdout().flush();
    }
}

/// Opens a session to the controller selected on the command line.
pub fn connect(target: &Target) -> anyhow::Result<Controller> {
    let config = TrioConfig::discover(target.config.as_deref())?;
    let env = std::env::var(ENDPOINT_ENV).ok();
    let connector = config.resolve_endpoint(
        target.ip.as_deref(),
        target.controller.as_deref(),
        env.as_deref(),
    )?;
    let session = Session::open(connector, config.session, Box::new(ConsoleReporter::default()))?;
    Ok(Controller::new(session, config.write))
}

pub fn run_controller(target: &Target, command: Command) -> anyhow::Result<()> {
    let mut controller = connect(target)?;
    match command {
        Command::Cmd { command } => {
            let output = controller.session_mut().command_string(&command.join(" "))?;
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Command::Ls { json } => {
            let programs = controller.list_programs()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&listing_json(&programs))?);
            } else {
                print_listing(&programs);
            }
        }
        Command::Top => println!("{}", controller.process_load()?),
        Command::Status => {
            let errors = controller.system_errors()?;
            if errors.is_empty() {
                println!("{}", style::success("System errors: none"));
            } else {
                println!(
                    "{}",
                    style::warning(format!("System errors: {}", errors.describe().join(", ")))
                );
            }
            let load = controller.system_load()?;
            println!("Peak system load: {load:.1}%");
        }
        Command::Ethercat { action } => run_ethercat(&mut controller, action)?,
        Command::Show { program } => {
            let (name, _) = program_name_from_path(&program);
            println!("{}", controller.read_program(&name)?);
        }
        Command::Halt => controller.halt(),
        Command::Restart { no_wait } => {
            controller.restart(!no_wait)?;
            if !no_wait {
                println!("{}", style::success("Controller restarted"));
            }
        }
        Command::Ws { .. } | Command::Completions { .. } => {
            anyhow::bail!("not a controller command")
        }
    }
    controller.close();
    Ok(())
}

fn run_ethercat(controller: &mut Controller, action: EthercatAction) -> anyhow::Result<()> {
    let output = match action {
        EthercatAction::List => controller.ethercat_list()?,
        EthercatAction::State => controller.ethercat_state()?.to_string(),
        EthercatAction::Start => controller.ethercat_start()?,
        EthercatAction::Stop => controller.ethercat_stop()?,
        EthercatAction::Reinit => controller.ethercat_reinitialize()?,
        EthercatAction::SetState { state } => {
            let state = EthercatState::parse(&state)
                .with_context(|| format!("expected one of {:?}", EthercatState::ALL))?;
            controller.ethercat_set_state(state)?;
            controller.ethercat_list()?
        }
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn print_listing(programs: &ProgramTable) {
    for program in programs.values() {
        if program.autorun.is_auto() {
            println!(
                "{} {}",
                program.file_name(),
                style::accent(format!("({})", program.autorun))
            );
        } else {
            println!("{}", program.file_name());
        }
    }
}

fn listing_json(programs: &ProgramTable) -> serde_json::Value {
    let rows: Vec<_> = programs
        .values()
        .map(|program| {
            json!({
                "name": program.name.as_str(),
                "file": program.file_name(),
                "type": program.program_type.code_type_name(),
                "source_size": program.source_size,
                "code_size": program.code_size,
                "autorun": program.autorun.to_string(),
                "process": program.autorun.process(),
            })
        })
        .collect();
    json!({ "programs": rows })
}
