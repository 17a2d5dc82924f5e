//! Workspace commands.

use std::path::Path;

use trio_link::workspace::{ApplyStatus, AssumeYes, UploadOptions, Workspace};

use crate::cli::{Target, WsAction};
use crate::ctl::connect;
use crate::prompt::TerminalConfirm;
use crate::style;

pub fn run_workspace(target: &Target, wsfile: &Path, action: WsAction) -> anyhow::Result<()> {
    let mut controller = connect(target)?;
    let mut workspace = Workspace::new(&mut controller);
    match action {
        WsAction::Create { folder } => {
            workspace.new_from_controller(wsfile, folder.as_deref())?;
            let count = workspace.manifest().map_or(0, |manifest| manifest.files.len());
            println!(
                "{}",
                style::success(format!("Created {} with {count} programs", wsfile.display()))
            );
        }
        WsAction::Check { no_extra, no_diff } => {
            workspace.load(wsfile)?;
            let diff = workspace.controller_diff()?;
            let summary = if no_diff {
                workspace.summarize_diff(&diff, no_extra)
            } else {
                workspace.summarize_changes(&diff, no_extra)?
            };
            if summary.changed {
                print!("{}", style::warning(summary.to_string()));
            } else {
                println!("{}", style::success("Workspace is in sync with the controller"));
            }
        }
        WsAction::Upload {
            clear,
            keep_extra,
            no_restart,
        } => {
            workspace.load(wsfile)?;
            let status = workspace.write_to_controller(UploadOptions {
                remove_extra: !keep_extra,
                clear,
                auto_restart: !no_restart,
            })?;
            let message = match status {
                ApplyStatus::NoChanges => style::success("No changes"),
                ApplyStatus::Restarted => style::success("Changes applied, controller restarted"),
                ApplyStatus::RestartRequired => {
                    style::warning("Changes applied, restart the controller to activate them")
                }
                ApplyStatus::Applied => style::success("Changes applied"),
            };
            println!("{message}");
            println!("{}", status.code());
        }
        WsAction::Download { yes } => {
            if yes {
                workspace.update_from_controller(wsfile, &mut AssumeYes)?;
            } else {
                workspace.update_from_controller(wsfile, &mut TerminalConfirm)?;
            }
        }
    }
    drop(workspace);
    controller.close();
    Ok(())
}
