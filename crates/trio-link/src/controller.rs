//! Program and system operations on a connected controller.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use smol_str::SmolStr;
use tracing::debug;

use crate::checksum::{split_program_lines, trim_line_ending};
use crate::diagnostics::{EthercatState, SystemErrors};
use crate::error::TrioError;
use crate::program::{
    parse_directory, program_from_filename, program_name_from_path, ProgramTable, ProgramType,
};
use crate::report::Reporter;
use crate::session::{Connector, Session, SessionOptions, TcpConnector};

/// Bounds for the upload sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// `FLASH_STATUS` polls before giving up.
    pub flash_poll_attempts: u32,
    pub flash_poll_interval: Duration,
    /// `COMPILE` after an upload can take a while.
    pub compile_timeout: Duration,
    /// `COMPILE_ALL` before a controller checksum.
    pub compile_all_timeout: Duration,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            flash_poll_attempts: 60,
            flash_poll_interval: Duration::from_millis(30),
            compile_timeout: Duration::from_secs(60),
            compile_all_timeout: Duration::from_secs(120),
        }
    }
}

/// Quotes a name for the command line; `"` is doubled.
#[must_use]
pub fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

pub struct Controller<C: Connector = TcpConnector> {
    session: Session<C>,
    write: WriteOptions,
}

impl Controller<TcpConnector> {
    /// Connects to `host[:port]` over TCP.
    pub fn connect_tcp(
        endpoint: &str,
        options: SessionOptions,
        write: WriteOptions,
        reporter: Box<dyn Reporter>,
    ) -> Result<Self, TrioError> {
        let connector = TcpConnector::parse(endpoint)?;
        let session = Session::open(connector, options, reporter)?;
        Ok(Self::new(session, write))
    }
}

impl<C: Connector> Controller<C> {
    #[must_use]
    pub fn new(session: Session<C>, write: WriteOptions) -> Self {
        Self { session, write }
    }

    pub fn session_mut(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    #[must_use]
    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn reporter_mut(&mut self) -> &mut dyn Reporter {
        self.session.reporter_mut()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.session.endpoint()
    }

    /// Releases the session.
    pub fn close(mut self) {
        self.session.close();
    }

    pub fn list_programs(&mut self) -> Result<ProgramTable, TrioError> {
        let listing = self.session.command_string("DIR")?;
        parse_directory(&listing)
    }

    /// Program source with `\n` line endings.
    pub fn read_program(&mut self, name: &str) -> Result<String, TrioError> {
        self.session.command_string(&format!("LIST {}", quote(name)))
    }

    /// Type of a stored program, `None` if there is no such program.
    pub fn program_type(&mut self, name: &str) -> Result<Option<ProgramType>, TrioError> {
        let command = format!("?PROG_TYPE {}", quote(name));
        let code = self.session.command_int(&command)?;
        if code == -1 {
            return Ok(None);
        }
        ProgramType::from_code(code)
            .map(Some)
            .ok_or(TrioError::UnknownProgramType(code))
    }

    pub fn program_exists(&mut self, name: &str) -> Result<bool, TrioError> {
        Ok(self
            .session
            .command_int(&format!("?IS_PROG {}", quote(name)))?
            != 0)
    }

    /// Deletes a program and commits the directory; absent programs are fine.
    pub fn delete_program(&mut self, name: &str) -> Result<(), TrioError> {
        if self.program_exists(name)? {
            self.session.command(&format!("DEL {}", quote(name)))?;
            self.session.command("&M")?;
        }
        Ok(())
    }

    /// Replaces a program with `lines`, commits it to flash and compiles.
    /// No lines writes a single empty line.
    pub fn write_program<S: AsRef<str>>(
        &mut self,
        name: &str,
        program_type: ProgramType,
        lines: &[S],
    ) -> Result<(), TrioError> {
        if lines.is_empty() {
            return self.write_lines(name, program_type, &[""]);
        }
        self.write_lines(name, program_type, lines)
    }

    fn write_lines<S: AsRef<str>>(
        &mut self,
        name: &str,
        program_type: ProgramType,
        lines: &[S],
    ) -> Result<(), TrioError> {
        self.write_program_steps(name, program_type, lines)
            .map_err(|source| TrioError::WriteProgram {
                program: SmolStr::new(name),
                source: Box::new(source),
            })
    }

    fn write_program_steps<S: AsRef<str>>(
        &mut self,
        name: &str,
        program_type: ProgramType,
        lines: &[S],
    ) -> Result<(), TrioError> {
        // Every line is checked before the stored program is deleted.
        let edits = lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let line = line.as_ref().trim_end_matches(['\r', '\n']);
                let command = format!("!{name},{index}R{line}");
                if command.is_ascii() {
                    Ok(command)
                } else {
                    Err(TrioError::NonAsciiCommand(command))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.delete_program(name)?;
        self.session.command(&format!(
            "SELECT {},{}",
            quote(name),
            program_type.code()
        ))?;
        for edit in &edits {
            self.session.command(edit)?;
        }
        self.session.command(&format!("!{name},M"))?;
        self.commit_to_flash(name)?;
        let timeout = self.write.compile_timeout;
        self.session.command_within("COMPILE", timeout)?;
        Ok(())
    }

    fn commit_to_flash(&mut self, name: &str) -> Result<(), TrioError> {
        let commit = format!("!{name},Z");
        self.session.command(&commit)?;
        for attempt in 0..self.write.flash_poll_attempts {
            if self.session.command_int("?FLASH_STATUS")? == 0 {
                debug!(program = name, attempt, "flash commit done");
                return Ok(());
            }
            self.session.command(&commit)?;
            thread::sleep(self.write.flash_poll_interval);
        }
        Err(TrioError::FlashCommitTimeout {
            program: SmolStr::new(name),
        })
    }

    /// Checksum computed by the controller over a stored program.
    pub fn checksum_program(&mut self, name: &str) -> Result<u16, TrioError> {
        let command = format!("EDPROG{},10", quote(name));
        let value = self.session.command_int(&command)?;
        u16::try_from(value).map_err(|_| TrioError::UnexpectedValue {
            command: command.into(),
            value,
        })
    }

    /// Compiles everything and returns the controller-wide checksum.
    pub fn checksum_controller(&mut self) -> Result<i64, TrioError> {
        let timeout = self.write.compile_all_timeout;
        let output = self.session.command_string_within("COMPILE_ALL", timeout)?;
        if !output.is_empty() {
            self.session.reporter_mut().status(&output);
        }
        self.session.command_int("?CHECKSUM")
    }

    /// Sets or clears the boot process of a program. Only executable programs
    /// carry an autorun setting; other types are left alone.
    pub fn set_autorun(
        &mut self,
        name: &str,
        program_type: ProgramType,
        process: Option<i32>,
    ) -> Result<(), TrioError> {
        if !program_type.supports_autorun() {
            return Ok(());
        }
        let command = match process {
            Some(process) => format!("RUNTYPE{},1,{process}", quote(name)),
            None => format!("RUNTYPE{},0,-1", quote(name)),
        };
        self.session.command(&command)?;
        Ok(())
    }

    pub fn restart(&mut self, wait: bool) -> Result<(), TrioError> {
        self.session.restart(wait)
    }

    pub fn halt(&mut self) {
        self.session.halt();
    }

    /// Erases every program on the controller.
    pub fn clear_all(&mut self) -> Result<(), TrioError> {
        self.session.command_string("NEW \"ALL\"")?;
        Ok(())
    }

    /// Uploads a local file; name and type come from the file name. An empty
    /// file is stored without lines so both checksums agree.
    pub fn upload_program(&mut self, path: impl AsRef<Path>) -> Result<(), TrioError> {
        let path = path.as_ref();
        let (name, program_type) = program_from_filename(path)?;
        let content = fs::read(path)
            .map_err(|err| TrioError::Io(format!("{}: {err}", path.display()).into()))?;
        let lines: Vec<String> = split_program_lines(&content)
            .into_iter()
            .map(|line| String::from_utf8_lossy(trim_line_ending(line)).into_owned())
            .collect();
        self.write_lines(&name, program_type, &lines)
    }

    /// Downloads the program matching a local file name, checking its type.
    pub fn download_program(&mut self, path: impl AsRef<Path>) -> Result<PathBuf, TrioError> {
        let path = path.as_ref();
        let (name, program_type) = program_from_filename(path)?;
        match self.program_type(&name)? {
            None => return Err(TrioError::MissingProgram(name)),
            Some(found) if found != program_type => {
                return Err(TrioError::WrongRemoteType {
                    program: name,
                    found: found.code(),
                })
            }
            Some(_) => {}
        }
        self.save_program(&name, path)?;
        Ok(path.to_path_buf())
    }

    /// Downloads a program by name into `dir`, naming the file after the
    /// controller's type for it.
    pub fn download_by_name(&mut self, dir: impl AsRef<Path>, name: &str) -> Result<PathBuf, TrioError> {
        let (name, _) = program_name_from_path(name);
        let program_type = self
            .program_type(&name)?
            .ok_or_else(|| TrioError::MissingProgram(name.clone()))?;
        let path = dir
            .as_ref()
            .join(format!("{name}{}", program_type.extension()));
        self.save_program(&name, &path)?;
        Ok(path)
    }

    fn save_program(&mut self, name: &str, path: &Path) -> Result<(), TrioError> {
        let source = self.read_program(name)?;
        let mut text = source.replace('\n', "\r\n");
        if !text.is_empty() {
            text.push_str("\r\n");
        }
        fs::write(path, text)
            .map_err(|err| TrioError::Io(format!("{}: {err}", path.display()).into()))
    }

    /// Downloads every program into `dir`.
    pub fn download_all(&mut self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, TrioError> {
        let dir = dir.as_ref();
        let names: Vec<SmolStr> = self.list_programs()?.into_keys().collect();
        names
            .iter()
            .map(|name| self.download_by_name(dir, name))
            .collect()
    }

    /// Uploads every file of `dir` with a known program extension.
    pub fn upload_all(&mut self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, TrioError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && program_name_from_path(path).1.is_some())
            .collect();
        files.sort();
        for file in &files {
            self.upload_program(file)?;
        }
        Ok(files)
    }

    pub fn system_errors(&mut self) -> Result<SystemErrors, TrioError> {
        let value = self.session.command_int("?SYSTEM_ERROR")?;
        SystemErrors::from_value(value)
    }

    /// Peak system load (percent) since the previous call or power up; the
    /// peak is reset afterwards.
    pub fn system_load(&mut self) -> Result<f64, TrioError> {
        let load = self.session.command_float("?SYSTEM_LOAD_MAX")?;
        self.session.command("SYSTEM_LOAD_MAX=0")?;
        Ok(load)
    }

    /// Process table with CPU usage.
    pub fn process_load(&mut self) -> Result<String, TrioError> {
        self.session.command_string("PROCESS")
    }

    pub fn ethercat_list(&mut self) -> Result<String, TrioError> {
        self.session.command_string("ETHERCAT($87,0)")
    }

    pub fn ethercat_state(&mut self) -> Result<EthercatState, TrioError> {
        let command = "ETHERCAT($22,0,-1)";
        let value = self.session.command_int(command)?;
        EthercatState::from_value(value).ok_or(TrioError::UnexpectedValue {
            command: command.into(),
            value,
        })
    }

    pub fn ethercat_set_state(&mut self, state: EthercatState) -> Result<String, TrioError> {
        self.session
            .command_string(&format!("ETHERCAT($21, 0, {}, 0) ", state.value()))
    }

    pub fn ethercat_reinitialize(&mut self) -> Result<String, TrioError> {
        self.session.command_string("ETHERCAT(0, 0)")
    }

    pub fn ethercat_start(&mut self) -> Result<String, TrioError> {
        self.ethercat_set_state(EthercatState::Operational)
    }

    pub fn ethercat_stop(&mut self) -> Result<String, TrioError> {
        self.session.command_string("ETHERCAT(1, 0)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_doubles_inner_quotes() {
        assert_eq!(quote("MAIN"), "\"MAIN\"");
        assert_eq!(quote("A\"B"), "\"A\"\"B\"");
    }
}
