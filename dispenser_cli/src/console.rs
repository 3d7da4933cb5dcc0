//! Text console servicing: a reader thread pumps stdin lines through a
//! bounded channel so commands are handled between FSM steps without ever
//! blocking the control loop.

use std::io::BufRead;
use std::thread;

use crossbeam_channel as xch;
use dispenser_core::StateStore;
use dispenser_traits::Eeprom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Read,
    Erase,
    Unknown(String),
}

/// Case-insensitive parse; blank lines are ignored.
pub fn parse(line: &str) -> Option<ConsoleCommand> {
    let cmd = line.trim().to_ascii_lowercase();
    match cmd.as_str() {
        "" => None,
        "read" => Some(ConsoleCommand::Read),
        "erase" => Some(ConsoleCommand::Erase),
        _ => Some(ConsoleCommand::Unknown(cmd)),
    }
}

pub struct Console {
    rx: xch::Receiver<ConsoleCommand>,
}

impl Console {
    pub fn spawn() -> Self {
        let (tx, rx) = xch::bounded(8);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if let Some(cmd) = parse(&line)
                    && tx.send(cmd).is_err()
                {
                    break;
                }
            }
        });
        Self { rx }
    }

    pub fn poll(&self) -> Option<ConsoleCommand> {
        self.rx.try_recv().ok()
    }
}

pub fn handle<E: Eeprom>(cmd: &ConsoleCommand, store: &mut StateStore<E>) {
    match cmd {
        ConsoleCommand::Read => match store.read_log() {
            Ok(entries) if entries.is_empty() => println!("Log is empty"),
            Ok(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    println!("Log {i}: {entry}");
                }
            }
            Err(e) => eprintln!("EEPROM READ ERROR: {e}"),
        },
        ConsoleCommand::Erase => match store.erase_log() {
            Ok(()) => println!("Log erased"),
            Err(e) => eprintln!("EEPROM ERASE ERROR: {e}"),
        },
        ConsoleCommand::Unknown(cmd) => println!("Unknown command: {cmd}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(parse("read"), Some(ConsoleCommand::Read));
        assert_eq!(parse("  READ \n"), Some(ConsoleCommand::Read));
        assert_eq!(parse("Erase"), Some(ConsoleCommand::Erase));
        assert_eq!(parse(""), None);
        assert_eq!(parse("   "), None);
        assert_eq!(
            parse("format"),
            Some(ConsoleCommand::Unknown("format".into()))
        );
    }
}
