//! Agent command language.

/// Help text sent back for `help`.
pub const AGENT_HELP: &str = r#"Available commands:
  cmd <command>        - Execute a shell command (e.g., "cmd dir d:\test")
  cmd capture screen   - Take current screenshot and send back
  ps <command>         - Execute a PowerShell command
  send <path>          - Send a file back to the console
  help                 - Show this help message
  exit                 - Disconnect the agent

Examples:
  cmd dir d:\test
  cmd capture screen
  send C:\logs\report.txt
"#;

/// Reply to `exit`, sent before the agent disconnects.
pub const EXIT_REPLY: &str = "Client is disconnecting...\n";

/// Reply to anything the agent does not understand.
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command format. Please use 'cmd <command>' or 'ps <command>'\nType 'help' for more information.\n";

/// Interpreter a shell command is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `cmd /C` on Windows, `sh -c` elsewhere.
    System,
    /// `powershell -Command`.
    PowerShell,
}

/// A parsed console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand<'a> {
    Help,
    Exit,
    SendFile { path: &'a str },
    CaptureScreen,
    Run { shell: Shell, command: &'a str },
    Unknown,
}

impl<'a> AgentCommand<'a> {
    /// Classify one command line (already trimmed by the reader).
    pub fn parse(line: &'a str) -> Self {
        match line {
            "help" => return AgentCommand::Help,
            "exit" => return AgentCommand::Exit,
            "cmd capture screen" => return AgentCommand::CaptureScreen,
            _ => {}
        }
        if let Some(path) = line.strip_prefix("send ") {
            return AgentCommand::SendFile { path: path.trim() };
        }
        if let Some(command) = line.strip_prefix("cmd ") {
            return AgentCommand::Run {
                shell: Shell::System,
                command,
            };
        }
        if let Some(command) = line.strip_prefix("ps ") {
            return AgentCommand::Run {
                shell: Shell::PowerShell,
                command,
            };
        }
        AgentCommand::Unknown
    }
}
