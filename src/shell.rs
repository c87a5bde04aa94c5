//! Line dispatcher for the interactive shell.
//!
//! Tree queries answer immediately; anything that talks to the service is
//! queued on the session's workers and reported through `tracing` when it
//! completes.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{MegaError, Result};
use crate::fs::Node;
use crate::session::{AccountFlags, Command, CommandOutput, SessionClient};

const HELP: &str = "\
Commands:
  login email password   log in and fetch the remote tree
  logout                 end the session
  ls [-R] [path]         list a remote folder
  cd [path]              change the remote folder
  get remotefile         download into the local folder
  put localfile          upload into the remote folder
  whoami                 show the account and its usage
  pwd                    print the local folder
  lcd path               change the local folder
  lls [path]             list a local folder
  help                   this text
  quit                   save the session and exit";

/// Words recognised by the shell but not supported.
const PLACEHOLDERS: &[&str] = &[
    "mount", "mkdir", "rm", "mv", "cp", "share", "export", "import", "passwd",
];

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Empty,
    Help,
    Quit,
    Login { email: String, password: String },
    Logout,
    Ls { recursive: bool, path: Option<String> },
    Cd(Option<String>),
    Get(String),
    Put(String),
    Whoami,
    Pwd,
    Lcd(String),
    Lls(Option<String>),
    NotImplemented(String),
    Usage(&'static str),
    Invalid(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = words.split_first() else {
            return ShellCommand::Empty;
        };

        match (verb, args) {
            ("help" | "?" | "h", _) => ShellCommand::Help,
            ("quit" | "exit", _) => ShellCommand::Quit,
            ("login", [email, password]) => ShellCommand::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            ("login", _) => ShellCommand::Usage("login email password"),
            ("logout", _) => ShellCommand::Logout,
            ("ls", _) => {
                let recursive = args.first() == Some(&"-R");
                let rest = if recursive { &args[1..] } else { args };
                match rest {
                    [] => ShellCommand::Ls {
                        recursive,
                        path: None,
                    },
                    [path] => ShellCommand::Ls {
                        recursive,
                        path: Some(path.to_string()),
                    },
                    _ => ShellCommand::Usage("ls [-R] [path]"),
                }
            }
            ("cd", []) => ShellCommand::Cd(None),
            ("cd", [path]) => ShellCommand::Cd(Some(path.to_string())),
            ("cd", _) => ShellCommand::Usage("cd [path]"),
            ("get", [path]) => ShellCommand::Get(path.to_string()),
            ("get", _) => ShellCommand::Usage("get remotefile"),
            ("put", [path]) => ShellCommand::Put(path.to_string()),
            ("put", _) => ShellCommand::Usage("put localfile"),
            ("whoami", _) => ShellCommand::Whoami,
            ("pwd", _) => ShellCommand::Pwd,
            ("lcd", [path]) => ShellCommand::Lcd(path.to_string()),
            ("lcd", _) => ShellCommand::Usage("lcd path"),
            ("lls", []) => ShellCommand::Lls(None),
            ("lls", [path]) => ShellCommand::Lls(Some(path.to_string())),
            ("lls", _) => ShellCommand::Usage("lls [path]"),
            (verb, _) if PLACEHOLDERS.contains(&verb) => {
                ShellCommand::NotImplemented(verb.to_string())
            }
            (verb, _) => ShellCommand::Invalid(verb.to_string()),
        }
    }

    /// Whether the line is worth keeping in the history file.
    pub fn is_recordable(&self) -> bool {
        !matches!(
            self,
            ShellCommand::Empty | ShellCommand::Invalid(_) | ShellCommand::Login { .. }
        )
    }
}

/// What the read loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Shell {
    client: SessionClient,
    local_dir: PathBuf,
}

impl Shell {
    pub fn new(client: SessionClient) -> Self {
        let local_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_local_dir(client, local_dir)
    }

    pub fn with_local_dir(client: SessionClient, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            local_dir: local_dir.into(),
        }
    }

    pub fn client(&self) -> &SessionClient {
        &self.client
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn prompt(&self) -> String {
        match self.client.email() {
            Some(email) => format!("{}:{}> ", email, self.client.tree().current_path()),
            None => "megashell> ".to_string(),
        }
    }

    /// Run one input line. Failures are written to `out`; only a failing
    /// sink is returned as an error.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> std::io::Result<Flow> {
        let command = ShellCommand::parse(line);
        match self.dispatch(command, out) {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(out, "{}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch(&mut self, command: ShellCommand, out: &mut dyn Write) -> Result<Flow> {
        match command {
            ShellCommand::Empty => {}
            ShellCommand::Help => writeln!(out, "{}", HELP)?,
            ShellCommand::Quit => return Ok(Flow::Quit),
            ShellCommand::Login { email, password } => {
                self.client.login(&email, &password, report)?;
                writeln!(out, "logging in as {}...", email)?;
            }
            ShellCommand::Logout => {
                if self.client.logout() {
                    writeln!(out, "logged out")?;
                } else {
                    writeln!(out, "not logged in")?;
                }
            }
            ShellCommand::Ls { recursive, path } => self.ls(recursive, path.as_deref(), out)?,
            ShellCommand::Cd(path) => {
                let folder = self.client.resolve(path.as_deref().unwrap_or("/"))?;
                self.client.set_current_folder(&folder)?;
            }
            ShellCommand::Get(path) => {
                let node = self.client.resolve(&path)?;
                if !node.is_file() {
                    return Err(MegaError::Custom(format!("{}: not a file", path)));
                }
                let dest = self.local_dir.join(&node.name);
                let ticket = self
                    .client
                    .enqueue_command(Command::download(node, dest, report))?;
                writeln!(out, "queued download #{}", ticket.id())?;
            }
            ShellCommand::Put(path) => {
                if !self.client.is_authenticated() {
                    return Err(MegaError::Authentication("not logged in".to_string()));
                }
                let parent = self
                    .client
                    .current_folder()
                    .ok_or_else(|| MegaError::NotFound("remote tree not loaded".to_string()))?;
                let source = self.local_dir.join(&path);
                let ticket = self
                    .client
                    .enqueue_command(Command::upload(source, parent, report))?;
                writeln!(out, "queued upload #{}", ticket.id())?;
            }
            ShellCommand::Whoami => match self.client.email() {
                Some(email) => {
                    writeln!(out, "{}", email)?;
                    let flags = AccountFlags {
                        storage: true,
                        sessions: true,
                        ..AccountFlags::default()
                    };
                    self.client.account_details(flags, report)?;
                }
                None => writeln!(out, "not logged in")?,
            },
            ShellCommand::Pwd => writeln!(out, "{}", self.local_dir.display())?,
            ShellCommand::Lcd(path) => {
                let target = self.local_dir.join(path);
                if !target.is_dir() {
                    return Err(MegaError::NotADirectory(target.display().to_string()));
                }
                self.local_dir = target.canonicalize()?;
            }
            ShellCommand::Lls(path) => {
                let dir = match path {
                    Some(p) => self.local_dir.join(p),
                    None => self.local_dir.clone(),
                };
                let mut entries: Vec<(String, bool, u64)> = std::fs::read_dir(&dir)?
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let meta = e.metadata().ok()?;
                        Some((
                            e.file_name().to_string_lossy().into_owned(),
                            meta.is_dir(),
                            meta.len(),
                        ))
                    })
                    .collect();
                entries.sort();
                for (name, is_dir, size) in entries {
                    if is_dir {
                        writeln!(out, "{}/", name)?;
                    } else {
                        writeln!(out, "{} {}", name, format_size(size))?;
                    }
                }
            }
            ShellCommand::NotImplemented(verb) => return Err(MegaError::NotImplemented(verb)),
            ShellCommand::Usage(usage) => writeln!(out, "usage: {}", usage)?,
            ShellCommand::Invalid(verb) => writeln!(out, "invalid command: {}", verb)?,
        }
        Ok(Flow::Continue)
    }

    fn ls(&self, recursive: bool, path: Option<&str>, out: &mut dyn Write) -> Result<()> {
        let node = self.client.resolve(path.unwrap_or(""))?;
        if node.is_file() {
            writeln!(out, "{}", entry_line(&node, 0))?;
            return Ok(());
        }
        if recursive {
            let snapshot = self.client.tree().snapshot();
            let folder = snapshot
                .get(&node.handle)
                .ok_or_else(|| MegaError::NotFound(node.name.clone()))?;
            for (depth, child) in snapshot.descendants(folder) {
                writeln!(out, "{}", entry_line(child, depth - 1))?;
            }
        } else {
            for child in self.client.children(&node)? {
                writeln!(out, "{}", entry_line(&child, 0))?;
            }
        }
        Ok(())
    }
}

fn entry_line(node: &Node, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    if node.is_file() {
        format!("{}{} {}", indent, node.name, format_size(node.size))
    } else {
        format!("{}{}/", indent, node.name)
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1_048_576 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else if bytes < 1_073_741_824 {
        format!("{:.1}MB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{:.2}GB", bytes as f64 / 1_073_741_824.0)
    }
}

/// Callback for shell-issued commands.
fn report(result: Result<CommandOutput>) {
    match result {
        Ok(CommandOutput::LoggedIn { email, nodes }) => match nodes {
            Some(n) => info!("logged in as {} ({} nodes)", email, n),
            None => warn!("logged in as {}, but the remote tree could not be fetched", email),
        },
        Ok(CommandOutput::Refreshed { nodes }) => info!("tree refreshed ({} nodes)", nodes),
        Ok(CommandOutput::Account(details)) => {
            if let Some(quota) = details.storage {
                info!(
                    "{}: {} of {} used ({:.1}%)",
                    details.email,
                    format_size(quota.used),
                    format_size(quota.total),
                    quota.usage_percent()
                );
            }
            if let Some(sessions) = details.sessions {
                info!("{} active session(s)", sessions.len());
            }
        }
        Ok(CommandOutput::Downloaded { node, path, bytes }) => info!(
            "downloaded {} ({}) to {}",
            node.name,
            format_size(bytes),
            path.display()
        ),
        Ok(CommandOutput::Uploaded { node, bytes }) => {
            info!("uploaded {} ({})", node.name, format_size(bytes))
        }
        Err(e) => warn!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryTransport;
    use crate::config::ClientConfig;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    const EMAIL: &str = "user@example.com";

    fn run(shell: &mut Shell, line: &str) -> (Flow, String) {
        let mut out = Vec::new();
        let flow = shell.execute(line, &mut out).unwrap();
        (flow, String::from_utf8(out).unwrap())
    }

    async fn logged_in_shell(local: &Path) -> (Shell, Arc<MemoryTransport>) {
        let transport = MemoryTransport::new();
        let root = transport.add_account(EMAIL, "pw");
        let docs = transport.add_folder(EMAIL, &root, "docs").unwrap();
        transport.add_file(EMAIL, &docs, "a.txt", &[1u8; 100]).unwrap();
        let sub = transport.add_folder(EMAIL, &docs, "sub").unwrap();
        transport.add_file(EMAIL, &sub, "b.txt", &[2u8; 2048]).unwrap();
        let transport = Arc::new(transport);

        let client = SessionClient::new(ClientConfig::new("app"), transport.clone());
        let (tx, rx) = oneshot::channel();
        client
            .login(EMAIL, "pw", move |res| {
                let _ = tx.send(res.is_ok());
            })
            .unwrap();
        assert!(rx.await.unwrap());
        (Shell::with_local_dir(client, local), transport)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ShellCommand::parse(""), ShellCommand::Empty);
        assert_eq!(ShellCommand::parse("   "), ShellCommand::Empty);
        assert_eq!(ShellCommand::parse("?"), ShellCommand::Help);
        assert_eq!(ShellCommand::parse("quit"), ShellCommand::Quit);
        assert_eq!(
            ShellCommand::parse("login a@b pw"),
            ShellCommand::Login {
                email: "a@b".into(),
                password: "pw".into()
            }
        );
        assert!(matches!(ShellCommand::parse("login a@b"), ShellCommand::Usage(_)));
        assert_eq!(
            ShellCommand::parse("ls -R /docs"),
            ShellCommand::Ls {
                recursive: true,
                path: Some("/docs".into())
            }
        );
        assert_eq!(
            ShellCommand::parse("ls"),
            ShellCommand::Ls {
                recursive: false,
                path: None
            }
        );
        assert_eq!(ShellCommand::parse("get  a.txt"), ShellCommand::Get("a.txt".into()));
        assert_eq!(
            ShellCommand::parse("mkdir x"),
            ShellCommand::NotImplemented("mkdir".into())
        );
        assert_eq!(
            ShellCommand::parse("frobnicate"),
            ShellCommand::Invalid("frobnicate".into())
        );
    }

    #[test]
    fn test_history_skips_passwords() {
        assert!(!ShellCommand::parse("login a b").is_recordable());
        assert!(!ShellCommand::parse("").is_recordable());
        assert!(ShellCommand::parse("ls").is_recordable());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(100), "100B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(5 * 1_048_576), "5.0MB");
    }

    #[tokio::test]
    async fn test_unauthenticated_shell_reports_errors() {
        let client =
            SessionClient::new(ClientConfig::new("app"), Arc::new(MemoryTransport::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut shell = Shell::with_local_dir(client, dir.path());

        let (flow, out) = run(&mut shell, "put empty.bin");
        assert_eq!(flow, Flow::Continue);
        assert!(out.starts_with("Authentication error"), "{}", out);

        let (_, out) = run(&mut shell, "whoami");
        assert_eq!(out, "not logged in\n");
        let (_, out) = run(&mut shell, "mount");
        assert_eq!(out, "mount not implemented\n");
        let (_, out) = run(&mut shell, "bogus");
        assert_eq!(out, "invalid command: bogus\n");
        let (_, out) = run(&mut shell, "ls /");
        assert!(out.starts_with("Not found"), "{}", out);
        assert_eq!(shell.prompt(), "megashell> ");

        let (flow, _) = run(&mut shell, "quit");
        assert_eq!(flow, Flow::Quit);
    }

    #[tokio::test]
    async fn test_ls_and_cd() {
        let dir = tempfile::tempdir().unwrap();
        let (mut shell, _) = logged_in_shell(dir.path()).await;

        let (_, out) = run(&mut shell, "ls");
        assert_eq!(out, "docs/\n");
        let (_, out) = run(&mut shell, "ls -R");
        assert_eq!(out, "docs/\n  a.txt 100B\n  sub/\n    b.txt 2.0KB\n");

        run(&mut shell, "cd docs/sub");
        assert_eq!(shell.prompt(), format!("{}:/docs/sub> ", EMAIL));
        let (_, out) = run(&mut shell, "ls ../a.txt");
        assert_eq!(out, "a.txt 100B\n");
        let (_, out) = run(&mut shell, "cd b.txt");
        assert!(out.starts_with("Not a directory"), "{}", out);
        run(&mut shell, "cd");
        assert_eq!(shell.client().tree().current_path(), "/");
    }

    #[tokio::test]
    async fn test_get_and_put_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut shell, transport) = logged_in_shell(dir.path()).await;

        let (_, out) = run(&mut shell, "get /docs/a.txt");
        assert!(out.starts_with("queued download"), "{}", out);

        std::fs::write(dir.path().join("up.txt"), b"fresh").unwrap();
        run(&mut shell, "cd /docs");
        let (_, out) = run(&mut shell, "put up.txt");
        assert!(out.starts_with("queued upload"), "{}", out);

        shell.client().shutdown().await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), vec![1u8; 100]);
        let uploaded = shell.client().resolve("/docs/up.txt").unwrap();
        assert_eq!(transport.contents(EMAIL, &uploaded.handle).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_local_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::fs::write(dir.path().join("f.bin"), [0u8; 10]).unwrap();
        let client =
            SessionClient::new(ClientConfig::new("app"), Arc::new(MemoryTransport::new()));
        let mut shell = Shell::with_local_dir(client, dir.path());

        let (_, out) = run(&mut shell, "lls");
        assert_eq!(out, "f.bin 10B\ninner/\n");
        run(&mut shell, "lcd inner");
        assert!(shell.local_dir().ends_with("inner"));
        let (_, out) = run(&mut shell, "lcd nowhere");
        assert!(out.starts_with("Not a directory"), "{}", out);
        let (_, out) = run(&mut shell, "pwd");
        assert!(out.trim_end().ends_with("inner"));
    }
}
