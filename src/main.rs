use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use clap::{Parser, Subcommand};
use zeroize::Zeroizing;

use reminder_vault::alarm::LogAlertDelivery;
use reminder_vault::config::Config;
use reminder_vault::error::{ReminderVaultError, Result};
use reminder_vault::reminders::ReminderStore;
use reminder_vault::security::KeySession;
use reminder_vault::Vault;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("REMINDER_VAULT_GIT_SHA"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "reminder-vault")]
#[command(version = VERSION)]
#[command(about = "Encrypted local reminders with alarms")]
struct Cli {
    /// SQLite file; overrides the config file.
    #[arg(long, global = true)]
    db: Option<String>,

    #[arg(long, global = true, default_value_os_t = reminder_vault::runtime_paths::default_config_path())]
    config: std::path::PathBuf,

    /// Read from the terminal when absent.
    #[arg(long, global = true, env = "REMINDER_VAULT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Add a reminder, e.g. `add "take medication" "8:00 AM"`.
    Add { task: String, when: String },
    List {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    Edit {
        id: i32,
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        when: Option<String>,
    },
    /// Mark done by id, or every open reminder whose text matches.
    Complete {
        #[arg(required_unless_present = "matching")]
        id: Option<i32>,
        #[arg(long, conflicts_with = "id")]
        matching: Option<String>,
    },
    Delete {
        #[arg(required_unless_present = "matching")]
        id: Option<i32>,
        #[arg(long, conflicts_with = "id")]
        matching: Option<String>,
    },
    /// Delete every reminder.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    Snooze {
        id: i32,
        #[arg(long, default_value_t = 10)]
        minutes: i64,
    },
    /// Count open, unfired reminders without unlocking.
    Pending,
    /// Unlock and deliver alarms to this terminal until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() {
    reminder_vault::logging::init_tracing("reminder_vault_cli");
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        if err.is_authentication_failure() {
            eprintln!("the vault stays locked; check the passphrase and try again");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    config.validate()?;

    if let CliCommand::Pending = cli.command {
        let store =
            ReminderStore::open(config.resolved_db_path(), Arc::new(KeySession::new())).await?;
        println!("{}", store.count_pending().await?);
        return Ok(());
    }

    let vault = Vault::open(config, Arc::new(LogAlertDelivery)).await?;
    let passphrase = match cli.passphrase {
        Some(value) => Zeroizing::new(value),
        None if vault.is_initialized().await? => read_passphrase("Passphrase: ")?,
        None => {
            eprintln!("No passphrase set yet; choose one for this database.");
            let first = read_passphrase("New passphrase: ")?;
            let second = read_passphrase("Repeat passphrase: ")?;
            confirmed_passphrase(first, second)?
        }
    };

    if let CliCommand::Watch = cli.command {
        vault.unlock(&passphrase).await?;
        drop(passphrase);
        println!(
            "Watching {} pending reminder(s). Press Ctrl-C to stop.",
            vault.service().pending_count().await?
        );
        tokio::signal::ctrl_c().await?;
        vault.lock().await;
        return Ok(());
    }

    vault.unlock_session(&passphrase).await?;
    drop(passphrase);
    let result = run_command(&vault, cli.command).await;
    vault.lock().await;
    result
}

async fn run_command(vault: &Vault, command: CliCommand) -> Result<()> {
    let service = vault.service();
    match command {
        CliCommand::Add { task, when } => {
            let (id, due_at) = service.create_reminder(&task, &when).await?;
            println!(
                "Added #{id} for {}",
                due_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            );
        }
        CliCommand::List { all, json } => {
            let reminders = service.list_reminders(all).await?;
            if json {
                let out = serde_json::to_string_pretty(&reminders)
                    .map_err(|e| ReminderVaultError::Runtime(e.to_string()))?;
                println!("{out}");
            } else if reminders.is_empty() {
                println!("No reminders.");
            } else {
                for item in &reminders {
                    let marker = if item.completed {
                        "x"
                    } else if item.fired {
                        "!"
                    } else {
                        " "
                    };
                    println!(
                        "[{marker}] #{:<4} {}  {}",
                        item.id,
                        item.due_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                        item.task
                    );
                }
            }
        }
        CliCommand::Edit { id, task, when } => {
            service
                .edit_reminder(id, task.as_deref(), when.as_deref())
                .await?;
            println!("Updated #{id}");
        }
        CliCommand::Complete { id, matching } => {
            let ids = match (id, matching) {
                (Some(id), _) => {
                    service.complete_reminder(id).await?;
                    vec![id]
                }
                (None, Some(text)) => service.complete_matching(&text).await?,
                (None, None) => Vec::new(),
            };
            println!("Completed {} reminder(s)", ids.len());
        }
        CliCommand::Delete { id, matching } => {
            let ids = match (id, matching) {
                (Some(id), _) => {
                    service.delete_reminder(id).await?;
                    vec![id]
                }
                (None, Some(text)) => service.delete_matching(&text).await?,
                (None, None) => Vec::new(),
            };
            println!("Deleted {} reminder(s)", ids.len());
        }
        CliCommand::Clear { yes } => {
            if !yes && !confirm("Delete every reminder?")? {
                println!("Nothing deleted.");
                return Ok(());
            }
            let count = service.clear_all().await?;
            println!("Deleted {count} reminder(s)");
        }
        CliCommand::Snooze { id, minutes } => {
            let due_at = service.snooze_reminder(id, minutes).await?;
            println!(
                "Snoozed #{id} until {}",
                due_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            );
        }
        CliCommand::Pending | CliCommand::Watch => {}
    }
    Ok(())
}

fn read_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    let echo = EchoGuard::disable();
    std::io::stdin().read_line(&mut line)?;
    if echo.is_some() {
        eprintln!();
    }
    drop(echo);
    Ok(Zeroizing::new(
        line.trim_end_matches(['\r', '\n']).to_string(),
    ))
}

fn confirmed_passphrase(
    first: Zeroizing<String>,
    second: Zeroizing<String>,
) -> Result<Zeroizing<String>> {
    if first.as_str() != second.as_str() {
        return Err(ReminderVaultError::Validation(
            "passphrases do not match".to_string(),
        ));
    }
    Ok(first)
}

/// Turns terminal echo off for stdin and restores it on drop.
#[cfg(unix)]
struct EchoGuard {
    fd: std::os::unix::io::RawFd,
    original: termios::Termios,
}

#[cfg(unix)]
impl EchoGuard {
    fn disable() -> Option<Self> {
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        let original = termios::Termios::from_fd(fd).ok()?;
        let mut quiet = original;
        quiet.c_lflag &= !termios::ECHO;
        termios::tcsetattr(fd, termios::TCSANOW, &quiet).ok()?;
        Some(Self { fd, original })
    }
}

#[cfg(unix)]
impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(self.fd, termios::TCSANOW, &self.original);
    }
}

// No echo control here; input is read as typed.
#[cfg(not(unix))]
struct EchoGuard;

#[cfg(not(unix))]
impl EchoGuard {
    fn disable() -> Option<Self> {
        None
    }
}

fn confirm(question: &str) -> Result<bool> {
    eprint!("{question} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_passphrase_must_be_typed_twice_the_same() {
        let accepted = confirmed_passphrase(
            Zeroizing::new("correct horse".to_string()),
            Zeroizing::new("correct horse".to_string()),
        )
        .unwrap();
        assert_eq!(accepted.as_str(), "correct horse");

        assert!(matches!(
            confirmed_passphrase(
                Zeroizing::new("correct horse".to_string()),
                Zeroizing::new("correct hose".to_string()),
            ),
            Err(ReminderVaultError::Validation(_))
        ));
    }

    #[test]
    fn passphrase_flag_reads_from_the_command_line() {
        let cli = Cli::try_parse_from(["reminder-vault", "--passphrase", "pw", "pending"]).unwrap();
        assert_eq!(cli.passphrase.as_deref(), Some("pw"));
        assert!(matches!(cli.command, CliCommand::Pending));
    }
}
