use std::io::{self, BufRead, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sphinx_host_store::{Host, HostConfig, InProcessTransport};
use sphinx_sdk::{Client, MasterPassword, PasswordHashingMode};

/// A demo of the SDK against an in-process host.
///
/// The master password is read from the first line of stdin; for `write`,
/// the rest of stdin is the payload.
#[derive(Parser)]
struct Args {
    /// Directory for the host's long-term key and records.
    #[arg(long, default_value = "sphinx-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a record and print the generated password.
    Create {
        user: String,
        host: String,
        /// Character classes to draw from: u, l, d, s.
        #[arg(long, default_value = "ulsd")]
        classes: String,
        #[arg(long, default_value_t = 20)]
        length: u32,
    },
    /// Print the current password for (user, host).
    Get { user: String, host: String },
    /// Stage a fresh password and print it.
    Change { user: String, host: String },
    /// Promote the staged password and print it.
    Commit { user: String, host: String },
    /// Discard the staged password and print the one still in effect.
    Undo { user: String, host: String },
    /// Delete the record for (user, host).
    Delete { user: String, host: String },
    /// Store a blob at (user, host), read from stdin.
    Write { user: String, host: String },
    /// Print the blob stored at (user, host).
    Read { user: String, host: String },
    /// List the usernames registered at a host.
    List { host: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let host = Host::open(&HostConfig {
        data_dir: args.data_dir,
    })
    .expect("failed to open host data directory");
    let client = Client::new(
        InProcessTransport::new(host),
        PasswordHashingMode::Standard2019,
    );

    let mut stdin = io::stdin().lock();
    let mut password = String::new();
    stdin
        .read_line(&mut password)
        .expect("failed to read master password from stdin");
    let password = MasterPassword::from(password.trim_end_matches('\n'));

    let code = match args.command {
        Command::Create {
            user,
            host,
            classes,
            length,
        } => print_password(
            client
                .create(&password, &user, &host, &classes, length)
                .await
                .expect("create failed"),
            "a record already exists there",
        ),
        Command::Get { user, host } => print_password(
            client.get(&password, &user, &host).await.expect("get failed"),
            "no such record",
        ),
        Command::Change { user, host } => print_password(
            client
                .change(&password, &user, &host)
                .await
                .expect("change failed"),
            "no such record, or a change is already staged",
        ),
        Command::Commit { user, host } => print_password(
            client
                .commit(&password, &user, &host)
                .await
                .expect("commit failed"),
            "nothing staged to commit",
        ),
        Command::Undo { user, host } => print_password(
            client.undo(&password, &user, &host).await.expect("undo failed"),
            "nothing staged to undo",
        ),
        Command::Delete { user, host } => {
            if client
                .delete(&password, &user, &host)
                .await
                .expect("delete failed")
            {
                eprintln!("deleted");
                ExitCode::SUCCESS
            } else {
                eprintln!("no such record");
                ExitCode::FAILURE
            }
        }
        Command::Write { user, host } => {
            let mut payload = Vec::new();
            stdin
                .read_to_end(&mut payload)
                .expect("failed to read payload from stdin");
            if client
                .write(&password, &user, &host, &payload)
                .await
                .expect("write failed")
            {
                ExitCode::SUCCESS
            } else {
                eprintln!("a record exists there that this password cannot open");
                ExitCode::FAILURE
            }
        }
        Command::Read { user, host } => {
            match client.read(&password, &user, &host).await.expect("read failed") {
                Some(payload) => {
                    io::Write::write_all(&mut io::stdout(), &payload).expect("write to stdout");
                    ExitCode::SUCCESS
                }
                None => {
                    eprintln!("no such record");
                    ExitCode::FAILURE
                }
            }
        }
        Command::List { host } => match client.list(&password, &host).await.expect("list failed") {
            Some(users) => {
                println!("{users}");
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("no users registered there");
                ExitCode::FAILURE
            }
        },
    };
    code
}

fn print_password(result: Option<String>, none_message: &str) -> ExitCode {
    match result {
        Some(password) => {
            println!("{password}");
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("{none_message}");
            ExitCode::FAILURE
        }
    }
}
