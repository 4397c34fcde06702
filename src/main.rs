use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gmail-agent", version, about = "Chat-driven Gmail assistant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage Gmail authorization
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// List emails matching a Gmail query
    List(ListArgs),
    /// Read one email by ID
    Read(ReadArgs),
    /// Draft a reply to an email without sending it
    Draft(DraftArgs),
    /// Send a reply to an email
    Reply(ReplyArgs),
    /// Interactive chat with the assistant
    Chat(ChatArgs),
    /// Run the JSON-RPC server over stdio
    Serve,
}

#[derive(Debug, Subcommand)]
enum AuthCommands {
    /// Run the OAuth consent flow
    Login {
        /// Re-authorize even when a valid credential exists
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show authorization state
    Status,
    /// Refresh the access token now
    Refresh,
    /// Revoke and delete the stored credential
    Revoke,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value = "is:unread")]
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct ReadArgs {
    id: String,
    /// Also draft a reply
    #[arg(long, default_value_t = false)]
    draft: bool,
    #[arg(long)]
    tone: Option<String>,
}

#[derive(Debug, Args)]
struct DraftArgs {
    id: String,
    #[arg(long)]
    tone: Option<String>,
}

#[derive(Debug, Args)]
struct ReplyArgs {
    id: String,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// Resume or name a session
    #[arg(long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::io::Write;

    use anyhow::{anyhow, Context, Result};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use uuid::Uuid;

    use gmail_agent::agent::session::Message;
    use gmail_agent::draft::Tone;
    use gmail_agent::output::{self, OutputFormat};
    use gmail_agent::{rpc, AgentService, Config};

    use super::{AuthCommands, Cli, Commands};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let format = OutputFormat::from_json_flag(cli.json);
        let service = open_service()?;
        match cli.command {
            Commands::Auth { command } => handle_auth(&service, command, format).await,
            Commands::List(args) => handle_list(&service, args, format).await,
            Commands::Read(args) => handle_read(&service, args, format).await,
            Commands::Draft(args) => handle_draft(&service, args, format).await,
            Commands::Reply(args) => handle_reply(&service, args, format).await,
            Commands::Chat(args) => handle_chat(&service, args, cli.json).await,
            Commands::Serve => rpc::run_stdio_server(service).await,
        }
    }

    fn open_service() -> Result<AgentService> {
        let config = Config::from_env().context("load gmail-agent configuration")?;
        AgentService::from_config(&config).context("initialize gmail-agent")
    }

    async fn handle_auth(
        service: &AgentService,
        command: AuthCommands,
        format: OutputFormat,
    ) -> Result<()> {
        let lifecycle = &service.lifecycle;
        let status = match command {
            AuthCommands::Login { force } => {
                let request = lifecycle.begin_auth(force).await?;
                eprintln!("Open this URL in a browser and grant access:\n");
                eprintln!("{}\n", request.url);
                eprint!("Paste the authorization code: ");
                std::io::stderr().flush().context("flush prompt")?;

                let code = read_line()
                    .await?
                    .ok_or_else(|| anyhow!("no authorization code entered"))?;
                lifecycle
                    .complete_auth(code.trim(), Some(request.state.as_str()))
                    .await?
            }
            AuthCommands::Status => lifecycle.status().await,
            AuthCommands::Refresh => lifecycle.refresh().await?,
            AuthCommands::Revoke => {
                lifecycle.revoke().await?;
                lifecycle.status().await
            }
        };

        println!("{}", output::format_auth_status(format, &status)?);
        Ok(())
    }

    async fn handle_list(
        service: &AgentService,
        args: super::ListArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let emails = service.gmail.list(&args.query, args.limit).await?;
        println!("{}", output::format_email_list(format, &emails)?);
        Ok(())
    }

    async fn handle_read(
        service: &AgentService,
        args: super::ReadArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let email = service.gmail.read(&args.id).await?;
        if !args.draft {
            println!("{}", output::format_email(format, &email)?);
            return Ok(());
        }

        let tone = parse_tone(args.tone.as_deref())?.unwrap_or_else(|| service.drafts.default_tone());
        let draft = service.drafts.generate(&email, tone).await?;
        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "email": email, "draft": draft }))?
            ),
            OutputFormat::Table => {
                println!("{}", output::format_email(format, &email)?);
                println!("{}", output::format_draft(format, &draft)?);
            }
        }
        Ok(())
    }

    async fn handle_draft(
        service: &AgentService,
        args: super::DraftArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let tone = parse_tone(args.tone.as_deref())?;
        let draft = service.draft(&args.id, tone).await?;
        println!("{}", output::format_draft(format, &draft)?);
        Ok(())
    }

    async fn handle_reply(
        service: &AgentService,
        args: super::ReplyArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let sent = service.gmail.reply(&args.id, &args.body).await?;
        println!("{}", output::format_sent_reply(format, &sent)?);
        Ok(())
    }

    async fn handle_chat(service: &AgentService, args: super::ChatArgs, json: bool) -> Result<()> {
        let session_id = args
            .session
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if !json {
            eprintln!("Session {session_id}. Type /reset to start over, /quit to exit.");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            if !json {
                eprint!("> ");
                std::io::stderr().flush().context("flush prompt")?;
            }
            let Some(line) = lines.next_line().await.context("read chat input")? else {
                break;
            };
            let text = line.trim();
            match text {
                "" => continue,
                "/quit" | "/exit" => break,
                "/reset" => {
                    match service.agent.reset(&session_id).await {
                        Ok(()) | Err(gmail_agent::AgentError::SessionNotFound(_)) => {}
                        Err(error) => return Err(error.into()),
                    }
                    eprintln!("Conversation cleared.");
                    continue;
                }
                _ => {}
            }

            match service.agent.handle_message(&session_id, text).await {
                Ok(reply) => print_reply(&session_id, &reply, json)?,
                // A failed turn keeps the session usable.
                Err(error) if json => println!(
                    "{}",
                    json!({ "session_id": session_id, "error": error.to_payload() })
                ),
                Err(error) => eprintln!("error: {error}"),
            }
        }
        Ok(())
    }

    fn print_reply(session_id: &str, reply: &Message, json: bool) -> Result<()> {
        if json {
            println!(
                "{}",
                serde_json::to_string(&json!({ "session_id": session_id, "reply": reply }))?
            );
        } else {
            println!("{}\n", reply.content);
        }
        Ok(())
    }

    fn parse_tone(raw: Option<&str>) -> Result<Option<Tone>> {
        raw.map(|value| value.parse::<Tone>().map_err(|error| anyhow!(error)))
            .transpose()
    }

    async fn read_line() -> Result<Option<String>> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        lines.next_line().await.context("read stdin")
    }
}
