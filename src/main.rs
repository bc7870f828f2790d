use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use volsync::progress::{ConsoleProgress, LogSink};
use volsync::{
    Commit, Config, ProcessRunner, ProgressSink, Properties, ProviderRegistry, RemoteServer,
    SyncEngine, SyncRequest, TagFilter, TokioRunner, Volume,
};

#[derive(Parser, Debug)]
#[command(name = "volsync")]
#[command(about = "Push and pull data volumes to ssh and directory remotes", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// No progress output on stdout; phases are logged instead
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Remotes file (default: <config dir>/volsync/remotes.toml)
    #[arg(long, global = true, env = "VOLSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RemoteArgs {
    /// Remote name from the remotes file, or a URI such as ssh://user@host/path
    remote: String,

    /// Operation parameter passed to the provider
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// SSH password
    #[arg(long, env = "VOLSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push volumes as a new commit
    Push {
        #[command(flatten)]
        target: RemoteArgs,

        commit: String,

        /// Volume to push
        #[arg(long = "volume", value_name = "NAME=PATH", required = true)]
        volumes: Vec<String>,

        /// Tag the commit (KEY or KEY=VALUE)
        #[arg(short, long = "tag")]
        tags: Vec<TagFilter>,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Pull the volumes of a commit
    Pull {
        #[command(flatten)]
        target: RemoteArgs,

        commit: String,

        /// Volume to pull into
        #[arg(long = "volume", value_name = "NAME=PATH", required = true)]
        volumes: Vec<String>,
    },

    /// List commits, newest first
    Log {
        #[command(flatten)]
        target: RemoteArgs,

        /// Only commits carrying this tag (KEY or KEY=VALUE)
        #[arg(short, long = "tag")]
        tags: Vec<TagFilter>,
    },

    /// Print the metadata of one commit
    Show {
        #[command(flatten)]
        target: RemoteArgs,

        commit: String,
    },

    /// Add or replace tags on an existing commit
    Tag {
        #[command(flatten)]
        target: RemoteArgs,

        commit: String,

        #[arg(short, long = "tag", required = true)]
        tags: Vec<TagFilter>,
    },

    /// List remotes in the remotes file
    Remotes,
}

/// Provider plus validated remote and parameters
struct Target {
    server: Arc<dyn RemoteServer>,
    remote: Properties,
    parameters: Properties,
}

impl Target {
    fn resolve(registry: &ProviderRegistry, config: &Config, args: &RemoteArgs) -> Result<Self> {
        let (server, remote, mut parameters) = if args.remote.contains("://") {
            let server = registry.for_uri(&args.remote)?;
            let remote = server.parse_uri(&args.remote)?;
            (server, remote, Properties::new())
        } else {
            let entry = config.remote(&args.remote)?;
            let server = registry
                .get(&entry.provider)
                .with_context(|| format!("remote '{}'", args.remote))?;
            (server, entry.properties.clone(), entry.parameters.clone())
        };

        for param in &args.params {
            let (key, value) = param
                .split_once('=')
                .with_context(|| format!("parameter '{}' is not KEY=VALUE", param))?;
            parameters.insert(key.to_string(), Value::String(value.to_string()));
        }
        if let Some(ref password) = args.password {
            parameters.insert("password".to_string(), Value::String(password.clone()));
        }

        Ok(Self {
            remote: server.validate_remote(&remote)?,
            parameters: server.validate_parameters(&parameters)?,
            server,
        })
    }

    fn request(&self, commit: &str) -> SyncRequest {
        SyncRequest::new(commit, self.remote.clone()).parameters(self.parameters.clone())
    }
}

fn parse_volume(spec: &str) -> Result<Volume> {
    let Some((name, path)) = spec.split_once('=') else {
        bail!("volume '{}' is not NAME=PATH", spec);
    };
    if name.is_empty() || path.is_empty() {
        bail!("volume '{}' is not NAME=PATH", spec);
    }
    Ok(Volume::new(name, format!("volume {}", name), path))
}

fn parse_volumes(specs: &[String]) -> Result<Vec<Volume>> {
    specs.iter().map(|s| parse_volume(s)).collect()
}

fn tags_object(tags: &[TagFilter]) -> Properties {
    tags.iter()
        .map(|t| {
            (
                t.key.clone(),
                Value::String(t.value.clone().unwrap_or_default()),
            )
        })
        .collect()
}

fn print_commit(commit: &Commit) {
    println!("{} {}", "commit".yellow(), commit.id.yellow());
    if let Some(ts) = commit.timestamp() {
        println!("Date:   {}", ts.to_rfc2822());
    }
    if let Some(tags) = commit.tags() {
        let rendered: Vec<String> = tags
            .iter()
            .map(|(k, v)| match v.as_str() {
                Some("") | None => k.clone(),
                Some(v) => format!("{}={}", k, v),
            })
            .collect();
        if !rendered.is_empty() {
            println!("Tags:   {}", rendered.join(", "));
        }
    }
    if let Some(message) = commit.properties.get("message").and_then(Value::as_str) {
        println!();
        for line in message.lines() {
            println!("    {}", line);
        }
    }
    println!();
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match cli.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioRunner::new());
    let registry = ProviderRegistry::with_defaults(runner);
    let progress: Arc<dyn ProgressSink> = if cli.quiet {
        Arc::new(LogSink)
    } else if std::io::stdout().is_terminal() {
        Arc::new(ConsoleProgress::new())
    } else {
        Arc::new(ConsoleProgress::quiet())
    };

    match cli.command {
        Command::Push {
            target,
            commit,
            volumes,
            tags,
            message,
        } => {
            let target = Target::resolve(&registry, &config, &target)?;
            let mut metadata = Properties::new();
            if !tags.is_empty() {
                metadata.insert("tags".to_string(), Value::Object(tags_object(&tags)));
            }
            if let Some(message) = message {
                metadata.insert("message".to_string(), Value::String(message));
            }

            let request = target
                .request(&commit)
                .volumes(parse_volumes(&volumes)?)
                .metadata(metadata)
                .progress(progress);
            let stats = SyncEngine::new(Arc::clone(&target.server))
                .push(request)
                .await
                .with_context(|| format!("push of '{}' failed", commit))?;
            println!(
                "{} pushed {} ({} volumes in {:.1}s)",
                "✓".green(),
                commit,
                stats.volumes,
                stats.duration.as_secs_f64()
            );
        }

        Command::Pull {
            target,
            commit,
            volumes,
        } => {
            let target = Target::resolve(&registry, &config, &target)?;
            let found = target
                .server
                .get_commit(&target.remote, &target.parameters, &commit)
                .await?;
            if found.is_none() {
                bail!("no commit '{}' on remote", commit);
            }

            let request = target
                .request(&commit)
                .volumes(parse_volumes(&volumes)?)
                .progress(progress);
            let stats = SyncEngine::new(Arc::clone(&target.server))
                .pull(request)
                .await
                .with_context(|| format!("pull of '{}' failed", commit))?;
            println!(
                "{} pulled {} ({} volumes in {:.1}s)",
                "✓".green(),
                commit,
                stats.volumes,
                stats.duration.as_secs_f64()
            );
        }

        Command::Log { target, tags } => {
            let target = Target::resolve(&registry, &config, &target)?;
            let commits = target
                .server
                .list_commits(&target.remote, &target.parameters, &tags)
                .await
                .context("failed to list commits")?;
            for commit in &commits {
                print_commit(commit);
            }
        }

        Command::Show { target, commit } => {
            let target = Target::resolve(&registry, &config, &target)?;
            let Some(found) = target
                .server
                .get_commit(&target.remote, &target.parameters, &commit)
                .await?
            else {
                bail!("no commit '{}' on remote", commit);
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Object(found.properties))?
            );
        }

        Command::Tag {
            target,
            commit,
            tags,
        } => {
            let target = Target::resolve(&registry, &config, &target)?;
            let Some(found) = target
                .server
                .get_commit(&target.remote, &target.parameters, &commit)
                .await?
            else {
                bail!("no commit '{}' on remote", commit);
            };

            let mut metadata = found.properties;
            let mut merged = metadata
                .get("tags")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            merged.extend(tags_object(&tags));
            metadata.insert("tags".to_string(), Value::Object(merged));

            SyncEngine::new(Arc::clone(&target.server))
                .update_metadata(target.request(&commit).metadata(metadata))
                .await
                .with_context(|| format!("failed to tag '{}'", commit))?;
            println!("{} tagged {}", "✓".green(), commit);
        }

        Command::Remotes => {
            for (name, entry) in &config.remotes {
                println!("{}\t{}", name.bold(), entry.provider);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume() {
        let volume = parse_volume("pgdata=/var/lib/postgres").unwrap();
        assert_eq!(volume.name, "pgdata");
        assert_eq!(volume.path, PathBuf::from("/var/lib/postgres"));
        assert!(parse_volume("pgdata").is_err());
        assert!(parse_volume("=/x").is_err());
    }

    #[test]
    fn test_tags_object() {
        let tags: Vec<TagFilter> = vec!["env=prod".parse().unwrap(), "golden".parse().unwrap()];
        let obj = tags_object(&tags);
        assert_eq!(obj["env"], Value::String("prod".into()));
        assert_eq!(obj["golden"], Value::String(String::new()));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "volsync", "push", "origin", "c1", "--volume", "v=/data", "-t", "env=prod",
        ])
        .unwrap();
        match cli.command {
            Command::Push { tags, volumes, .. } => {
                assert_eq!(volumes, vec!["v=/data"]);
                assert_eq!(tags, vec![TagFilter::equals("env", "prod")]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
