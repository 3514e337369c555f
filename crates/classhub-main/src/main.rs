use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod animate_cmd;
mod chat_cmd;
mod config;
mod config_cmd;
mod home;
mod logging;

use animate_cmd::AnimateArgs;
use chat_cmd::ChatArgs;

#[derive(Parser, Debug)]
#[command(name = "classhub", version, about = "24数媒1班 AI assistant and Veo animator")]
struct Cli {
    #[arg(long, global = true)]
    conf_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: RootCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum RootCommand {
    /// Talk to the course teaching assistant.
    Chat(ChatArgs),
    /// Turn a still image into a short video.
    Animate(AnimateArgs),
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand, Debug, Clone)]
enum ConfigSubcommand {
    /// Create the conf dir and a sample classhub.toml.
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        RootCommand::Config(args) => match args.command {
            ConfigSubcommand::Init => config_cmd::run_config_init(cli.conf_dir),
        },
        RootCommand::Chat(args) => run_with_config(cli.conf_dir, |config| async move {
            chat_cmd::run_chat(args, &config).await
        })
        .await,
        RootCommand::Animate(args) => run_with_config(cli.conf_dir, |config| async move {
            animate_cmd::run_animate(args, &config).await
        })
        .await,
    };

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run_with_config<F, Fut>(conf_dir: Option<PathBuf>, command: F) -> Result<(), String>
where
    F: FnOnce(config::RuntimeConfig) -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let home = home::resolve_classhub_home_dir(conf_dir.as_deref());
    let runtime_config = config::load_runtime_config(&home).map_err(|error| error.to_string())?;
    logging::init_tracing(&runtime_config.log);
    command(runtime_config).await
}
