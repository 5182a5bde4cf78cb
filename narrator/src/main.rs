use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use narrator::core::config::DEFAULT_CONFIG_PATH;
use narrator::{build_generator, load_config_or_default, LecturePipeline};

const SAMPLE_CONFIG: &str = r#"
[llm]
provider = "anthropic"
model = "claude-sonnet-4-5"
api_url = "https://api.anthropic.com/v1"
# api_key = "..."  (or set ANTHROPIC_API_KEY)

[generation]
target_words = 7500
chunk_word_targets = [2500, 2500, 2500]
overflow_chunk_cap = 2500
max_paragraph_words = 150
max_chunks = 20
# trace_dir = "./traces"

[storage]
root = "./media"
public_base_url = "http://localhost:8899/media"

[server]
port = 8899
"#;

#[derive(Parser)]
#[command(name = "narrate", about = "Generate sleep lectures from the command line")]
struct Cli {
    /// Config file (defaults to $NARRATOR_CONFIG or narrator.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a full lecture and print it
    Lecture { topic: String },
    /// Print the focus areas the outline planner picks for a topic
    Outline { topic: String },
    /// Propose lecture topics
    Topics {
        #[arg(long)]
        count: Option<usize>,
    },
    /// Write a sample config file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Command::Init = cli.command {
        let path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        std::fs::write(&path, SAMPLE_CONFIG.trim_start())?;
        log::info!("Wrote sample config to {}", path.display());
        return Ok(());
    }

    let config = load_config_or_default(cli.config.as_deref())?;
    let llm = build_generator(&config)?;
    let pipeline = LecturePipeline::new(llm, config.generation.clone());

    match cli.command {
        Command::Lecture { topic } => {
            let result = pipeline.generate(&topic).await?;
            let text = result
                .parts
                .iter()
                .map(|p| p.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            println!("{}", text);
            log::info!(
                "Lecture complete: {} parts, {} words, focus areas {:?}",
                result.parts.len(),
                result.total_words,
                result.focus_areas
            );
        }
        Command::Outline { topic } => {
            for area in pipeline.focus_areas(&topic).await? {
                println!("{}", area);
            }
        }
        Command::Topics { count } => {
            let count = count.unwrap_or(pipeline.config().topic_count);
            for topic in pipeline.propose_topics(count).await? {
                println!("{}", topic);
            }
        }
        Command::Init => {}
    }

    Ok(())
}
