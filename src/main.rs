use anyhow::{Result, anyhow};
use docqa::extract::extractor_for;
use docqa::{Config, IndexCache, Retriever};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Args {
    document: PathBuf,
    pages: Option<usize>,
    config: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut document = None;
    let mut pages = None;
    let mut config = PathBuf::from("docqa.toml");

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("--config needs a path"))?;
        } else if document.is_none() {
            document = Some(PathBuf::from(arg));
        } else if pages.is_none() {
            pages = Some(arg.parse().map_err(|_| anyhow!("Invalid page count: {}", arg))?);
        } else {
            return Err(anyhow!("Unexpected argument: {}", arg));
        }
    }

    let document = document
        .ok_or_else(|| anyhow!("Usage: docqa <document> [pages] [--config <path>]"))?;
    Ok(Args {
        document,
        pages,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let config = Config::load(&args.config)?;
    let cache = Arc::new(IndexCache::new(config.cache_dir()?, config.cache.capacity)?);
    let retriever = Retriever::from_config(&config, cache)?;

    let command = config.extractor();
    let extractor = extractor_for(&args.document, &command);
    let pages = args.pages.or(config.extract.max_pages);

    println!("Ask questions about '{}' (Ctrl+D to exit)", args.document.display());

    // Interactive query loop
    loop {
        let mut query = String::new();
        print!("> ");
        std::io::stdout().flush()?;

        if std::io::stdin().read_line(&mut query)? == 0 {
            break; // EOF (Ctrl+D)
        }

        let query = query.trim();
        if query.is_empty() {
            continue;
        }

        match retriever
            .answer_file(&args.document, query, pages, extractor.as_ref())
            .await
        {
            Ok(answer) => {
                if answer.context.truncated {
                    println!("(context trimmed to the most relevant passage)");
                }
                println!("\n{}\n", answer.text);
            }
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }

    Ok(())
}
