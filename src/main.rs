use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wiki2pdf::{
    Downloader, DownloaderConfig, DEFAULT_BATCH_SIZE, DEFAULT_OUT_DIR, DEFAULT_USER_AGENT,
};

#[derive(Parser)]
#[command(name = "wiki2pdf")]
#[command(about = "CLI utility to download a MediaWiki site into batched PDFs for offline reading")]
#[command(version = "0.1.0")]
struct Args {
    /// URL of any page on the wiki
    url: String,

    /// Output directory used to save the text cache and PDFs
    #[arg(short = 'o', long = "out-dir", default_value = DEFAULT_OUT_DIR)]
    out_dir: PathBuf,

    /// Number of wiki pages per PDF
    #[arg(
        short = 'b',
        long = "batch-size",
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = parse_batch_size
    )]
    batch_size: usize,

    /// Request timeout in seconds (0 disables the timeout)
    #[arg(short = 't', long = "timeout", default_value = "30.0", value_parser = parse_timeout)]
    timeout: f64,

    /// User-Agent header sent with every request
    #[arg(long = "user-agent", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Only build PDFs from the existing cache, without crawling
    #[arg(long = "skip-crawl")]
    skip_crawl: bool,
}

fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if !value.is_finite() || value < 0.0 {
        return Err("Must be zero or positive number.".to_string());
    }
    Ok(value)
}

fn parse_batch_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("Must be at least 1.".to_string()),
        Ok(value) => Ok(value),
        Err(_) => Err("Not a whole number.".to_string()),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,wiki2pdf=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    let config = DownloaderConfig {
        out_dir: args.out_dir,
        batch_size: args.batch_size,
        timeout: Duration::from_secs_f64(args.timeout),
        user_agent: args.user_agent,
        skip_crawl: args.skip_crawl,
    };

    if let Err(e) = Downloader::new(config).run(&args.url).await {
        error!("{}", format!("Error: {:#}", e).red());
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_use_defaults() {
        let args =
            Args::try_parse_from(["wiki2pdf", "https://wiki.example/wiki/Main_Page"]).unwrap();
        assert_eq!(args.out_dir, PathBuf::from("all_wiki"));
        assert_eq!(args.batch_size, 100);
        assert_eq!(args.timeout, 30.0);
        assert_eq!(args.user_agent, "WikiToPDF/3.0");
        assert!(!args.skip_crawl);
    }

    #[test]
    fn args_reject_bad_values() {
        assert!(Args::try_parse_from(["wiki2pdf", "u", "--batch-size", "0"]).is_err());
        assert!(Args::try_parse_from(["wiki2pdf", "u", "--timeout", "-1"]).is_err());
        assert!(Args::try_parse_from(["wiki2pdf"]).is_err());
    }

    #[test]
    fn zero_timeout_is_accepted() {
        let args = Args::try_parse_from(["wiki2pdf", "u", "--timeout", "0"]).unwrap();
        assert_eq!(args.timeout, 0.0);
    }
}
