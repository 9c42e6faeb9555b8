use clap::Parser;
use console::style;
use fetchline::{
    MAX_BUFFER_SIZE,
    cli::Cli,
    downloader::Downloader,
    models::{DownloadConfig, DownloadProgress},
    progress::{ProgressCallback, render_status_line},
    utils::{format_bytes, format_duration, format_speed, parse_header, parse_size},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing_subscriber::EnvFilter;

const STATUS_LINE_WIDTH: usize = 40;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let url = cli.url;
    let requested_size = parse_size(&cli.buffer_size)?;
    let buffer_size = usize::try_from(requested_size)
        .unwrap_or(usize::MAX)
        .clamp(1, MAX_BUFFER_SIZE);
    if buffer_size as u64 != requested_size {
        tracing::warn!(
            "Buffer size {} out of range, using {}",
            cli.buffer_size,
            format_bytes(buffer_size as u64)
        );
    }

    let mut headers = Vec::new();
    for header in cli.header.unwrap_or_default() {
        match parse_header(&header) {
            Some(header) => headers.push(header),
            None => tracing::warn!("Ignoring malformed header `{header}`, expected 'Name: Value'"),
        }
    }

    let mut config = DownloadConfig {
        connections: cli.connections,
        filename: cli.output,
        output_dir: cli.dir,
        buffer_size,
        connect_timeout: Duration::from_secs(cli.timeout),
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        max_redirects: cli.max_redirects,
        ..Default::default()
    };
    config.headers.extend(headers);

    if let Some(user_agent) = cli.user_agent {
        config.user_agent = user_agent;
    }

    let quiet = cli.quiet;
    let verbose = cli.verbose;

    if verbose {
        println!("{}", style("fetchline").bold().cyan());
        println!("URL: {}", url);
        if let Some(output) = &config.filename {
            println!("Output: {}", output);
        }
        if let Some(dir) = &config.output_dir {
            println!("Directory: {}", dir.display());
        }
        match config.connections {
            Some(connections) => println!("Connections: {}", connections),
            None => println!("Connections: auto"),
        }
        println!("Buffer size: {}", format_bytes(buffer_size as u64));
        println!();
    }

    let downloader = Arc::new(Downloader::new(config));

    {
        let downloader = Arc::clone(&downloader);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping transfer");
                downloader.stop();
            }
        });
    }

    let progress_bar = if !quiet {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) ETA: {eta} | {msg}")?
                .progress_chars("##-"),
        );
        Some(pb)
    } else {
        None
    };

    let progress_callback: Option<ProgressCallback> = if let Some(pb) = progress_bar.clone() {
        let unknown_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) | {msg}")?;
        let unknown_length = AtomicBool::new(false);

        Some(Box::new(move |progress: DownloadProgress| {
            match progress.total_bytes {
                Some(total) => pb.set_length(total),
                None if !unknown_length.swap(true, Ordering::Relaxed) => {
                    pb.set_style(unknown_style.clone())
                }
                None => {}
            }
            pb.set_position(progress.downloaded_bytes);

            let message = match progress.percentage() {
                Some(percentage) => format!(
                    "{:.1}% | {} connections | {}/{} chunks",
                    percentage,
                    progress.active_connections,
                    progress.chunks_completed,
                    progress.chunks_total
                ),
                None => format!("{} connections", progress.active_connections),
            };
            pb.set_message(message);
        }))
    } else if verbose {
        Some(Box::new(move |progress: DownloadProgress| {
            eprint!("\r{}", render_status_line(&progress, STATUS_LINE_WIDTH));
            let _ = std::io::stderr().flush();
        }))
    } else {
        None
    };

    let result = downloader.download(&url, progress_callback).await;

    if let Some(pb) = progress_bar.as_ref() {
        pb.finish();
    } else if verbose {
        eprintln!();
    }

    match result {
        Ok(summary) => {
            if !quiet {
                println!();
                println!("{}", style("Download completed successfully!").green().bold());
                println!("File: {}", summary.path.display());
                println!("Size: {}", format_bytes(summary.bytes));
                if let Some(expected) = summary
                    .expected_bytes
                    .filter(|expected| *expected != summary.bytes)
                {
                    println!(
                        "{} received {} of {} announced bytes",
                        style("Warning:").yellow().bold(),
                        summary.bytes,
                        expected
                    );
                }
                println!("Time: {}", format_duration(summary.elapsed.as_secs()));
                let seconds = summary.elapsed.as_secs_f64().max(f64::EPSILON);
                println!("Average speed: {}", format_speed(summary.bytes as f64 / seconds));
            } else {
                println!("{}", summary.path.display());
            }
        }
        Err(e) => {
            if !quiet {
                println!();
            }
            eprintln!("{} {}", style("Error:").red().bold(), e);

            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "fetchline=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
