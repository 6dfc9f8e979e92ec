use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use richtext::{
    BufferSink, DisplaySink, LocalImagePipeline, MarkupKind, RenderState, RichTextEngine,
    Settings,
};

/// Render an HTML or Markdown file to text, loading its local images.
#[derive(Parser, Debug)]
#[command(name = "richtext", version, about)]
struct Cli {
    /// Input file
    input: PathBuf,

    /// Treat the input as Markdown (default is HTML, or by file extension)
    #[arg(long)]
    markdown: bool,

    /// Do not load images; show nothing in their place
    #[arg(long)]
    no_image: bool,

    /// Keep declared/intrinsic image sizes instead of fitting the width
    #[arg(long)]
    no_auto_fix: bool,

    /// Content width in pixels used to fit images
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Settings file (YAML); defaults to the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "richtext.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Give up waiting for images after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Cli {
    fn kind(&self) -> MarkupKind {
        let by_extension = self
            .input
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"));
        if self.markdown || by_extension {
            MarkupKind::Markdown
        } else {
            MarkupKind::Html
        }
    }
}

fn main() -> Result<()> {
    better_panic::install();
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("Failed to create log file: {:?}", cli.log_file))?,
    )?;
    info!("Starting richtext on {:?}", cli.input);

    if let Err(e) = run(&cli) {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_or_default()?,
    };
    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;

    let base_dir = cli.input.parent().map(|dir| dir.to_path_buf());
    let pipeline = Arc::new(LocalImagePipeline::new(settings.loader_workers, base_dir));
    let engine = RichTextEngine::with_settings(settings, pipeline);

    let builder = match cli.kind() {
        MarkupKind::Html => engine.html(source),
        MarkupKind::Markdown => engine.markdown(source),
    };
    let mut builder = builder.no_image(cli.no_image);
    if cli.no_auto_fix {
        builder = builder.auto_fix(false);
    }
    let mut render = engine.render(builder.build()?);

    let sink = BufferSink::new(cli.width);
    render.attach(&sink)?;

    let loaded = sink.run_until(Duration::from_secs(cli.timeout), || {
        render.state() == RenderState::Loaded
    });
    if !loaded {
        bail!(
            "Timed out after {}s with {} images still loading",
            cli.timeout,
            render.pending_loads()
        );
    }

    let text = render.frozen_text().unwrap_or_else(|| sink.text());
    println!("{}", text.to_plain_string());
    Ok(())
}
