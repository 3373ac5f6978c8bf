//! CLI binary for pdf2tutorial.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `TutorialConfig`, expands directories into their PDFs, and writes one
//! output directory per document.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2tutorial::pipeline::input::{document_id_for, is_url, pdfs_in_dir};
use pdf2tutorial::{
    generate_tutorial, generate_tutorial_to_dir, inspect, partial_output, PageIssue,
    PageSelection, PageSeparator, ProgressCallback, TokenizerKind, TutorialConfig, TutorialError,
    TutorialOutput, TutorialProgressCallback,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Progress bar over pages, with one log line per page and per draft update.
struct CliProgressCallback {
    bar: ProgressBar,
    issues: AtomicUsize,
}

impl CliProgressCallback {
    fn new(label: &str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&TICKS),
        );
        bar.set_prefix(label.to_string());
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            issues: AtomicUsize::new(0),
        })
    }
}

impl TutorialProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&TICKS),
        );
        self.bar.set_length(total_pages as u64);
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, image_count: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{image_count} image(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_synthesis_complete(&self, first_page: usize, last_page: usize, draft_len: usize) {
        self.bar.println(format!(
            "  {} Tutorial updated with pages {}-{}  {}",
            cyan("◆"),
            first_page,
            last_page,
            dim(&format!("{draft_len} chars")),
        ));
    }

    fn on_issue(&self, issue: &PageIssue) {
        self.issues.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!("  {} {}", yellow("⚠"), issue));
    }

    fn on_run_complete(&self, pages_processed: usize, synthesis_calls: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages, {} tutorial update(s), {} issue(s)",
            green("✔"),
            bold(&pages_processed.to_string()),
            synthesis_calls,
            self.issues.load(Ordering::SeqCst)
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Tutorial to stdout
  pdf2tutorial manual.pdf

  # Write tutorial.md, images/, results.json and report.html under out/manual/
  pdf2tutorial manual.pdf -o out

  # Every PDF in a directory, one output directory each
  pdf2tutorial docs/ -o out

  # Smaller window, synthesize every 3 pages
  pdf2tutorial --max-context-tokens 4000 --batch-size 3 manual.pdf -o out

  # Inspect PDF metadata (no API key needed)
  pdf2tutorial --inspect-only manual.pdf

OUTPUT LAYOUT (with -o DIR):
  DIR/<document>/tutorial.md     pages, captioned images, tutorial
  DIR/<document>/images/         image_<page>_<n>.png
  DIR/<document>/results.json    image names, paths and captions
  DIR/<document>/report.html     each image next to its caption

If a tutorial update still fails after all retries, the pages done so far
are written (or printed) before the command exits with an error.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, azure, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium if it is not installed system-wide
"#;

/// Turn PDF files into Markdown tutorials with captioned images.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2tutorial",
    version,
    about = "Turn PDF files into Markdown tutorials with captioned images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, directories of PDFs, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output root; each document gets `<root>/<document>/`. Stdout if unset.
    #[arg(short, long, env = "PDF2TUTORIAL_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Token budget of the context window.
    #[arg(long, env = "PDF2TUTORIAL_MAX_CONTEXT_TOKENS", default_value_t = 8000)]
    max_context_tokens: usize,

    /// Pages per tutorial update.
    #[arg(long, env = "PDF2TUTORIAL_BATCH_SIZE", default_value_t = 1)]
    batch_size: usize,

    /// Expected tokens per page, used to check that a batch fits the window.
    #[arg(long, env = "PDF2TUTORIAL_PAGE_TOKENS", default_value_t = 1000)]
    page_token_estimate: usize,

    /// Share of the window an oversized page may keep (0.1–1.0).
    #[arg(long, env = "PDF2TUTORIAL_KEEP_RATIO", default_value_t = 1.0)]
    keep_ratio: f32,

    /// Tokenizer used to measure the window.
    #[arg(long, env = "PDF2TUTORIAL_TOKENIZER", value_enum, default_value = "cl100k")]
    tokenizer: TokenizerArg,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2TUTORIAL_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2TUTORIAL_SEPARATOR", default_value = "hr")]
    separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TUTORIAL_PASSWORD")]
    password: Option<String>,

    /// Text file with a custom tutorial system prompt.
    #[arg(long, env = "PDF2TUTORIAL_TUTORIAL_PROMPT")]
    tutorial_prompt: Option<PathBuf>,

    /// Text file with a custom image-caption system prompt.
    #[arg(long, env = "PDF2TUTORIAL_CAPTION_PROMPT")]
    caption_prompt: Option<PathBuf>,

    /// Store images with a placeholder caption and make no caption calls.
    #[arg(long, env = "PDF2TUTORIAL_SKIP_CAPTIONS")]
    skip_captions: bool,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2TUTORIAL_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2TUTORIAL_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Retries per LLM call.
    #[arg(long, env = "PDF2TUTORIAL_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "PDF2TUTORIAL_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Prepend YAML front-matter with document metadata.
    #[arg(long, env = "PDF2TUTORIAL_METADATA")]
    metadata: bool,

    /// Print TutorialOutput as JSON instead of Markdown (stdout mode).
    #[arg(long, env = "PDF2TUTORIAL_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2TUTORIAL_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2TUTORIAL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2TUTORIAL_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2TUTORIAL_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2TUTORIAL_API_TIMEOUT", default_value_t = 90)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TokenizerArg {
    Cl100k,
    O200k,
    Words,
}

impl From<TokenizerArg> for TokenizerKind {
    fn from(v: TokenizerArg) -> Self {
        match v {
            TokenizerArg::Cl100k => TokenizerKind::Cl100k,
            TokenizerArg::O200k => TokenizerKind::O200k,
            TokenizerArg::Words => TokenizerKind::Words,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let inputs = expand_inputs(&cli.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("No PDF files found in {:?}", cli.inputs);
    }

    if cli.inspect_only {
        for input in &inputs {
            print_metadata(input, cli.json).await?;
        }
        return Ok(());
    }

    if cli.output.is_none() && inputs.len() > 1 {
        anyhow::bail!(
            "{} documents given; pass --output DIR to write one directory per document",
            inputs.len()
        );
    }

    for input in &inputs {
        let label = display_id(input);
        let progress: Option<ProgressCallback> = if show_progress {
            Some(CliProgressCallback::new(&label) as Arc<dyn TutorialProgressCallback>)
        } else {
            None
        };
        let config = build_config(&cli, progress).await?;

        match cli.output {
            Some(ref root) => {
                let dir = root.join(&label);
                let output = generate_tutorial_to_dir(input, &dir, &config)
                    .await
                    .with_context(|| format!("Tutorial generation failed for {input}"))?;
                if !cli.quiet {
                    print_summary(&output, Some(&dir));
                }
            }
            None => {
                let output = match generate_tutorial(input, &config).await {
                    Ok(output) => output,
                    Err(TutorialError::Generation {
                        failure,
                        partial: Some(partial),
                    }) => {
                        write_stdout(&partial_output(&partial, &config), cli.json)?;
                        anyhow::bail!("Partial tutorial written for {input}: {failure}");
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("Tutorial generation failed for {input}")))
                    }
                };
                write_stdout(&output, cli.json)?;
                if !cli.quiet && !cli.json {
                    print_summary(&output, None);
                }
            }
        }
    }

    Ok(())
}

/// Directories become their `*.pdf` files; URLs and files pass through.
fn expand_inputs(raw: &[String]) -> Result<Vec<String>> {
    let mut inputs = Vec::new();
    for item in raw {
        let path = Path::new(item);
        if !is_url(item) && path.is_dir() {
            let found = pdfs_in_dir(path).with_context(|| format!("Failed to scan {item}"))?;
            inputs.extend(found.into_iter().map(|p| p.to_string_lossy().into_owned()));
        } else {
            inputs.push(item.clone());
        }
    }
    Ok(inputs)
}

/// Output directory name for an input: file stem, or URL file stem.
fn display_id(input: &str) -> String {
    let last = input.rsplit('/').next().unwrap_or(input);
    document_id_for(Path::new(last))
}

async fn print_metadata(input: &str, json: bool) -> Result<()> {
    let meta = inspect(input)
        .await
        .with_context(|| format!("Failed to inspect {input}"))?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
        );
    } else {
        println!("File:         {}", input);
        if let Some(ref t) = meta.title {
            println!("Title:        {}", t);
        }
        if let Some(ref a) = meta.author {
            println!("Author:       {}", a);
        }
        if let Some(ref s) = meta.subject {
            println!("Subject:      {}", s);
        }
        println!("Pages:        {}", meta.page_count);
    }
    Ok(())
}

fn write_stdout(output: &TutorialOutput, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
    } else {
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
    }
    Ok(())
}

fn print_summary(output: &TutorialOutput, dir: Option<&Path>) {
    let stats = &output.stats;
    let mark = if output.issues.is_empty() {
        green("✔")
    } else {
        yellow("⚠")
    };
    match dir {
        Some(dir) => eprintln!(
            "{}  {} pages  {} images  {}ms  →  {}",
            mark,
            stats.pages_processed,
            stats.images_stored,
            stats.total_duration_ms,
            bold(&dir.display().to_string()),
        ),
        None => eprintln!(
            "{}  {} pages  {} images  {}ms",
            mark, stats.pages_processed, stats.images_stored, stats.total_duration_ms
        ),
    }
    eprintln!(
        "   {} tokens in  /  {} tokens out  /  {} update(s), {} retr{}",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
        stats.synthesis_calls,
        stats.synthesis_retries,
        if stats.synthesis_retries == 1 { "y" } else { "ies" },
    );
}

/// Map CLI args to `TutorialConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<TutorialConfig> {
    let tutorial_prompt = read_prompt(cli.tutorial_prompt.as_deref()).await?;
    let caption_prompt = read_prompt(cli.caption_prompt.as_deref()).await?;

    let mut builder = TutorialConfig::builder()
        .max_context_tokens(cli.max_context_tokens)
        .batch_size(cli.batch_size)
        .page_token_estimate(cli.page_token_estimate)
        .oversize_keep_ratio(cli.keep_ratio)
        .tokenizer(cli.tokenizer.into())
        .pages(parse_pages(&cli.pages)?)
        .page_separator(parse_separator(&cli.separator))
        .skip_captions(cli.skip_captions)
        .max_output_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .include_metadata(cli.metadata)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(prompt) = tutorial_prompt {
        builder = builder.tutorial_prompt(prompt);
    }
    if let Some(prompt) = caption_prompt {
        builder = builder.caption_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: Option<&Path>) -> Result<Option<String>> {
    match path {
        Some(path) => Ok(Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )),
        None => Ok(None),
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
