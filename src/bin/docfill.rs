//! CLI binary for docfill.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service, the
//! other subcommands run one pipeline step against local files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docfill::{
    server, DefaultTemplate, DocfillError, GenerateRequest, Generator, GeneratorConfig,
    MissingFieldPolicy, RawFillRequest, ServerSettings, StagedUpload, TargetFormat,
    TemplateSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

// ── Spinner ──────────────────────────────────────────────────────────────────

/// Spinner shown on stderr while a step runs. Hidden in quiet mode.
fn spinner(prefix: &'static str, message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(prefix);
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 3000 with Assets/template.docx as default
  docfill serve

  # Custom port, lenient missing-field handling
  docfill serve --port 8080 --missing-fields blank

  # Fill a template from a JSON file
  docfill render --template letter.docx --data data.json -o letter-filled.docx

  # Fill the default template from stdin and convert to PDF
  echo '{"CourseTitle":"Sample Course","CourseCode":"CS101"}' | docfill render --format pdf -o course.pdf

  # Fill a remote template
  docfill render --template https://example.com/t.docx --data data.json -o out.docx

  # Convert any office document
  docfill convert report.docx --to pdf -o report.pdf

  # List the tags a template expects
  docfill inspect --json letter.docx

HTTP ROUTES (docfill serve):
  POST /generate-docx   multipart (template, data, templateUrl, outputFormat) or JSON body
  POST /upload          multipart (file, format) → converted document
  GET  /healthz         liveness + converter name

TEMPLATE SYNTAX:
  {name}               value; dotted paths descend ({course.code})
  {#items}…{/items}    repeat per element, or once when truthy
  {^items}…{/items}    render only when falsy
  {.}                  current loop element

ENVIRONMENT VARIABLES:
  PORT                  Listener port for `serve` (default 3000)
  DOCFILL_TEMPLATE      Default template path
  DOCFILL_UPLOAD_DIR    Directory for staged uploads
  SOFFICE_PATH          Path to the LibreOffice `soffice` executable
  RUST_LOG              Overrides the log filter derived from -v / -q
"#;

/// Fill DOCX templates with JSON data and convert documents with LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "docfill",
    version,
    about = "Fill DOCX templates with JSON data and convert them to PDF",
    long_about = "Fill Word (DOCX) templates with JSON data, either through an HTTP service \
or from the command line, and optionally convert the result with headless LibreOffice.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCFILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCFILL_QUIET")]
    quiet: bool,
}

/// Options shared by every subcommand that builds a [`Generator`].
#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// Default template (relative paths are searched from the working and executable directories).
    #[arg(long = "default-template", env = "DOCFILL_TEMPLATE")]
    default_template: Option<PathBuf>,

    /// Path to the LibreOffice `soffice` executable.
    #[arg(long, env = "SOFFICE_PATH")]
    soffice: Option<PathBuf>,

    /// Template download timeout in seconds.
    #[arg(long, env = "DOCFILL_DOWNLOAD_TIMEOUT", default_value_t = 30)]
    download_timeout: u64,

    /// Conversion timeout in seconds.
    #[arg(long, env = "DOCFILL_CONVERSION_TIMEOUT", default_value_t = 120)]
    conversion_timeout: u64,

    /// Handling of tags missing from the data.
    #[arg(long, env = "DOCFILL_MISSING_FIELDS", value_enum, default_value = "error")]
    missing_fields: MissingFieldsArg,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Interface to bind.
        #[arg(long, env = "DOCFILL_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Listener port.
        #[arg(short, long, env = "PORT", default_value_t = docfill::config::DEFAULT_PORT)]
        port: u16,

        /// Maximum request body size in bytes.
        #[arg(long, env = "DOCFILL_MAX_BODY_BYTES",
              default_value_t = docfill::config::DEFAULT_MAX_BODY_BYTES)]
        max_body_bytes: usize,

        /// Directory where uploads are staged (must exist).
        #[arg(long, env = "DOCFILL_UPLOAD_DIR")]
        upload_dir: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Fill a template with JSON data.
    Render {
        /// Template file or HTTP/HTTPS URL. Defaults to the default template.
        #[arg(short, long)]
        template: Option<String>,

        /// JSON data file; `-` or omitted reads stdin.
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Output file. Defaults to the download filename in the current directory.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: docx, pdf, odt, html, txt.
        #[arg(short, long, default_value = "docx")]
        format: String,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Convert a document with LibreOffice.
    Convert {
        /// Input document.
        input: PathBuf,

        /// Target format: pdf, docx, odt, html, txt.
        #[arg(long, default_value = "pdf")]
        to: String,

        /// Output file. Defaults to the input name with the new extension.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List the tags a template expects.
    Inspect {
        /// Template file or HTTP/HTTPS URL. Defaults to the default template.
        template: Option<String>,

        /// Print the tags as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MissingFieldsArg {
    Error,
    Blank,
}

impl From<MissingFieldsArg> for MissingFieldPolicy {
    fn from(v: MissingFieldsArg) -> Self {
        match v {
            MissingFieldsArg::Error => MissingFieldPolicy::Error,
            MissingFieldsArg::Blank => MissingFieldPolicy::Blank,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // One-shot commands show a spinner, so library INFO logs stay quiet
    // unless asked for; the service logs at INFO by default.
    let is_serve = matches!(cli.command, Command::Serve { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || !is_serve {
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

    match cli.command {
        Command::Serve {
            host,
            port,
            max_body_bytes,
            upload_dir,
            engine,
        } => {
            let mut builder = engine_builder(&engine);
            if let Some(dir) = upload_dir {
                builder = builder.upload_dir(dir);
            }
            let generator = build_generator(builder)?;
            let settings = ServerSettings {
                host,
                port,
                max_body_bytes,
            };
            if !cli.quiet {
                eprintln!(
                    "{} {} on {}",
                    cyan("◆"),
                    bold("docfill"),
                    bold(&settings.bind_address())
                );
            }
            server::serve(generator, settings)
                .await
                .context("Server failed")?;
        }

        Command::Render {
            template,
            data,
            output,
            format,
            engine,
        } => {
            let payload = RawFillRequest {
                data: Some(read_data(data.as_deref()).await?),
                output_format: Some(format),
                ..RawFillRequest::default()
            }
            .normalize()?;
            let generator = build_generator(engine_builder(&engine))?;
            let source = match template {
                Some(ref t) => template_source(Some(t.as_str())).await?,
                // A nested `templateUrl` in the data picks the template.
                None => TemplateSource::select(None, payload.template_url.as_deref()),
            };

            let start = Instant::now();
            let bar = spinner("Rendering", "filling template…", cli.quiet);
            let result = generator
                .generate(GenerateRequest {
                    data: payload.data,
                    source,
                    output_format: payload.output_format,
                })
                .await;
            bar.finish_and_clear();
            let generated = result.context("Render failed")?;

            let path = output.unwrap_or_else(|| PathBuf::from(&generated.artifact.filename));
            write_output(&path, &generated.artifact.bytes).await?;

            if !cli.quiet {
                eprintln!(
                    "{}  {}  {}  {}ms  →  {}",
                    green("✔"),
                    generated.origin.describe(),
                    dim(&format!("{} bytes", generated.artifact.len())),
                    start.elapsed().as_millis(),
                    bold(&path.display().to_string()),
                );
            }
        }

        Command::Convert {
            input,
            to,
            output,
            engine,
        } => {
            let target: TargetFormat = to.parse()?;
            if !input.is_file() {
                bail!("Input file {} does not exist", input.display());
            }
            let generator = build_generator(engine_builder(&engine))?;
            if !generator.converter().is_available() {
                eprintln!(
                    "{} {} is not available; install LibreOffice or set SOFFICE_PATH",
                    red("✘"),
                    generator.converter().engine_name()
                );
            }

            let start = Instant::now();
            let bar = spinner(
                "Converting",
                &format!("{} → {}", input.display(), target),
                cli.quiet,
            );
            let result = generator.convert_path(&input, target).await;
            bar.finish_and_clear();
            let artifact = result.context("Conversion failed")?;

            let path = output.unwrap_or_else(|| input.with_extension(target.extension()));
            write_output(&path, &artifact.bytes).await?;

            if !cli.quiet {
                eprintln!(
                    "{}  {}  {}ms  →  {}",
                    green("✔"),
                    dim(&format!("{} bytes", artifact.len())),
                    start.elapsed().as_millis(),
                    bold(&path.display().to_string()),
                );
            }
        }

        Command::Inspect {
            template,
            json,
            engine,
        } => {
            let generator = build_generator(engine_builder(&engine))?;
            let source = template_source(template.as_deref()).await?;
            let (fields, origin) = generator
                .inspect(source)
                .await
                .context("Failed to inspect template")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&fields).context("Failed to serialize tags")?
                );
            } else {
                println!("Template:  {}", origin.describe());
                println!("Tags:      {}", fields.len());
                for field in &fields {
                    println!(
                        "  {:<16} {:<28} {}",
                        field.kind.to_string(),
                        field.name,
                        dim(&field.part)
                    );
                }
            }
        }
    }

    Ok(())
}

/// Map shared CLI args to a config builder.
fn engine_builder(args: &EngineArgs) -> docfill::GeneratorConfigBuilder {
    let mut builder = GeneratorConfig::builder()
        .default_template(DefaultTemplate::discover(args.default_template.as_deref()))
        .download_timeout_secs(args.download_timeout)
        .conversion_timeout_secs(args.conversion_timeout)
        .missing_fields(args.missing_fields.into());
    if let Some(ref path) = args.soffice {
        builder = builder.soffice_path(path.clone());
    }
    builder
}

fn build_generator(builder: docfill::GeneratorConfigBuilder) -> Result<Generator> {
    let config = builder.build().context("Invalid configuration")?;
    Generator::new(config).context("Failed to initialise generator")
}

/// A local path is staged like an upload; an HTTP(S) string is fetched.
async fn template_source(template: Option<&str>) -> Result<TemplateSource> {
    let Some(template) = template else {
        return Ok(TemplateSource::Default);
    };
    if template.starts_with("http://") || template.starts_with("https://") {
        return Ok(TemplateSource::RemoteUrl(template.to_string()));
    }

    let path = Path::new(template);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read template {:?}", path))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("template.docx");
    let staged = StagedUpload::from_bytes(None, name, &bytes).await?;
    Ok(TemplateSource::Uploaded(staged))
}

async fn read_data(path: Option<&Path>) -> Result<Value> {
    let text = match path {
        Some(p) if p != Path::new("-") => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("Failed to read data from {:?}", p))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read data from stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("Data is not valid JSON")
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), DocfillError> {
    let write_failed = |source: io::Error| DocfillError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if path == Path::new("-") {
        return io::stdout().lock().write_all(bytes).map_err(write_failed);
    }
    tokio::fs::write(path, bytes).await.map_err(write_failed)
}
