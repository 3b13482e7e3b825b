//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use judgeloop_core::chat::{ChatAnswer, ChatPipeline, ChatSession};
use judgeloop_core::pipeline::{
    BatchOptions, BatchProgress, BatchReport, CasePipeline, ItemStatus,
};
use judgeloop_core::recommend::{Recommender, import_courses};
use judgeloop_llm::{LlmClient, TextEmbedder};
use judgeloop_shared::{
    AppConfig, ChatRole, Course, ScoredCourse, config_file_path, init_config, load_config,
    load_config_from,
};
use judgeloop_storage::{ChatHistoryStore, CsvSink, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// judgeloop: judged LLM pipelines for support cases and course search.
#[derive(Parser)]
#[command(
    name = "judgeloop",
    version,
    about = "Anonymize and classify support cases with judged LLM loops, and recommend courses.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.judgeloop/judgeloop.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also append logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process new cases from the input batch into the result CSV.
    Run {
        /// Input JSON batch (overrides batch.input_path).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Result CSV (overrides batch.output_path).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Department catalogue JSON (overrides batch.departments_path).
        #[arg(short, long)]
        departments: Option<PathBuf>,

        /// Cases in flight at once (overrides batch.concurrency).
        #[arg(long)]
        concurrency: Option<usize>,

        /// Attempts per stage (overrides batch.max_attempts).
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// User accounts.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Course assistant conversations.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Course catalogue and recommendations.
    Courses {
        #[command(subcommand)]
        action: CoursesAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum UsersAction {
    /// Create an account and its conversation.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "JUDGELOOP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check credentials.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "JUDGELOOP_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum ChatAction {
    /// Ask the assistant a question.
    Ask {
        #[arg(long)]
        email: String,
        /// The question.
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Print the stored conversation.
    History {
        #[arg(long)]
        email: String,
    },
    /// Reset the conversation to the greeting.
    Clear {
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum CoursesAction {
    /// Embed a course catalogue CSV into the index.
    Import {
        /// CSV with name,level,duration,format,instructor,start_date,description.
        csv: PathBuf,
    },
    /// Courses matching the user's interests.
    Recommend {
        #[arg(long)]
        email: String,
    },
    /// Enroll the user in a course.
    Enroll {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: u64,
    },
    /// List the user's courses.
    Mine {
        #[arg(long)]
        email: String,
    },
    /// Fold a course into the user's interest profile.
    Learn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        course: u64,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Console logs go to stderr so command output on stdout stays clean.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let filter = match cli.verbose {
        0 => "judgeloop=info",
        1 => "judgeloop=debug",
        _ => "judgeloop=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let console: Box<dyn Layer<Registry> + Send + Sync> = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };

    let file = match &cli.log_file {
        Some(path) => {
            let handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| eyre!("cannot open log file {}: {e}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(handle)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .try_init()
        .map_err(|e| eyre!("failed to initialize logging: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
        Command::Run {
            input,
            output,
            departments,
            concurrency,
            max_attempts,
        } => {
            let mut config = resolve_config(config_path.as_deref())?;
            if let Some(path) = input {
                config.batch.input_path = path.to_string_lossy().into_owned();
            }
            if let Some(path) = output {
                config.batch.output_path = path.to_string_lossy().into_owned();
            }
            if let Some(path) = departments {
                config.batch.departments_path = path.to_string_lossy().into_owned();
            }
            if let Some(n) = concurrency {
                config.batch.concurrency = n;
            }
            if let Some(n) = max_attempts {
                config.batch.max_attempts = n;
            }
            judgeloop_shared::validate_config(&config)?;
            cmd_run(&config).await
        }
        Command::Users { action } => {
            let ctx = AppContext::open(config_path.as_deref()).await?;
            match action {
                UsersAction::Register { email, password } => {
                    ctx.recommender().register(&email, &password).await?;
                    println!("Registered {email}");
                }
                UsersAction::Login { email, password } => {
                    ctx.recommender().login(&email, &password).await?;
                    println!("Login OK for {email}");
                }
            }
            Ok(())
        }
        Command::Chat { action } => {
            let ctx = AppContext::open(config_path.as_deref()).await?;
            match action {
                ChatAction::Ask { email, query } => {
                    cmd_chat_ask(&ctx, &email, &query.join(" ")).await
                }
                ChatAction::History { email } => {
                    let history = ctx
                        .storage
                        .load(&email)
                        .await?
                        .ok_or_else(|| eyre!("no conversation for {email}"))?;
                    for message in &history.messages {
                        let who = match message.role {
                            ChatRole::User => "you",
                            ChatRole::Assistant => "assistant",
                        };
                        println!("{who:>9}: {}", message.content);
                    }
                    Ok(())
                }
                ChatAction::Clear { email } => {
                    ctx.storage
                        .clear(&email, &ctx.config.recommender.greeting)
                        .await?;
                    println!("Conversation cleared for {email}");
                    Ok(())
                }
            }
        }
        Command::Courses { action } => {
            let ctx = AppContext::open(config_path.as_deref()).await?;
            match action {
                CoursesAction::Import { csv } => cmd_courses_import(&ctx, &csv).await,
                CoursesAction::Recommend { email } => {
                    let courses = ctx.recommender().recommend(&email).await?;
                    print_scored(&courses);
                    Ok(())
                }
                CoursesAction::Enroll { email, course } => {
                    ctx.recommender().enroll(&email, course).await?;
                    println!("Enrolled {email} in course {course}");
                    Ok(())
                }
                CoursesAction::Mine { email } => {
                    let courses = ctx.recommender().my_courses(&email).await?;
                    if courses.is_empty() {
                        println!("No courses yet.");
                    }
                    for course in &courses {
                        print_course(course, None);
                    }
                    Ok(())
                }
                CoursesAction::Learn { email, course } => {
                    ctx.recommender().learn_from_course(&email, course).await?;
                    println!("Updated interests of {email} from course {course}");
                    Ok(())
                }
            }
        }
    }
}

/// Config from `--config`, or the default location. Missing file ⇒ defaults.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) if path.exists() => Ok(load_config_from(path)?),
        Some(path) => {
            info!(path = %path.display(), "config file not found, using defaults");
            Ok(AppConfig::default())
        }
        None => Ok(load_config()?),
    }
}

// ---------------------------------------------------------------------------
// Application context
// ---------------------------------------------------------------------------

/// Config plus the opened store, built once per invocation and injected
/// into the pipelines.
struct AppContext {
    config: AppConfig,
    storage: Arc<Storage>,
}

impl AppContext {
    async fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = resolve_config(config_path)?;
        let storage = Storage::open(Path::new(&config.recommender.database_path)).await?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
        })
    }

    fn recommender(&self) -> Recommender {
        Recommender::new(
            self.storage.clone(),
            self.storage.clone(),
            self.storage.clone(),
            &self.config.recommender,
        )
    }

    fn embedder(&self) -> Result<TextEmbedder> {
        let client = LlmClient::from_endpoint(&self.config.embedding)?;
        Ok(TextEmbedder::new(
            client,
            self.config.recommender.embedding_dim,
        ))
    }

    fn chat_session(&self) -> Result<ChatSession> {
        let pipeline = ChatPipeline::from_config(
            &self.config,
            Arc::new(self.embedder()?),
            self.storage.clone(),
        )?;
        Ok(ChatSession::new(
            pipeline,
            self.storage.clone(),
            self.config.recommender.greeting.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig) -> Result<()> {
    let input = PathBuf::from(&config.batch.input_path);
    let departments_path = PathBuf::from(&config.batch.departments_path);
    let sink = CsvSink::new(&config.batch.output_path);

    info!(
        input = %input.display(),
        output = %sink.path().display(),
        max_attempts = config.batch.max_attempts,
        concurrency = config.batch.concurrency,
        "==== batch run started ===="
    );

    let departments = judgeloop_core::load_departments(&departments_path)?;
    let pipeline = CasePipeline::from_config(config, &departments)?;
    let options = BatchOptions::from_config(config);
    let progress = CliProgress::new()?;

    let report = pipeline
        .run_from_files(&input, &sink, &options, &progress)
        .await?;

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped.len(),
        elapsed_secs = report.elapsed.as_secs_f64(),
        "==== batch run finished ===="
    );
    print_report(&report, sink.path());
    Ok(())
}

async fn cmd_chat_ask(ctx: &AppContext, email: &str, query: &str) -> Result<()> {
    let session = ctx.chat_session()?;
    match session.ask(email, query).await? {
        ChatAnswer::Text(text) => println!("{text}"),
        ChatAnswer::Courses(courses) => print_scored(&courses),
        answer @ ChatAnswer::NoResults => println!("{}", answer.history_text()),
    }
    Ok(())
}

async fn cmd_courses_import(ctx: &AppContext, csv: &Path) -> Result<()> {
    let embedder = ctx.embedder()?;
    let count = import_courses(csv, &embedder, ctx.storage.as_ref()).await?;
    println!("Imported {count} courses from {}", csv.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let source = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &BatchReport, output: &Path) {
    println!();
    println!("  Batch finished.");
    println!("  Input records:      {}", report.total);
    println!("  Already processed:  {}", report.already_processed);
    println!("  Selected:           {}", report.selected);
    println!("  Succeeded:          {}", report.succeeded);
    println!("  Failed:             {}", report.failed);
    println!("  Skipped (invalid):  {}", report.skipped.len());
    for skip in &report.skipped {
        println!("    record {}: {}", skip.index, skip.reason);
    }
    println!("  Output:             {}", output.display());
    println!("  Time:               {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

fn print_scored(courses: &[ScoredCourse]) {
    if courses.is_empty() {
        println!("No courses found.");
    }
    for scored in courses {
        print_course(&scored.course, Some(scored.score));
    }
}

fn print_course(course: &Course, score: Option<f32>) {
    let score = score.map(|s| format!("  ({s:.3})")).unwrap_or_default();
    println!("  [{}] {}{score}", course.id, course.name);
    println!(
        "      {} · {} · {} · {} · starts {}",
        course.level, course.duration, course.format, course.instructor, course.start_date
    );
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress bar using indicatif.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30}] {pos}/{len} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }
}

impl BatchProgress for CliProgress {
    fn started(&self, selected: usize) {
        self.bar.set_length(selected as u64);
        self.bar
            .enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn item_finished(&self, case_id: &str, status: ItemStatus, done: usize, _total: usize) {
        let label = match status {
            ItemStatus::Succeeded => "ok",
            ItemStatus::Failed => "failed",
        };
        self.bar.set_position(done as u64);
        self.bar.set_message(format!("case {case_id} {label}"));
    }

    fn finished(&self, _report: &BatchReport) {
        self.bar.finish_and_clear();
    }
}
