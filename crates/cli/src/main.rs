use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use grounding_evidence::{
    format_evidence_block, format_zero_results, owned_rows, parse_stdout, replace_rows,
    CompiledTransform, EvidenceBlock, RenderMode, RenderOptions, RowsByStep, TransformSpec,
};
use grounding_gates::{
    autocomplete_citations, check_answer, extract_required_keys, validate_required_key_lines,
    AllowedTokenSet, PathUniverse, QuestionValidators, ValidationPolicy,
};
use grounding_keys::{discover, DiscoveryPolicy, KeyRegistry, SchemaContract};
use grounding_orchestrator::{
    ModelBackend, OrchestratorError, Pack, QuoteBypassMode, ReplayBackend, RetryCounts, Runner,
    RunnerPolicy, MANIFEST_FILE, REPORT_FILE, SUMMARY_FILE,
};
use process::{CommandBackend, ProcessRunner};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

mod process;

/// Exit code for fatal configuration and gate aborts.
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "grounding")]
#[command(about = "Evidence grounding and provenance validation for audit answers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for results)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the effective key map and print its snapshot
    Keys(KeysArgs),

    /// Render one payload as a framed evidence block
    Render(RenderArgs),

    /// Check an answer against evidence blocks
    Validate(ValidateArgs),

    /// Run a question pack through evidence assembly and the retry ladder
    Run(RunArgs),
}

#[derive(Args)]
struct KeysArgs {
    /// Engine schema contract (JSON)
    #[arg(long)]
    contract: Option<PathBuf>,

    /// Inferred column names (comma-separated)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Sample payloads to learn keys from
    #[arg(long, num_args = 1..)]
    payload: Vec<PathBuf>,

    /// Engine name used for the contract requirement
    #[arg(long, default_value = "generic")]
    engine: String,

    /// Runner policy (TOML); its `[discovery]` table applies
    #[arg(long, conflicts_with = "lenient")]
    policy: Option<PathBuf>,

    /// Never fail on a missing contract or missing roles
    #[arg(long)]
    lenient: bool,
}

#[derive(Args)]
struct RenderArgs {
    /// Question id used for the CITE anchor
    #[arg(long)]
    qid: String,

    /// Preflight step name
    #[arg(long)]
    name: String,

    /// Payload file (JSON, or plain text)
    #[arg(long)]
    payload: PathBuf,

    /// Row layout; defaults to the transform's `render` or list
    #[arg(long, value_enum)]
    mode: Option<ModeFlag>,

    /// Body budget in characters
    #[arg(long)]
    max_chars: Option<usize>,

    /// Transform spec (TOML) applied before rendering
    #[arg(long)]
    transform: Option<PathBuf>,

    /// Code fence language for block mode
    #[arg(long, default_value = "rust")]
    fence_lang: String,

    /// Runner policy (TOML) for filter defaults and discovery
    #[arg(long)]
    policy: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    /// Answer text file
    #[arg(long)]
    answer: PathBuf,

    /// Evidence block files
    #[arg(long, num_args = 1..)]
    evidence: Vec<PathBuf>,

    /// Validation policy (TOML, the pack's `[validation]` table)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Strict response template whose KEY= lines are required
    #[arg(long)]
    strict_template: Option<PathBuf>,

    /// Apply Gate B autocomplete before checking
    #[arg(long)]
    autocomplete: bool,

    /// Per-question validators (TOML); needs --qid
    #[arg(long, requires = "qid")]
    validators: Option<PathBuf>,

    /// Question id for the per-question validators
    #[arg(long)]
    qid: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// Question pack (TOML)
    #[arg(long)]
    pack: PathBuf,

    /// Output directory for artifacts and the report
    #[arg(long)]
    out: PathBuf,

    /// Runner policy (TOML)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Recorded answers: {"Q1": ["answer", "retry answer"], ...}
    #[arg(long, conflicts_with = "model_cmd")]
    answers: Option<PathBuf>,

    /// Model command argv; reads the prompt on stdin. Must come last.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    model_cmd: Vec<String>,

    /// Start with a narrow top_k and widen once on validator issues
    #[arg(long)]
    adaptive_top_k: bool,

    /// Quote bypass: auto|on|off
    #[arg(long)]
    quote_bypass: Option<QuoteBypassMode>,

    /// Engine schema contract (JSON)
    #[arg(long)]
    contract: Option<PathBuf>,

    /// Inferred column names (comma-separated)
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Working directory for preflight commands
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Corpus root; evidence paths are audited against its files
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Files whose mtime and size invalidate cached preflight artifacts
    #[arg(long = "signature-input")]
    signature_inputs: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeFlag {
    List,
    Block,
    Lines,
    Json,
}

impl ModeFlag {
    fn as_mode(self) -> RenderMode {
        match self {
            Self::List => RenderMode::List,
            Self::Block => RenderMode::Block,
            Self::Lines => RenderMode::Lines,
            Self::Json => RenderMode::Json,
        }
    }
}

#[derive(Serialize)]
struct ValidateOutput {
    ok: bool,
    issues: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    autocompleted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
}

#[derive(Serialize)]
struct RunOutput {
    ok: bool,
    total: usize,
    passed: usize,
    retries: RetryCounts,
    report: PathBuf,
    summary: PathBuf,
    manifest: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Keys(args) => run_keys(args),
        Commands::Render(args) => run_render(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Run(args) => run_pack(args),
    }
}

/// Report a fatal configuration or gate error and exit with [`EXIT_FATAL`].
fn exit_fatal(err: &dyn std::fmt::Display) -> ! {
    log::error!("fatal error={err}");
    eprintln!("Error: {err}");
    std::process::exit(EXIT_FATAL);
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_policy(path: Option<&Path>) -> Result<RunnerPolicy> {
    match path {
        Some(path) => RunnerPolicy::load(path)
            .with_context(|| format!("Invalid policy {}", path.display())),
        None => Ok(RunnerPolicy::default()),
    }
}

/// The contract and its source label. Unparseable contracts are fatal.
fn load_contract(path: Option<&Path>) -> Result<Option<(SchemaContract, String)>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = read_text(path)?;
    match SchemaContract::from_json_str(&raw) {
        Ok(contract) => Ok(Some((contract, path.display().to_string()))),
        Err(err) => exit_fatal(&err),
    }
}

fn discover_keys(
    policy: DiscoveryPolicy,
    engine: &str,
    contract: Option<&(SchemaContract, String)>,
    columns: &[String],
    payloads: &[Value],
) -> KeyRegistry {
    let contract = contract.map(|(c, source)| (c, source.as_str()));
    let columns = (!columns.is_empty()).then_some((columns, "--columns"));
    match discover(policy, engine, contract, columns, payloads) {
        Ok(registry) => registry,
        Err(err) => exit_fatal(&err),
    }
}

fn run_keys(args: KeysArgs) -> Result<()> {
    let policy = if args.lenient {
        DiscoveryPolicy::lenient()
    } else {
        load_policy(args.policy.as_deref())?.discovery
    };
    let contract = load_contract(args.contract.as_deref())?;
    let payloads = args
        .payload
        .iter()
        .map(|path| read_text(path).map(|text| parse_stdout(&text)))
        .collect::<Result<Vec<_>>>()?;
    let registry = discover_keys(policy, &args.engine, contract.as_ref(), &args.columns, &payloads);
    println!("{}", registry.snapshot().to_json_pretty()?);
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let policy = load_policy(args.policy.as_deref())?;
    let payload = parse_stdout(&read_text(&args.payload)?);
    let mut registry = KeyRegistry::new(policy.discovery.clone(), "render");
    registry.learn_from_payload(&payload);

    let spec: TransformSpec = match &args.transform {
        Some(path) => toml::from_str(&read_text(path)?)
            .with_context(|| format!("Invalid transform {}", path.display()))?,
        None => TransformSpec::default(),
    };
    let mode = args
        .mode
        .map(ModeFlag::as_mode)
        .or(spec.render)
        .unwrap_or_default();
    let max_chars = args
        .max_chars
        .or(spec.max_chars)
        .unwrap_or(policy.evidence.preflight_max_chars);

    let raw = owned_rows(&registry, &payload);
    let raw_count = raw.len();
    let body = if args.transform.is_some() && raw_count > 0 {
        let compiled = CompiledTransform::compile(&spec, &policy.evidence.filters)?;
        let mut kept = compiled.apply(&registry, raw, &RowsByStep::default());
        if let Some(max_items) = spec.max_items.filter(|n| *n > 0) {
            kept.truncate(max_items);
        }
        log::debug!(
            "render.transform step={} rows_before={raw_count} rows_after={}",
            args.name,
            kept.len()
        );
        if kept.is_empty() {
            format_zero_results(&args.name, raw_count, &spec.filters_used())
        } else {
            let container = payload
                .as_object()
                .and_then(|obj| registry.row_container_key(obj))
                .map(str::to_string);
            let shown = replace_rows(&payload, &kept, container.as_deref(), false);
            render_body(&registry, &args, &shown, mode, max_chars)
        }
    } else {
        render_body(&registry, &args, &payload, mode, max_chars)
    };
    println!("{}", EvidenceBlock::for_step(&args.qid, &args.name, body));
    Ok(())
}

fn render_body(
    registry: &KeyRegistry,
    args: &RenderArgs,
    payload: &Value,
    mode: RenderMode,
    max_chars: usize,
) -> String {
    let options = RenderOptions {
        mode,
        max_chars,
        fence_lang: args.fence_lang.clone(),
    };
    format_evidence_block(registry, &args.name, payload, &options)
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let policy: ValidationPolicy = match &args.policy {
        Some(path) => toml::from_str(&read_text(path)?)
            .with_context(|| format!("Invalid validation policy {}", path.display()))?,
        None => ValidationPolicy::default(),
    };
    let blocks = args
        .evidence
        .iter()
        .map(|path| read_text(path))
        .collect::<Result<Vec<_>>>()?;
    let allowed = AllowedTokenSet::from_blocks(&blocks);
    let mut answer = read_text(&args.answer)?;

    let mut autocompleted = Vec::new();
    if args.autocomplete {
        let (fixed, added) = autocomplete_citations(&answer, &allowed, &policy);
        answer = fixed;
        autocompleted = added;
    }

    let mut issues = check_answer(&answer, &allowed, &policy);
    if let Some(path) = &args.strict_template {
        let keys = extract_required_keys(&read_text(path)?);
        issues.extend(validate_required_key_lines(&answer, &keys));
    }
    if let (Some(path), Some(qid)) = (&args.validators, &args.qid) {
        let validators = QuestionValidators::load(path)?;
        let defaults = RunnerPolicy::default().evidence.filters.test_path_patterns;
        issues.extend(validators.check(qid, &answer, &defaults));
    }
    log::info!(
        "validate.done tokens={} issues={} autocompleted={}",
        allowed.len(),
        issues.len(),
        autocompleted.len()
    );

    let output = ValidateOutput {
        ok: issues.is_empty(),
        issues: issues.iter().map(ToString::to_string).collect(),
        autocompleted,
        answer: args.autocomplete.then_some(answer),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    if !output.ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Pack, policy and contract files, labeled for `RUN_MANIFEST.json`.
fn manifest_inputs(args: &RunArgs) -> Vec<(String, PathBuf)> {
    let mut inputs = vec![("pack".to_string(), args.pack.clone())];
    if let Some(policy) = &args.policy {
        inputs.push(("policy".to_string(), policy.clone()));
    }
    if let Some(contract) = &args.contract {
        inputs.push(("contract".to_string(), contract.clone()));
    }
    inputs
}

fn run_pack(args: RunArgs) -> Result<()> {
    let pack = match Pack::load(&args.pack) {
        Ok(pack) => pack,
        Err(err @ OrchestratorError::Io { .. }) => {
            return Err(err).with_context(|| format!("Failed to load pack {}", args.pack.display()))
        }
        Err(err) => exit_fatal(&err),
    };
    let mut policy = load_policy(args.policy.as_deref())?;
    if args.adaptive_top_k {
        policy.adaptive_top_k = true;
    }
    if let Some(mode) = args.quote_bypass {
        policy.quote_bypass = mode;
    }

    let contract = load_contract(args.contract.as_deref())?;
    let registry = discover_keys(
        policy.discovery.clone(),
        &pack.engine,
        contract.as_ref(),
        &args.columns,
        &[],
    );

    let mut backend: Box<dyn ModelBackend> = if let Some(path) = &args.answers {
        Box::new(
            ReplayBackend::from_json_str(&read_text(path)?)
                .with_context(|| format!("Invalid answers file {}", path.display()))?,
        )
    } else if !args.model_cmd.is_empty() {
        Box::new(CommandBackend::new(args.model_cmd.clone()))
    } else {
        log::warn!("run.backend.none: only deterministic questions can be answered");
        Box::new(ReplayBackend::default())
    };

    let mut runner = match Runner::new(pack, policy, registry, &args.out) {
        Ok(runner) => runner
            .with_signature_inputs(args.signature_inputs.clone())
            .with_manifest_inputs(manifest_inputs(&args)),
        Err(err) => exit_fatal(&err),
    };
    if let Some(root) = &args.corpus {
        let universe = PathUniverse::walk(root);
        log::info!("run.corpus.indexed root={} paths={}", root.display(), universe.len());
        runner = runner.with_path_universe(universe);
    }
    let mut preflight = ProcessRunner::new(args.workdir.clone());

    match runner.run(backend.as_mut(), &mut preflight) {
        Ok(summary) => {
            let output = RunOutput {
                ok: summary.is_clean(),
                total: summary.total,
                passed: summary.passed,
                retries: summary.retries,
                report: args.out.join(REPORT_FILE),
                summary: args.out.join(SUMMARY_FILE),
                manifest: args.out.join(MANIFEST_FILE),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) if err.is_gate_abort() || matches!(err, OrchestratorError::Keys(_)) => exit_fatal(&err),
        Err(err) => Err(err).context("Run failed"),
    }
}
