//! benchling-webhook — deploy and monitor the Benchling webhook stack
//!
//! deploy  → classify the existing stack, decide, recover if needed, cdk deploy
//! status  → aggregate stack health once, or poll until it settles

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use benchling_webhook::cdk::{CdkApp, Verbosity};
use benchling_webhook::error::AppError;
use benchling_webhook::health::DEFAULT_EVENT_LIMIT;
use benchling_webhook::models::ResourceInventory;
use benchling_webhook::poll::parse_refresh_interval;
use benchling_webhook::profile::{DeploymentMode, ProfileConfig, ProfileStore};
use benchling_webhook::recovery::manual_commands;
use benchling_webhook::remediation::migration_instructions;
use benchling_webhook::{
    arn, aws, classify, decide, report, run_poll_loop, Action, AwsCli, CloudApi, Decision,
    HealthAggregator, InteractionMode, Interrupt, PollOptions, PollOutcome, StackRecovery,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "benchling-webhook", about = "Deploy and monitor the Benchling webhook on AWS", version)]
struct Cli {
    /// Configuration profile
    #[arg(long, global = true, env = "BENCHLING_WEBHOOK_PROFILE", default_value = "default")]
    profile: String,
    /// AWS region (defaults to the stack ARN's region, then the profile)
    #[arg(long, global = true)]
    region: Option<String>,
    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Deploy or update the webhook stack
    Deploy {
        /// Accept destructive recovery without prompting
        #[arg(long)]
        yes: bool,
        /// Never prompt; abort when a decision is required
        #[arg(long)]
        non_interactive: bool,
        /// Docker image tag to deploy
        #[arg(long)]
        image_tag: Option<String>,
        /// Directory containing the CDK app
        #[arg(long, default_value = ".")]
        app_dir: PathBuf,
    },
    /// Show stack, ECS, ALB, secret and event status
    Status {
        /// Refresh interval (e.g. 10, 10s, 1m). 0 shows status once
        #[arg(long, default_value = "0")]
        refresh: String,
        /// Keep watching after the deployment settles
        #[arg(long)]
        no_exit: bool,
        /// Do not clear the screen between refreshes
        #[arg(long)]
        no_clear: bool,
        /// Number of recent stack events to show
        #[arg(long, default_value_t = DEFAULT_EVENT_LIMIT)]
        events: usize,
    },
    /// Destroy the standalone webhook stack
    Destroy {
        #[arg(long)]
        yes: bool,
        #[arg(long, default_value = ".")]
        app_dir: PathBuf,
    },
    /// Inspect or edit the profile configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved profile
    Show,
    /// Set one field (e.g. imageTag 0.7.3)
    Set { key: String, value: String },
    /// List profiles
    List,
}

const EXIT_ABORTED: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    let verbosity = match (cli.verbose, cli.quiet) {
        (true, _) => Verbosity::Verbose,
        (_, true) => Verbosity::Quiet,
        _ => Verbosity::Normal,
    };
    init_logging(verbosity);

    if let Err(e) = run_cli(cli, verbosity) {
        eprintln!("Error: {:#}", e);
        let code = match e.downcast_ref::<AppError>() {
            Some(AppError::Aborted(_)) => EXIT_ABORTED,
            Some(AppError::Interrupted) => EXIT_INTERRUPTED,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn init_logging(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Quiet => "error",
        Verbosity::Normal => "warn",
        Verbosity::Verbose => "benchling_webhook=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Resolved profile plus the AWS handle built from it.
struct Session {
    profile: String,
    config: ProfileConfig,
    region: String,
    verbosity: Verbosity,
    interrupt: Interrupt,
}

impl Session {
    fn api(&self) -> AwsCli {
        AwsCli::new(&self.region, self.config.aws_profile.as_deref())
    }

    fn cdk(&self, dir: PathBuf) -> CdkApp {
        CdkApp::new(dir, &self.region, self.config.aws_profile.as_deref(), self.verbosity)
    }
}

fn run_cli(cli: Cli, verbosity: Verbosity) -> anyhow::Result<()> {
    let store = ProfileStore::default_location();

    let command = match cli.command {
        Cmd::Config { action } => return run_config(&store, &cli.profile, &action),
        other => other,
    };

    let config = store.load(&cli.profile)?;
    let region = config.resolve_region(cli.region.as_deref(), || {
        aws::get_region(config.aws_profile.as_deref())
    });
    let interrupt = Interrupt::new();
    interrupt.install_ctrlc()?;
    let ctx = Session { profile: cli.profile, config, region, verbosity, interrupt };

    match command {
        Cmd::Deploy { yes, non_interactive, image_tag, app_dir } => {
            let mode = if yes {
                InteractionMode::Force
            } else if non_interactive || !io::stdin().is_terminal() {
                InteractionMode::NonInteractive
            } else {
                InteractionMode::Interactive
            };
            run_deploy(&ctx, mode, image_tag, app_dir)
        }
        Cmd::Status { refresh, no_exit, no_clear, events } => {
            run_status(&ctx, &refresh, !no_exit, !no_clear, events)
        }
        Cmd::Destroy { yes, app_dir } => run_destroy(&ctx, yes, app_dir),
        Cmd::Config { .. } => Ok(()),
    }
}

// ── deploy ────────────────────────────────────────────────────────────────────

fn run_deploy(
    ctx: &Session,
    mode: InteractionMode,
    image_tag: Option<String>,
    app_dir: PathBuf,
) -> anyhow::Result<()> {
    let stack = ctx.config.target_stack()?;
    let api = ctx.api();

    if ctx.config.deployment_mode == DeploymentMode::Integrated {
        let snapshot = api.describe_stack(&stack)?;
        println!("Profile '{}' is integrated into Quilt stack {}.", ctx.profile, arn::stack_name(&stack));
        if let Some(toggle) = snapshot.as_ref().and_then(|s| s.webhook_toggle()) {
            println!("  BenchlingWebhook parameter: {}", toggle);
        }
        println!("Update the Quilt stack's BenchlingWebhook parameter to enable or update the webhook.");
        return Ok(());
    }

    let snapshot = api.describe_stack(&stack)?;
    let category = classify(snapshot.as_ref().map(|s| s.raw_status.as_str()));
    let inventory = match &snapshot {
        Some(_) => api.describe_stack_resources(&stack).unwrap_or_else(|e| {
            warn!(error = %e, "could not list stack resources; skipping architecture check");
            ResourceInventory::default()
        }),
        None => ResourceInventory::default(),
    };

    let decision = decide(category, &inventory, mode);
    if let Some(s) = &snapshot {
        println!("Stack {} is {} ({})", stack, s.raw_status, category.as_str());
    }
    if decision.action != Action::Proceed || decision.needs_confirmation {
        print!("{}", report::render_decision(&decision));
    }

    match choose_action(&decision, mode, &ctx.interrupt)? {
        Action::Proceed | Action::ProceedAnyway => {}
        Action::DestroyThenRecreate => {
            if snapshot.is_some() {
                ctx.interrupt.check()?;
                recover_stack(ctx, &api, &stack)?;
            }
        }
        Action::MigrationRequired => {
            println!("\nMigration steps:");
            for (i, step) in migration_instructions(&stack, &ctx.region).iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
            return Err(AppError::Aborted("legacy REST API architecture".to_string()).into());
        }
        Action::Abort | Action::AbortOrWait => {
            return Err(AppError::Aborted(decision.rationale.clone()).into());
        }
    }

    let context = [
        ("imageTag", image_tag.or_else(|| ctx.config.image_tag.clone()).unwrap_or_default()),
        ("benchlingSecretArn", ctx.config.benchling_secret_arn.clone().unwrap_or_default()),
        ("quiltStackArn", ctx.config.quilt_stack_arn.clone().unwrap_or_default()),
        ("catalogUrl", ctx.config.catalog_url.clone().unwrap_or_default()),
    ];
    ctx.interrupt.check()?;
    println!("Deploying {} to {}...", stack, ctx.region);
    ctx.interrupt.or_interrupted(ctx.cdk(app_dir).deploy(&stack, &context))?;

    let result = HealthAggregator::new(&api).aggregate(&stack)?;
    print!("{}", report::render_status(&result, None));
    if let Some(endpoint) = result.stack.endpoint() {
        println!("\nWebhook endpoint: {}", endpoint);
    }
    Ok(())
}

/// Settle on one action, prompting when the mode allows it.
fn choose_action(decision: &Decision, mode: InteractionMode, interrupt: &Interrupt) -> anyhow::Result<Action> {
    if !mode.can_prompt() || (decision.alternatives.is_empty() && !decision.needs_confirmation) {
        return Ok(decision.action);
    }
    let options = decision.options();
    let choice = if options.len() == 1 {
        decision.action
    } else {
        eprintln!();
        for (i, a) in options.iter().enumerate() {
            eprintln!("  [{}] {}{}", i + 1, a.as_str(), if i == 0 { " (default)" } else { "" });
        }
        decision.choose(&prompt("Choice: ", interrupt)?)?
    };
    if choice == Action::DestroyThenRecreate
        && !confirm("This deletes the stack and all its resources. Continue?", interrupt)?
    {
        return Err(AppError::Aborted("stack deletion declined".to_string()).into());
    }
    Ok(choice)
}

fn recover_stack(ctx: &Session, api: &dyn CloudApi, stack: &str) -> anyhow::Result<()> {
    let recovery = StackRecovery::new(api, &ctx.interrupt);
    if let Err(e) = recovery.recover(stack, |line| println!("{}", line)) {
        eprintln!("\nRecovery failed. Finish it by hand:");
        for cmd in manual_commands(&arn::stack_name(stack), &ctx.region) {
            eprintln!("  {}", cmd);
        }
        return Err(e.into());
    }
    Ok(())
}

// ── status ────────────────────────────────────────────────────────────────────

fn run_status(
    ctx: &Session,
    refresh: &str,
    exit_on_terminal: bool,
    clear: bool,
    events: usize,
) -> anyhow::Result<()> {
    let stack = ctx.config.target_stack()?;
    let api = ctx.api();
    let aggregator = HealthAggregator::new(&api).with_event_limit(events);
    let interval = parse_refresh_interval(refresh);
    let clear = clear && interval.is_some();

    let outcome = run_poll_loop(
        PollOptions { interval, exit_on_terminal },
        &ctx.interrupt,
        || aggregator.aggregate(&stack),
        |result, tick| {
            if clear {
                if let Err(e) = report::clear_screen() {
                    debug!(error = %e, "could not clear screen");
                }
            }
            print!("{}", report::render_status(result, Some(tick)));
        },
    )?;
    if outcome == PollOutcome::Interrupted {
        println!("\nStopped.");
    }
    Ok(())
}

// ── destroy ───────────────────────────────────────────────────────────────────

fn run_destroy(ctx: &Session, yes: bool, app_dir: PathBuf) -> anyhow::Result<()> {
    if ctx.config.deployment_mode == DeploymentMode::Integrated {
        return Err(AppError::Aborted(
            "integrated deployments are removed by disabling BenchlingWebhook on the Quilt stack".to_string(),
        )
        .into());
    }
    let stack = ctx.config.target_stack()?;
    if !yes {
        if !io::stdin().is_terminal() {
            return Err(AppError::Aborted("rerun with --yes to destroy without a terminal".to_string()).into());
        }
        if !confirm(&format!("Destroy {} in {}?", stack, ctx.region), &ctx.interrupt)? {
            return Err(AppError::Aborted("destroy declined".to_string()).into());
        }
    }
    ctx.interrupt.check()?;
    ctx.interrupt.or_interrupted(ctx.cdk(app_dir).destroy(&stack))?;
    println!("Stack {} destroyed.", stack);
    Ok(())
}

// ── config ────────────────────────────────────────────────────────────────────

fn run_config(store: &ProfileStore, profile: &str, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = store.load(profile)?;
            println!("Profile:  {} ({})", profile, store.path(profile).display());
            println!("Mode:     {}", config.deployment_mode.as_str());
            println!("Stack:    {}", config.target_stack().unwrap_or_else(|e| e.to_string()));
            println!("Region:   {}", config.resolve_region(None, || "(from environment)".to_string()));
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = if store.exists(profile) { store.load(profile)? } else { ProfileConfig::default() };
            config.set(key, value)?;
            store.save(profile, &config)
                .with_context(|| format!("saving profile '{}'", profile))?;
            println!("{} = {}", key, value);
        }
        ConfigAction::List => {
            for name in store.list()? {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

// ── prompts ───────────────────────────────────────────────────────────────────

/// Read one answer. Ctrl-C cannot break a blocking read, so the flag is
/// checked once the line arrives and the answer is discarded if it is set.
fn prompt(label: &str, interrupt: &Interrupt) -> anyhow::Result<String> {
    eprint!("{}", label);
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    interrupt.check()?;
    Ok(s.trim().to_string())
}

fn confirm(question: &str, interrupt: &Interrupt) -> anyhow::Result<bool> {
    let answer = prompt(&format!("{} [y/N] ", question), interrupt)?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
