// netpanel CLI - run network-device operations as supervised background jobs

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use netpanel::config::{Backend, PanelConfig};
use netpanel::executor::{JobSupervisor, TickOutcome};
use netpanel::job::{
    CommitFlag, DiffMode, JobForm, JobState, OperationKind, TransferDirection, WriteStyle,
    OPERATIONS,
};
use netpanel::output::{OutputFormat, OutputSurface, OutputWriter, PanelError};
use netpanel::template::{TemplateField, TemplateLoad, TemplateRecord, TemplateStore};

#[derive(Parser)]
#[command(
    name = "netpanel",
    about = "Run operations against network devices as background jobs",
    version,
    disable_colored_help = true,
    term_width = 0
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    output_format: String,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Run one job against one or more devices
    Run {
        #[command(flatten)]
        form: FormArgs,

        /// Template to load before applying flags
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Skip the defaults template
        #[arg(long)]
        no_defaults: bool,

        /// Operation backend (ssh or process)
        #[arg(long)]
        backend: Option<String>,

        /// Driver program for the process backend
        #[arg(long)]
        program: Option<PathBuf>,
    },

    /// Manage form templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// List the available operations
    Operations,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Save the current form to a template file
    Save {
        /// Destination template file
        path: PathBuf,

        #[command(flatten)]
        form: FormArgs,

        /// Template to start from
        #[arg(long)]
        from: Option<PathBuf>,

        /// Skip the defaults template
        #[arg(long)]
        no_defaults: bool,
    },

    /// Print the fields of a template file
    Show {
        path: PathBuf,
    },
}

/// Form fields settable from the command line
#[derive(Args, Debug, Default)]
struct FormArgs {
    /// Host, comma-separated hosts, or a file with one host per line
    #[arg(short = 'H', long)]
    hosts: Option<String>,

    #[arg(short, long)]
    username: Option<String>,

    /// Password (insecure - prefer --ask-pass)
    #[arg(long)]
    password: Option<String>,

    /// Prompt for the password
    #[arg(short = 'k', long)]
    ask_pass: bool,

    #[arg(long)]
    port: Option<String>,

    /// Connect timeout in seconds
    #[arg(long)]
    conn_timeout: Option<String>,

    /// Session timeout in seconds
    #[arg(long)]
    timeout: Option<String>,

    /// Operation name or label (see `netpanel operations`)
    #[arg(short, long)]
    operation: Option<String>,

    /// Commands, second device or transfer source, depending on the operation
    #[arg(short, long = "arg")]
    argument: Option<String>,

    /// File transfer destination
    #[arg(long)]
    destination: Option<String>,

    /// File transfer direction (push or pull)
    #[arg(long)]
    direction: Option<String>,

    /// Ask the device for XML replies
    #[arg(long)]
    xml: bool,

    /// Diff presentation (set or stanza)
    #[arg(long)]
    diff_mode: Option<String>,

    /// Also write output to this file
    #[arg(short, long)]
    write_to: Option<String>,

    /// Write one file per host instead of a single file
    #[arg(long)]
    per_host: bool,

    #[arg(long)]
    commit_check: bool,

    #[arg(long)]
    commit_blank: bool,

    #[arg(long)]
    commit_synchronize: bool,

    /// Commit confirmed, rolling back after this many minutes
    #[arg(long, value_name = "MINUTES")]
    commit_confirmed: Option<String>,

    /// Commit at a time, hh:mm[:ss] or "yyyy-mm-dd hh:mm[:ss]"
    #[arg(long, value_name = "TIME")]
    commit_at: Option<String>,

    #[arg(long)]
    commit_comment: Option<String>,
}

impl FormArgs {
    /// Overlay the flags that were given onto the form
    fn apply(&self, form: &mut JobForm) -> Result<(), PanelError> {
        if let Some(ref op) = self.operation {
            let kind =
                OperationKind::from_str(op).map_err(|m| PanelError::validation("Option", m))?;
            form.select_operation(kind);
        }

        for (value, slot) in [
            (&self.hosts, &mut form.hosts),
            (&self.username, &mut form.username),
            (&self.password, &mut form.secret),
            (&self.port, &mut form.port),
            (&self.conn_timeout, &mut form.connect_timeout),
            (&self.timeout, &mut form.session_timeout),
            (&self.argument, &mut form.first_argument),
            (&self.destination, &mut form.transfer_destination),
        ] {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        if let Some(ref direction) = self.direction {
            form.transfer_direction = TransferDirection::from_str(direction)
                .map_err(|m| PanelError::validation("SCPDirection", m))?;
        }
        if let Some(ref mode) = self.diff_mode {
            form.diff_mode =
                DiffMode::from_str(mode).map_err(|m| PanelError::validation("DiffMode", m))?;
        }
        if self.xml {
            form.xml_format = true;
        }

        if let Some(ref location) = self.write_to {
            form.write_to_file = true;
            form.write_location = location.clone();
        }
        if self.per_host {
            form.write_style = WriteStyle::Multiple;
        }

        self.apply_commit(form)
    }

    fn apply_commit(&self, form: &mut JobForm) -> Result<(), PanelError> {
        let wants_commit = self.commit_check
            || self.commit_blank
            || self.commit_synchronize
            || self.commit_confirmed.is_some()
            || self.commit_at.is_some()
            || self.commit_comment.is_some();
        if !wants_commit {
            return Ok(());
        }
        if form.operation != OperationKind::CommitSet {
            return Err(PanelError::validation(
                "Option",
                "Commit options only apply to the 'commit-set' operation.",
            ));
        }

        if self.commit_blank {
            form.commit.set(CommitFlag::Blank, true);
        }
        if self.commit_synchronize {
            form.commit.set(CommitFlag::Synchronize, true);
        }
        if let Some(ref minutes) = self.commit_confirmed {
            form.commit.set(CommitFlag::Confirmed, true);
            form.commit_confirmed_minutes = minutes.clone();
        }
        if let Some(ref at) = self.commit_at {
            form.commit.set(CommitFlag::At, true);
            form.commit_at_time = at.clone();
        }
        if let Some(ref comment) = self.commit_comment {
            form.commit.set(CommitFlag::Comment, true);
            form.commit_comment = comment.clone();
        }
        // Check excludes almost everything else, so it goes last to win
        if self.commit_check {
            form.commit.set(CommitFlag::Check, true);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output_format = OutputFormat::from_str(&cli.output_format).unwrap_or_else(|_| {
        eprintln!("Invalid output format: {}. Using 'text'.", cli.output_format);
        OutputFormat::Text
    });
    let mut out = OutputWriter::new(output_format, cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run {
            form,
            template,
            no_defaults,
            backend,
            program,
        } => {
            run_job(
                &form,
                template.as_deref(),
                no_defaults,
                backend,
                program,
                &mut out,
            )
            .await
        }
        Commands::Template { action } => match action {
            TemplateAction::Save {
                path,
                form,
                from,
                no_defaults,
            } => save_template(&path, &form, from.as_deref(), no_defaults, &mut out),
            TemplateAction::Show { path } => show_template(&path, &mut out),
        },
        Commands::Operations => {
            list_operations();
            Ok(0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            match e.downcast_ref::<PanelError>() {
                Some(panel) => eprint!("{}", panel),
                None => eprintln!("{}: {:#}", "ERROR".red().bold(), e),
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "netpanel=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run_job(
    args: &FormArgs,
    template: Option<&Path>,
    no_defaults: bool,
    backend: Option<String>,
    program: Option<PathBuf>,
    out: &mut OutputWriter,
) -> anyhow::Result<i32> {
    let mut config = PanelConfig::from_env();
    if let Some(backend) = backend {
        let backend =
            Backend::from_str(&backend).map_err(|m| PanelError::validation("backend", m))?;
        config = config.with_backend(backend);
    }
    if let Some(program) = program {
        config = config.with_program(program);
    }

    let form = build_form(&config, args, template, no_defaults, out)?;
    let dispatch = config.dispatch_table()?;
    if !dispatch.supports(form.operation) {
        return Err(PanelError::Runtime {
            message: format!(
                "'{}' is not supported by the {:?} backend",
                form.operation.label(),
                config.backend
            ),
            suggestion: Some("Use --backend process with a driver program".to_string()),
        }
        .into());
    }

    let mut supervisor = JobSupervisor::new(dispatch).with_poll_interval(config.poll_interval);
    supervisor.submit(&form, out)?;

    let state = drive(&mut supervisor, out).await;
    Ok(match state {
        JobState::Completed => 0,
        JobState::Cancelled => 130,
        _ => 1,
    })
}

/// Poll until the job ends; the first Ctrl-C cancels, the second exits
async fn drive(supervisor: &mut JobSupervisor, out: &mut OutputWriter) -> JobState {
    let mut interval = tokio::time::interval(supervisor.poll_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = interval.tick() => match supervisor.tick(out) {
                TickOutcome::Finished(state) => return state,
                TickOutcome::Idle => return supervisor.state(),
                TickOutcome::Running => {}
            },
            _ = &mut ctrl_c => {
                if interrupted {
                    tracing::warn!("second interrupt, exiting without waiting for the job");
                    std::process::exit(130);
                }
                interrupted = true;
                supervisor.cancel(out);
                ctrl_c.set(tokio::signal::ctrl_c());
            }
        }
    }
}

/// Defaults template, then an explicit template, then flags
fn build_form(
    config: &PanelConfig,
    args: &FormArgs,
    template: Option<&Path>,
    no_defaults: bool,
    out: &mut OutputWriter,
) -> anyhow::Result<JobForm> {
    let mut form = JobForm::new();

    if !no_defaults {
        if let Some(loaded) = config.load_defaults(&mut form) {
            if let Some(ref path) = config.defaults_path {
                report_template_issues(path, &loaded, out);
            }
        }
    }

    if let Some(path) = template {
        let loaded = TemplateStore::load_into(path, &mut form).map_err(PanelError::from)?;
        report_template_issues(path, &loaded, out);
    }

    args.apply(&mut form)?;
    if args.ask_pass {
        form.secret = prompt_password("Password: ")?;
    }
    Ok(form)
}

/// Report every issue of one load together
fn report_template_issues(path: &Path, loaded: &TemplateLoad, out: &mut OutputWriter) {
    if !loaded.unknown.is_empty() {
        tracing::info!(fields = ?loaded.unknown, "ignored unknown template fields");
    }
    if loaded.issues.is_empty() {
        return;
    }

    let lines: Vec<String> = loaded.issues.iter().map(|i| format!("  {}", i)).collect();
    out.notice(&PanelError::resource(
        format!(
            "template loaded with {} issue(s):\n{}",
            loaded.issues.len(),
            lines.join("\n")
        ),
        Some(path.to_path_buf()),
    ));
}

fn save_template(
    path: &Path,
    args: &FormArgs,
    from: Option<&Path>,
    no_defaults: bool,
    out: &mut OutputWriter,
) -> anyhow::Result<i32> {
    let config = PanelConfig::from_env();
    let form = build_form(&config, args, from, no_defaults, out)?;

    let record = TemplateRecord::from_form(&form);
    TemplateStore::save(&record, path).map_err(PanelError::from)?;

    println!("{} {}", "Template saved to".green(), path.display());
    if !form.secret.is_empty() {
        println!("{}", insecure_secret_warning());
    }
    Ok(0)
}

fn show_template(path: &Path, out: &mut OutputWriter) -> anyhow::Result<i32> {
    let loaded = TemplateStore::load(path).map_err(PanelError::from)?;

    for (field, value) in loaded.record.iter() {
        let shown = if field.is_secret() && !value.is_empty() {
            "********"
        } else {
            value
        };
        println!("{:<22} {}", field.name().cyan(), shown);
    }
    if loaded.record.get(TemplateField::Password).is_some() {
        println!();
        println!("{}", insecure_secret_warning());
    }
    for name in &loaded.unknown {
        println!("{} {}", "Ignored unknown field:".dimmed(), name);
    }

    report_template_issues(path, &loaded, out);
    Ok(if loaded.issues.is_empty() { 0 } else { 1 })
}

fn insecure_secret_warning() -> ColoredString {
    "Warning: the password is stored base64-encoded, which is NOT encryption. \
     Protect this file like the password itself."
        .yellow()
}

fn list_operations() {
    println!("{}", "OPERATIONS".green().bold());
    println!("{}", "─".repeat(60).dimmed());
    for spec in OPERATIONS.iter() {
        let input = if spec.needs_input { "needs --arg" } else { "" };
        println!(
            "  {:<18} {:<24} {}",
            spec.kind.slug().cyan(),
            spec.label,
            input.dimmed()
        );
    }
}

fn prompt_password(prompt: &str) -> Result<String, PanelError> {
    // Prompt on stderr so it appears even with redirected stdout
    eprint!("{}", prompt.cyan());
    io::stderr().flush().ok();

    let password = rpassword::read_password().map_err(|e| PanelError::Runtime {
        message: format!("Failed to read password: {}", e),
        suggestion: Some("Try using --password instead of --ask-pass".to_string()),
    })?;

    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(PanelError::Runtime {
            message: "Password cannot be empty".to_string(),
            suggestion: Some("Enter a password when prompted".to_string()),
        });
    }
    Ok(password)
}
