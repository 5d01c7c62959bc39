mod collector;
mod config;
mod enumerate;
mod field;
mod portal;
mod record;
mod report;
mod session;
#[cfg(test)]
mod testing;

use crate::collector::CollectOptions;
use crate::config::{PortalConfig, Scope as ConfigScope, resolve_portal, save};
use crate::enumerate::{Scope, list_devices};
use crate::portal::PortalClient;
use crate::report::{ReportOptions, run_report};
use crate::session::{PortalSession, SessionGuard};
use anyhow::{Context, Result};
use clap::{ArgAction, ArgGroup, Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cteractl",
    version,
    about = "CLI for CTERA Portal and Edge Filer administration"
)]
struct Cli {
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v info, -vv debug); RUST_LOG overrides"
    )]
    verbose: u8,

    #[arg(
        long,
        short = 'o',
        value_enum,
        default_value_t = OutputFormat::Pretty,
        global = true,
        help = "Output format for listings"
    )]
    output: OutputFormat,

    #[arg(long, global = true, help = "Skip TLS certificate verification")]
    insecure: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist portal credentials to the chosen scope
    Configure {
        #[arg(long)]
        address: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(
            long,
            default_value_t = false,
            help = "Enable TLS verification for the portal (self-signed certs may require disabling)"
        )]
        verify_tls: bool,
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
    },
    /// Write a CSV status report for connected filers (appends to existing files)
    ShowStatus(ShowStatusArgs),
    /// List connected filers
    Devices {
        #[command(flatten)]
        portal: PortalArgs,
        #[arg(long, conflicts_with = "tenant", help = "Cover every tenant")]
        all_tenants: bool,
        #[arg(long, help = "Only this tenant")]
        tenant: Option<String>,
    },
    /// List tenants
    Tenants {
        #[command(flatten)]
        portal: PortalArgs,
    },
    /// Log in and out with the stored credentials
    Validate {
        #[command(flatten)]
        portal: PortalArgs,
    },
    /// Show current configuration (secrets masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("scope")
        .required(true)
        .args(["all_tenants", "tenant"])
))]
struct ShowStatusArgs {
    #[arg(value_name = "ADDRESS", help = "Portal host name or URL")]
    address: String,
    #[arg(value_name = "USERNAME")]
    username: String,
    #[arg(value_name = "PASSWORD")]
    password: String,
    #[arg(value_name = "OUTPUT_CSV")]
    output_file: PathBuf,
    #[arg(long, help = "Report on every tenant")]
    all_tenants: bool,
    #[arg(long, help = "Report on one tenant")]
    tenant: Option<String>,
    #[arg(
        long,
        requires = "tenant",
        conflicts_with = "all_tenants",
        help = "Report on one filer of --tenant"
    )]
    device: Option<String>,
    #[arg(
        long,
        help = "Do not measure the filer database (avoids enabling the remote shell)"
    )]
    skip_db_size: bool,
}

impl ShowStatusArgs {
    fn scope(&self) -> Scope {
        match (&self.tenant, &self.device) {
            (Some(tenant), Some(name)) => Scope::SingleDevice {
                name: name.clone(),
                tenant: tenant.clone(),
            },
            (Some(tenant), None) => Scope::OneTenant(tenant.clone()),
            (None, _) => Scope::AllTenants,
        }
    }
}

/// Per-call overrides for the stored portal credentials.
#[derive(Args, Default)]
struct PortalArgs {
    #[arg(long, help = "Portal host name or URL")]
    address: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    password: Option<String>,
}

impl PortalArgs {
    fn overrides(&self) -> Option<PortalConfig> {
        if self.address.is_none() && self.username.is_none() && self.password.is_none() {
            return None;
        }
        Some(PortalConfig {
            address: self.address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            verify_tls: false,
        })
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for ConfigScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => ConfigScope::Local,
            ScopeArg::User => ConfigScope::User,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cwd = std::env::current_dir().context("reading current directory")?;

    match cli.command {
        Commands::Configure {
            address,
            username,
            password,
            verify_tls,
            scope,
        } => {
            let mut existing = config::load_scope(scope.into(), &cwd)?;
            existing.portal = Some(PortalConfig {
                address: Some(address),
                username: Some(username),
                password: Some(password),
                verify_tls,
            });
            let path = save(scope.into(), &existing, &cwd)?;
            println!("Saved portal credentials to {}", path.display());
        }
        Commands::ShowStatus(args) => show_status(&args, cli.insecure)?,
        Commands::Devices {
            portal,
            all_tenants,
            tenant,
        } => {
            let mut session = open_session(&cwd, &portal, cli.insecure)?;
            let scope = match tenant {
                Some(tenant) => Scope::OneTenant(tenant),
                None => {
                    if !all_tenants {
                        info!("no --tenant given; listing every tenant");
                    }
                    Scope::AllTenants
                }
            };
            let devices = list_devices(&mut *session, &scope);
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&devices)?),
                OutputFormat::Pretty => print_table(
                    &["tenant", "name", "connected"],
                    devices
                        .iter()
                        .map(|d| vec![d.tenant.clone(), d.name.clone(), d.connected.to_string()])
                        .collect(),
                ),
            }
        }
        Commands::Tenants { portal } => {
            let mut session = open_session(&cwd, &portal, cli.insecure)?;
            session.browse_global_admin()?;
            let tenants = session.tenants()?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tenants)?),
                OutputFormat::Pretty => print_table(
                    &["name"],
                    tenants.iter().map(|t| vec![t.name.clone()]).collect(),
                ),
            }
        }
        Commands::Validate { portal } => {
            println!("Validating portal credentials...");
            match open_session(&cwd, &portal, cli.insecure) {
                Ok(session) => println!("Portal {}: ok", session.base_url()),
                Err(e) => println!("Portal: FAILED ({:#})", e),
            }
        }
        Commands::ConfigShow => {
            let merged = config::load(&cwd)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&config::masked(&merged))?
            );
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cteractl={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn show_status(args: &ShowStatusArgs, insecure: bool) -> Result<()> {
    let client =
        PortalClient::connect(&args.address, &args.username, &args.password, !insecure)?;
    let mut session = SessionGuard::new(client);
    let scope = args.scope();
    let options = ReportOptions {
        collect: CollectOptions {
            db_size: !args.skip_db_size,
        },
    };

    let summary = run_report(&mut *session, &scope, &args.output_file, &options)?;
    if summary.header_written {
        info!(path = %args.output_file.display(), "started new report");
    }
    if summary.devices == 0
        && let Scope::SingleDevice { name, tenant } = &scope
    {
        warn!(%tenant, device = %name, "device not found or not connected");
    }
    println!(
        "Wrote {} row(s) to {}",
        summary.rows_written,
        display_path(&args.output_file)
    );
    Ok(())
}

fn open_session(
    cwd: &Path,
    portal: &PortalArgs,
    insecure: bool,
) -> Result<SessionGuard<PortalClient>> {
    let effective = resolve_portal(cwd, portal.overrides())?;
    let verify_tls = effective.verify_tls && !insecure;
    let client = PortalClient::connect(
        &effective.address,
        &effective.username,
        &effective.password,
        verify_tls,
    )?;
    Ok(SessionGuard::new(client))
}

fn display_path(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    if rows.is_empty() {
        println!("No resources found.");
        return;
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.len());
        }
    }

    for (i, col) in headers.iter().enumerate() {
        if i > 0 {
            print!("  ");
        }
        print!("{:width$}", col, width = widths[i]);
    }
    println!();
    // Separator
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            print!("  ");
        }
        print!("{:-<width$}", "", width = *width);
    }
    println!();
    // Rows
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                print!("  ");
            }
            print!("{:width$}", cell, width = widths[i]);
        }
        println!();
    }
}
