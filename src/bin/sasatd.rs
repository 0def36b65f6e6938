use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use sasat::config::properties::DEFAULT_PROPERTY_FILE;
use sasat::config::{self, Role};

#[derive(Parser)]
#[command(name = "sasatd")]
#[command(about = "SASAT front and backend translators")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the front translator
    Front {
        /// Property file, or a TOML file when it ends in .toml
        #[arg(short, long, default_value = DEFAULT_PROPERTY_FILE)]
        config: PathBuf,
    },
    /// Run a backend translator
    Backend {
        /// Property file, or a TOML file when it ends in .toml
        #[arg(short, long, default_value = DEFAULT_PROPERTY_FILE)]
        config: PathBuf,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        #[arg(short, long, default_value = DEFAULT_PROPERTY_FILE)]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value_t = RoleArg::Front)]
        role: RoleArg,
    },
    /// Check the configuration without starting
    Validate {
        #[arg(short, long, default_value = DEFAULT_PROPERTY_FILE)]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value_t = RoleArg::Front)]
        role: RoleArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Front,
    Backend,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Front => Role::Front,
            RoleArg::Backend => Role::Backend,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Front { config } => cmd_run(Role::Front, &config),
        Commands::Backend { config } => cmd_run(Role::Backend, &config),
        Commands::Config { action } => match action {
            ConfigAction::Show { config, role } => cmd_config_show(&config, role.into()),
            ConfigAction::Validate { config, role } => cmd_config_validate(&config, role.into()),
        },
    };
    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(role: Role, path: &Path) -> Result<(), String> {
    let config = config::load(path, role).map_err(|e| e.to_string())?;

    let result = config::validate(&config, role);
    result.print_diagnostics();
    if result.has_errors() {
        return Err("configuration has errors".to_string());
    }

    sasat::app::run(role, config).map_err(|e| e.to_string())
}

fn cmd_config_show(path: &Path, role: Role) -> Result<(), String> {
    let config = config::load(path, role).map_err(|e| e.to_string())?;
    let text = toml::to_string_pretty(&config).map_err(|e| e.to_string())?;
    print!("{}", text);
    Ok(())
}

fn cmd_config_validate(path: &Path, role: Role) -> Result<(), String> {
    println!("Validating {} for the {} translator...", path.display(), role);
    let config = config::load(path, role).map_err(|e| e.to_string())?;

    let result = config::validate(&config, role);
    result.print_diagnostics();
    if result.has_errors() {
        return Err("Validation failed".to_string());
    }
    println!("[OK] Configuration is valid");
    Ok(())
}
