mod cli;

use anyhow::Context;
use provconf::schema::{SchemaDocument, Schemas};
use provconf::schema_cache::SchemaCache;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("PROVCONF_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    // one cache for the whole process, it outlives every configuration load
    let cache = SchemaCache::new();

    let command_result = match cli.command {
        cli::Command::Show(show_cli) => show(show_cli, &cache),
        cli::Command::Validate(validate_cli) => validate(validate_cli, &cache),
    };

    match command_result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(true)` on success
pub fn show(cli: cli::ShowCommand, cache: &SchemaCache) -> anyhow::Result<bool> {
    let work_dir = std::env::current_dir()?;

    let config = if cli.single_module {
        if cli.schemas.schemas.is_some() {
            tracing::warn!("--schemas is not used with --single-module");
        }
        let root = provconf::loader::load_module_dir(&work_dir)?;
        provconf::jsonconfig::marshal_single_module(&provconf::module_tree::ModuleTree::new(root))?
    } else {
        let tree = provconf::loader::load_module_tree(&work_dir)?;
        let schemas = load_schemas(&cli.schemas, cache, &tree)?;
        provconf::jsonconfig::marshal(&tree, &schemas)
            .context("Failed to marshal configuration, are the provider schemas complete? (--schemas)")?
    };

    output(&cli.output, &config)?;
    Ok(true)
}

/// Returns `Ok(false)` when errors were found
pub fn validate(cli: cli::ValidateCommand, cache: &SchemaCache) -> anyhow::Result<bool> {
    use provconf::collector::{collect, Mode};
    use provconf::eval::ModuleValues;
    use provconf::instances::ProviderExpansions;
    use provconf::validate::{validate_prior_state, PriorResourceInstance};

    let tree = provconf::loader::load_module_tree(&std::env::current_dir()?)?;
    let schemas = load_schemas(&cli.schemas, cache, &tree)?;
    let collection = collect(&tree, Mode::Full(&schemas));

    let mut diagnostics = provconf::validate::validate(&tree, &collection);

    if let Some(state_path) = &cli.state {
        let state = std::fs::read_to_string(state_path)
            .with_context(|| format!("Failed to read {}", state_path.display()))?;
        let prior: Vec<PriorResourceInstance> = serde_json::from_str(&state)
            .with_context(|| format!("Invalid prior state in {}", state_path.display()))?;

        let values = ModuleValues::new(&tree);
        let expansions = ProviderExpansions::evaluate(&values, &collection.configs);
        diagnostics.extend(validate_prior_state(&collection.configs, &expansions, &prior));
    }

    if !diagnostics.is_empty() {
        eprintln!("{diagnostics}");
    }
    tracing::info!(
        errors = diagnostics.errors().count(),
        warnings = diagnostics.warnings().count(),
        "validation done"
    );

    Ok(!diagnostics.has_errors())
}

fn load_schemas(
    args: &cli::SchemaArgs,
    cache: &SchemaCache,
    tree: &provconf::module_tree::ModuleTree,
) -> anyhow::Result<Schemas> {
    let document = match &args.schemas {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            SchemaDocument::from_json(&json)
                .with_context(|| format!("Invalid provider schemas in {}", path.display()))?
        }
        None => SchemaDocument::default(),
    };

    Ok(Schemas::load(cache, &document, tree.providers()))
}

fn output(output: &cli::OutputArgs, value: &impl serde::Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}
