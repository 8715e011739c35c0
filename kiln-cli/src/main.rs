use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use log::warn;
use tokio_util::sync::CancellationToken;

use kiln_core::effect::Effect;
use kiln_core::interpreter::Interpreter;
use kiln_core::plan::Plan;
use kiln_core::provider::{Provider, ProviderError};
use kiln_core::resource::{ResourceId, Value};
use kiln_core::schema::ResourceSchema;
use kiln_provider_imagebuilder::{
    AwsImageBuilderApi, ImageBuilderProvider, ProviderConfig, ProviderSettings, schemas,
};
use kiln_state::{BackendResult, create_backend};

mod config;
mod planner;
mod session;
#[cfg(test)]
mod testing;

use config::Project;
use planner::Bindings;
use session::Session;

const PROVIDER: &str = "imagebuilder";

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Declarative AWS EC2 Image Builder provisioning", long_about = None)]
struct Cli {
    /// Path to the project file
    #[arg(long, short, global = true, default_value = "kiln.json")]
    config: PathBuf,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(long, short, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the project file
    Validate,
    /// Show execution plan without applying changes
    Plan,
    /// Apply changes to reach the desired state
    Apply {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy every resource in state
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Bring an existing resource under management
    Import {
        /// Resource type (e.g. image_recipe)
        resource_type: String,
        /// Name to manage it under
        name: String,
        /// ARN of the existing resource
        arn: String,
    },
    /// List remote resources of a type
    List {
        /// Resource type (e.g. component)
        resource_type: String,
    },
    /// State inspection commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Release a stuck state lock
    ForceUnlock {
        /// Lock ID shown in the lock error
        lock_id: String,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List resources recorded in state
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    watch_interrupt(cancel.clone());

    let file = cli.config;
    let result = match cli.command {
        Commands::Validate => run_validate(&file),
        Commands::Plan => run_plan(&file, &cancel).await,
        Commands::Apply { auto_approve } => run_apply(&file, auto_approve, &cancel).await,
        Commands::Destroy { auto_approve } => run_destroy(&file, auto_approve, &cancel).await,
        Commands::Import {
            resource_type,
            name,
            arn,
        } => run_import(&file, ResourceId::new(resource_type, name), &arn, &cancel).await,
        Commands::List { resource_type } => run_list(&file, &resource_type, &cancel).await,
        Commands::State {
            command: StateCommands::List,
        } => run_state_list(&file).await,
        Commands::ForceUnlock { lock_id } => run_force_unlock(&file, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Ctrl-C abandons in-progress waits; submitted work keeps running remotely
fn watch_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Interrupted. Resources still provisioning stay in state as tainted.".yellow()
            );
            cancel.cancel();
        }
    });
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

fn load_project(file: &Path) -> Result<Project, String> {
    config::load(file).map_err(|e| e.to_string())
}

fn validate_project(project: &Project) -> Result<(), String> {
    ProviderConfig::try_from(project.provider.clone()).map_err(|e| e.to_string())?;

    let schemas = get_schemas();
    let mut all_errors = Vec::new();

    for resource in &project.resources {
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            all_errors.push(format!(
                "{}: unknown resource type '{}'",
                resource.id, resource.id.resource_type
            ));
            continue;
        };
        let result = if resource.is_data_source() {
            schema.validate_lookup(&resource.attributes)
        } else {
            schema.validate(&resource.attributes)
        };
        if let Err(errors) = result {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

async fn build_provider(
    settings: &ProviderSettings,
    cancel: &CancellationToken,
) -> Result<ImageBuilderProvider<AwsImageBuilderApi>, String> {
    let config = ProviderConfig::try_from(settings.clone()).map_err(|e| e.to_string())?;
    let api = AwsImageBuilderApi::from_env(config.region.as_deref())
        .await
        .with_cancellation(cancel.clone());
    Ok(ImageBuilderProvider::new(api, config).with_cancellation(cancel.clone()))
}

async fn open_session(project: &Project, operation: Option<&str>) -> Result<Session, String> {
    Session::open(&project.backend, PROVIDER, operation)
        .await
        .map_err(|e| format!("Failed to open state: {}", e))
}

/// Release the session lock, keeping the command's own error if both fail
async fn finish<T>(session: Session, result: Result<T, String>) -> Result<T, String> {
    let closed: BackendResult<()> = session.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(format!("Failed to release state lock: {}", e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!("Failed to release state lock: {}", close);
            Err(e)
        }
    }
}

fn run_validate(file: &Path) -> Result<(), String> {
    let project = load_project(file)?;

    println!("{}", "Validating...".cyan());

    validate_project(&project)?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            project.resources.len()
        )
        .green()
        .bold()
    );

    for resource in &project.resources {
        let marker = if resource.is_data_source() { " (data)" } else { "" };
        println!("  • {}{}", resource.id, marker);
    }

    Ok(())
}

async fn run_plan(file: &Path, cancel: &CancellationToken) -> Result<(), String> {
    let project = load_project(file)?;
    validate_project(&project)?;
    let provider = build_provider(&project.provider, cancel).await?;
    let session = open_session(&project, None).await?;

    let result = async {
        let current = session
            .refresh(&provider, false)
            .await
            .map_err(|e| format!("Failed to refresh state: {}", e))?;
        let tainted: HashSet<ResourceId> = session.state().await.tainted().into_iter().collect();
        let planned = planner::plan(&provider, &project.resources, &current, &tainted)
            .await
            .map_err(|e| e.to_string())?;
        print_plan(&planned.plan);
        Ok::<(), String>(())
    }
    .await;

    finish(session, result).await
}

async fn run_apply(file: &Path, auto_approve: bool, cancel: &CancellationToken) -> Result<(), String> {
    let project = load_project(file)?;
    validate_project(&project)?;
    let interpreter = Interpreter::new(build_provider(&project.provider, cancel).await?);
    let session = open_session(&project, Some("apply")).await?;

    let result = apply(&interpreter, &project, &session, auto_approve, cancel).await;
    finish(session, result).await
}

async fn apply(
    interpreter: &Interpreter<ImageBuilderProvider<AwsImageBuilderApi>>,
    project: &Project,
    session: &Session,
    auto_approve: bool,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let provider = interpreter.provider();
    let current = session
        .refresh(provider, true)
        .await
        .map_err(|e| format!("Failed to refresh state: {}", e))?;
    let tainted: HashSet<ResourceId> = session.state().await.tainted().into_iter().collect();
    let mut planned = planner::plan(provider, &project.resources, &current, &tainted)
        .await
        .map_err(|e| e.to_string())?;

    if planned.plan.mutation_count() == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return Ok(());
    }

    print_plan(&planned.plan);
    println!();

    if !auto_approve
        && !confirm(
            "Do you want to perform these actions?",
            "Only 'yes' will be accepted to approve.",
        )?
    {
        println!();
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let result = run_effects(interpreter, &planned.plan, &mut planned.bindings, session, cancel).await;

    println!();
    match result {
        Ok(applied) => {
            println!(
                "{}",
                format!("Apply complete! {} changes applied.", applied)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Err(e) => {
            println!("{}", "Apply failed.".red().bold());
            Err(e.to_string())
        }
    }
}

async fn run_effects<P: Provider>(
    interpreter: &Interpreter<P>,
    plan: &Plan,
    bindings: &mut Bindings,
    session: &Session,
    cancel: &CancellationToken,
) -> Result<usize, ProviderError> {
    planner::execute(interpreter, plan, bindings, session, cancel, |effect, err| match err {
        None => println!("  {} {}", "✓".green(), format_effect(effect)),
        Some(e) => println!("  {} {} - {}", "✗".red(), format_effect(effect), e),
    })
    .await
}

async fn run_destroy(file: &Path, auto_approve: bool, cancel: &CancellationToken) -> Result<(), String> {
    let project = load_project(file)?;
    let interpreter = Interpreter::new(build_provider(&project.provider, cancel).await?);
    let session = open_session(&project, Some("destroy")).await?;

    let result = destroy(&interpreter, &session, auto_approve, cancel).await;
    finish(session, result).await
}

async fn destroy(
    interpreter: &Interpreter<ImageBuilderProvider<AwsImageBuilderApi>>,
    session: &Session,
    auto_approve: bool,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let current = session
        .refresh(interpreter.provider(), true)
        .await
        .map_err(|e| format!("Failed to refresh state: {}", e))?;

    // Newest first, so dependents go before what they use
    let mut plan = Plan::new();
    for state in current.iter().rev() {
        if let Some(identifier) = &state.identifier {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
            });
        }
    }

    if plan.is_empty() {
        println!("{}", "No resources in state.".yellow());
        return Ok(());
    }

    println!("{}", "The following resources will be destroyed:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", "-".red().bold(), effect.resource_id());
    }
    println!();
    println!("Plan: {} to destroy.", plan.effects().len().to_string().red());
    println!();

    if !auto_approve
        && !confirm(
            "Do you really want to destroy all resources?",
            "This action cannot be undone. Type 'yes' to confirm.",
        )?
    {
        println!();
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let result = run_effects(interpreter, &plan, &mut Bindings::new(), session, cancel).await;

    println!();
    match result {
        Ok(destroyed) => {
            println!(
                "{}",
                format!("Destroy complete! {} resources destroyed.", destroyed)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Err(e) => {
            println!("{}", "Destroy failed.".red().bold());
            Err(e.to_string())
        }
    }
}

async fn run_import(
    file: &Path,
    id: ResourceId,
    arn: &str,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let project = load_project(file)?;
    if !get_schemas().contains_key(&id.resource_type) {
        return Err(format!("Unknown resource type '{}'", id.resource_type));
    }
    let provider = build_provider(&project.provider, cancel).await?;
    let session = open_session(&project, Some("import")).await?;

    let result = async {
        if let Some(existing) = session.state().await.find_resource(&id.resource_type, &id.name) {
            return Err(format!(
                "{} is already managed ({})",
                id,
                existing.identifier.as_deref().unwrap_or("no handle")
            ));
        }
        let state = provider
            .read(&id, Some(arn))
            .await
            .map_err(|e| e.to_string())?;
        if !state.exists {
            return Err(format!("No {} found with ARN {}", id.resource_type, arn));
        }
        session
            .save(&state, &HashMap::new())
            .await
            .map_err(|e| format!("Failed to write state: {}", e))?;
        println!("{} {} ({})", "Imported".green().bold(), id, arn);
        Ok::<(), String>(())
    }
    .await;

    finish(session, result).await
}

async fn run_list(file: &Path, resource_type: &str, cancel: &CancellationToken) -> Result<(), String> {
    let project = load_project(file)?;
    let provider = build_provider(&project.provider, cancel).await?;
    let states = provider
        .list(resource_type)
        .await
        .map_err(|e| e.to_string())?;

    if states.is_empty() {
        println!("{}", format!("No {} resources found.", resource_type).yellow());
        return Ok(());
    }

    for state in &states {
        let name = state
            .attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("-");
        println!(
            "  {}  {}",
            name.bold(),
            state.identifier.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn run_state_list(file: &Path) -> Result<(), String> {
    let project = load_project(file)?;
    let session = open_session(&project, None).await?;
    let state = session.state().await;

    if state.resources.is_empty() {
        println!("{}", "No resources in state.".yellow());
    }
    for entry in &state.resources {
        let tainted = if entry.tainted {
            " (tainted)".red().to_string()
        } else {
            String::new()
        };
        println!(
            "  {}  {}{}",
            entry.id().to_string().cyan(),
            entry.identifier.as_deref().unwrap_or("-"),
            tainted
        );
    }

    finish(session, Ok(())).await
}

async fn run_force_unlock(file: &Path, lock_id: &str) -> Result<(), String> {
    let project = load_project(file)?;
    let backend = create_backend(&project.backend)
        .await
        .map_err(|e| format!("Failed to open state: {}", e))?;
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", format!("Lock {} released.", lock_id).green());
    Ok(())
}

fn confirm(question: &str, hint: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", hint.yellow());
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

const ATTR_INDENT: &str = "      ";

fn print_plan(plan: &Plan) {
    if plan.mutation_count() == 0 {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    let effects = plan.effects();
    let mut i = 0;
    while i < effects.len() {
        // Replacement: a delete directly followed by a create of the same resource
        if let Effect::Delete { id, identifier } = &effects[i]
            && let Some(Effect::Create(resource)) = effects.get(i + 1)
            && &resource.id == id
        {
            println!("  {} {}", "-/+".magenta().bold(), id.to_string().cyan().bold());
            print_attributes(&resource.attributes);
            println!("{}{} {}", ATTR_INDENT, "replaces".dimmed(), identifier.red());
            i += 2;
            continue;
        }
        print_effect(&effects[i]);
        i += 1;
    }

    println!();
    let summary = plan.summary();
    println!(
        "Plan: {} to add, {} to change, {} to destroy.",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.delete.to_string().red()
    );
}

fn print_effect(effect: &Effect) {
    match effect {
        Effect::Create(r) => {
            println!("  {} {}", "+".green().bold(), r.id.to_string().cyan().bold());
            print_attributes(&r.attributes);
        }
        Effect::Update {
            id,
            from,
            to,
            changed_attributes,
        } => {
            println!("  {} {}", "~".yellow().bold(), id.to_string().cyan().bold());
            for key in changed_attributes {
                let old = from
                    .attributes
                    .get(key)
                    .map(format_value)
                    .unwrap_or_else(|| "(none)".to_string());
                let new = to
                    .attributes
                    .get(key)
                    .map(format_value)
                    .unwrap_or_else(|| "(none)".to_string());
                println!("{}{}: {} → {}", ATTR_INDENT, key, old.red(), new.green());
            }
        }
        Effect::Delete { id, identifier } => {
            println!("  {} {}", "-".red().bold(), id.to_string().cyan().bold());
            println!("{}{}: {}", ATTR_INDENT, "arn".bold(), identifier.red());
        }
        Effect::Read { resource } => {
            println!("  {} {}", "<=".blue().bold(), resource.id.to_string().cyan());
        }
    }
}

fn print_attributes(attributes: &HashMap<String, Value>) {
    let mut keys: Vec<_> = attributes.keys().filter(|k| !k.starts_with('_')).collect();
    keys.sort_by(|a, b| match (a.as_str(), b.as_str()) {
        ("name", _) => std::cmp::Ordering::Less,
        (_, "name") => std::cmp::Ordering::Greater,
        _ => a.cmp(b),
    });
    for key in keys {
        let value = format_value(&attributes[key]);
        if key == "name" {
            println!("{}{}: {}", ATTR_INDENT, key.bold(), value.white().bold());
        } else {
            println!("{}{}: {}", ATTR_INDENT, key, value.green());
        }
    }
}

fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Create(r) => format!("Create {}", r.id),
        Effect::Update { id, .. } => format!("Update {}", id),
        Effect::Delete { id, .. } => format!("Delete {}", id),
        Effect::Read { resource } => format!("Read {}", resource.id),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut strs: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            strs.sort();
            format!("{{{}}}", strs.join(", "))
        }
        Value::ResourceRef(binding, attr) => format!("(known after apply: {}.{})", binding, attr),
    }
}
