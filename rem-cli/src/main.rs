//! REM command-line harness
//!
//! Thin front end over the service container: apply schema migrations, run
//! the compaction pipeline, execute ad-hoc REM queries, ask the planner,
//! invoke agents from a schema name or local schema file, and serve the
//! API. Exit code 0 on success, non-zero with a short diagnostic on
//! failure.

use clap::{Parser, Subcommand};
use rem_agents::{AgentContext, AgentDefinition};
use rem_api::ServiceContainer;
use rem_core::{RemQuery, DEFAULT_TENANT};
use rem_storage::{diff_catalog, LiveCatalog};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rem", about = "REM memory substrate", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schema management
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },
    /// Run the moment-compaction pipeline for one session
    Compact {
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
    },
    /// Execute a REM dialect query
    Query {
        /// Query string, e.g. 'LOOKUP sarah-chen'
        query: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
    },
    /// Translate a natural-language question and (confidence permitting) run it
    Ask {
        question: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
        /// Show the planned query without executing
        #[arg(long)]
        plan: bool,
    },
    /// Invoke an agent by schema name or local schema file
    Agent {
        /// Schema name (resolved via the loader) or a path to a .yaml file
        schema: String,
        /// Prompt to run
        prompt: String,
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
        /// Model override, e.g. openai:gpt-4.1
        #[arg(long)]
        model: Option<String>,
    },
    /// Run the HTTP server
    Serve,
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Print generated DDL
    Generate {
        /// Include the install prelude (extensions, key-store)
        #[arg(long)]
        install: bool,
        /// Print concurrently-buildable vector indexes instead
        #[arg(long)]
        background_indexes: bool,
    },
    /// Compare the derived schema against the live store
    Diff,
    /// Apply install prelude and generated schema to the live store
    Apply,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Serve => {
            rem_api::serve().await?;
        }
        Command::Schema { command } => {
            let (container, mut worker) = ServiceContainer::from_env().await?;
            let generator = container.schema_generator();
            match command {
                SchemaCommand::Generate {
                    install,
                    background_indexes,
                } => {
                    if background_indexes {
                        print!("{}", generator.background_indexes());
                    } else {
                        if install {
                            println!("{}", generator.install_sql());
                        }
                        print!("{}", generator.generate());
                    }
                }
                SchemaCommand::Diff => {
                    let catalog = LiveCatalog::introspect(&container.db).await?;
                    let plan = diff_catalog(&generator, &catalog);
                    if plan.is_empty() {
                        println!("-- schema is up to date");
                    } else {
                        print!("{}", plan.to_sql());
                    }
                }
                SchemaCommand::Apply => {
                    container.db.batch_execute(&generator.install_sql()).await?;
                    container.db.batch_execute(&generator.generate()).await?;
                    println!("schema applied");
                }
            }
            worker.stop().await;
        }
        Command::Compact {
            session,
            user,
            tenant,
        } => {
            let (container, mut worker) = ServiceContainer::from_env().await?;
            let context = AgentContext {
                user_id: Some(user.clone()),
                tenant_id: tenant,
                session_id: Some(session.clone()),
                model: None,
                agent_schema: None,
            };
            let result = container.moment_builder(&context).run(&session, &user).await;
            worker.stop().await;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "success": result.success,
                "moments_created": result.moments_created,
                "partition_inserted": result.partition_inserted,
                "error": result.error,
            }))?);
            if !result.success {
                return Err("compaction failed".into());
            }
        }
        Command::Query { query, tenant } => {
            let (container, mut worker) = ServiceContainer::from_env().await?;
            let params = rem_dsl::parse(&query)?;
            let output = container
                .engine
                .execute(&RemQuery::new(tenant, params))
                .await;
            worker.stop().await;
            let output = output?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Agent {
            schema,
            prompt,
            tenant,
            model,
        } => {
            let (container, mut worker) = ServiceContainer::from_env().await?;
            let context = AgentContext {
                model: model.as_deref().and_then(|m| m.parse().ok()),
                ..AgentContext::for_tenant(tenant)
            };

            let agent = if schema.ends_with(".yaml") || schema.ends_with(".yml") {
                let raw = std::fs::read_to_string(&schema)?;
                let spec: serde_json::Value = serde_yaml::from_str(&raw)?;
                let name = std::path::Path::new(&schema)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("local-agent");
                let definition = AgentDefinition::from_spec(name, &spec)?;
                container
                    .factory
                    .create_from_definition(std::sync::Arc::new(definition), context)?
            } else {
                container.factory.create(&schema, context).await?
            };

            let result = agent.run_prompt(&prompt).await;
            worker.stop().await;
            let result = result?;
            match result.output {
                Some(output) => println!("{}", serde_json::to_string_pretty(&output)?),
                None => println!("{}", result.text),
            }
        }
        Command::Ask {
            question,
            tenant,
            plan,
        } => {
            let (container, mut worker) = ServiceContainer::from_env().await?;
            let context = AgentContext::for_tenant(tenant);
            let outcome = container.ask.ask(&question, &context, plan).await;
            worker.stop().await;
            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
    }
    Ok(())
}
