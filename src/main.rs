//! Assistant driver CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use assistant_driver::cli::{ChatArgs, Cli, Commands};
use assistant_driver::prelude::{
    CommunicationSink, DriverRegistry, HostContext, Message, MessageRef, MessageStatus, NoSkills,
    OPENAI_DRIVER,
};
use clap::Parser;

/// Prints every finished agent message.
struct StdoutSink;

impl CommunicationSink for StdoutSink {
    fn emit(&self, message: MessageRef) {
        let message = message.snapshot();
        println!("[{}] {}", message.source, message.content);
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Chat(chat_args) => handle_chat(chat_args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.driver_config()?;
    let overrides = serde_json::to_value(&config)?;

    let registry = DriverRegistry::with_defaults();
    let host = HostContext::new(Arc::new(StdoutSink), Arc::new(NoSkills));
    let driver = registry.create_driver(OPENAI_DRIVER, host, &args.agent, &overrides)?;

    if let Err(e) = driver.wait_ready().await {
        registry.shutdown_all().await;
        return Err(e.into());
    }

    let prompts: Vec<MessageRef> = args
        .prompt
        .iter()
        .map(|p| MessageRef::from(Message::from_user(args.agent.as_str(), p.as_str())))
        .collect();
    for prompt in &prompts {
        driver.instruct(prompt.clone());
    }

    tokio::select! {
        _ = driver.wait_for_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted, cleaning up...");
        }
    }

    for (agent, report) in registry.shutdown_all().await {
        for error in &report.errors {
            eprintln!("Cleanup for {agent} incomplete: {error}");
        }
    }

    if let Some(failed) = prompts.iter().find(|p| p.status() == MessageStatus::Error) {
        return Err(format!("run for message {} failed", failed.id()).into());
    }
    Ok(())
}
