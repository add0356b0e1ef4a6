use governance_engine::{
    flows::Engine,
    gemini::GeminiClient,
    generation::{RetryingGenerator, TextGenerator},
    EngineConfig, FlowController, QuickState,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Interactive Quick Audit on the terminal. Type `skip` to decline a
/// clarification, `quit` to abandon.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = EngineConfig::from_env();
    if !config.has_api_key() {
        warn!("GEMINI_API_KEY not set; the report cannot be generated");
    }

    let client = GeminiClient::from_config(&config)?;
    let generator: Arc<dyn TextGenerator> =
        Arc::new(RetryingGenerator::new(client, config.retry.clone()));
    let engine = Engine::in_memory(generator);
    let audit = engine.quick.clone();

    let mut session = audit.start_session(Uuid::new_v4()).await?;
    info!(session_id = %session.session_id, "Quick audit started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while session.state != QuickState::GeneratingOutput {
        if session.is_closed() {
            println!("Session closed.");
            return Ok(());
        }

        let question = audit.current_question(&session).unwrap_or_default();
        stdout
            .write_all(format!("\n[{}%] {}\n> ", session.progress(), question).as_bytes())
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            audit.abandon(session.session_id).await?;
            return Ok(());
        };

        let result = match line.trim() {
            "quit" => {
                audit.abandon(session.session_id).await?;
                println!("Audit abandoned.");
                return Ok(());
            }
            "skip" => audit.skip_vagueness_gate(session.session_id).await,
            answer => audit.process_answer(session.session_id, answer).await,
        };

        match result {
            Ok(next) => session = next,
            Err(e) if e.is_validation() => println!("{}", e),
            Err(e) => return Err(e.into()),
        }
    }

    println!("\nGenerating report...");
    let finished = audit.generate_output(session.session_id).await?;

    println!("\n=== QUICK AUDIT REPORT ===");
    println!("{}", finished.output.unwrap_or_default());
    if let Some(digest) = finished.snapshot_hash {
        println!("\nSnapshot: {}", digest);
    }

    Ok(())
}
