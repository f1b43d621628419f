use std::sync::Arc;

use dm_funnel::config::{EngineConfig, FunnelPolicy};
use dm_funnel::engine::FunnelEngine;
use dm_funnel::intent::IntentClassifier;
use dm_funnel::provider::{
    EmbeddingProvider, GenerationProvider, HttpEmbeddingProvider, HttpGenerationProvider,
};
use dm_funnel::store::{ConversationStore, JsonFileBackend};
use dm_funnel::templates::TemplateStore;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Primary credentials: comma-separated API keys.
    let api_keys = std::env::var("DM_FUNNEL_API_KEYS").unwrap_or_else(|_| {
        eprintln!("Error: DM_FUNNEL_API_KEYS not set");
        eprintln!("  export DM_FUNNEL_API_KEYS=key1,key2,key3");
        std::process::exit(1);
    });

    let base_url = std::env::var("DM_FUNNEL_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let model = std::env::var("DM_FUNNEL_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let embed_model = std::env::var("DM_FUNNEL_EMBED_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".to_string());

    let state_path =
        std::env::var("DM_FUNNEL_STATE_PATH").unwrap_or_else(|_| "./data/state.json".to_string());

    let cta_destination =
        std::env::var("DM_FUNNEL_CTA_LINK").unwrap_or_else(|_| "example.com/page".to_string());

    let policy = match std::env::var("DM_FUNNEL_POLICY").as_deref() {
        Ok("template-first") => FunnelPolicy::TemplateFirst,
        _ => FunnelPolicy::AlwaysGenerate,
    };

    let allowlist: Vec<String> = std::env::var("DM_FUNNEL_RESET_ALLOWLIST")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let config = EngineConfig {
        cta_destination,
        reset_allowlist: allowlist,
        policy,
        ..Default::default()
    };

    eprintln!("💬 dm-funnel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {model}");
    eprintln!("   Policy: {policy:?}");
    eprintln!("   State: {state_path}");
    eprintln!("   Enter messages as `user_id: text`. /quit to exit.\n");

    // Generation providers: one per credential, rotated by the pool.
    let keys: Vec<String> = api_keys.split(',').map(str::to_string).collect();
    let mut generators: Vec<(String, Arc<dyn GenerationProvider>)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let id = format!("primary-{}", i + 1);
        generators.push((
            id.clone(),
            Arc::new(HttpGenerationProvider::new(
                &base_url,
                secrecy::SecretString::from(key.clone()),
                &model,
                id.clone(),
            )),
        ));
    }

    // Optional secondary-family credential.
    let secondary: Option<(String, Arc<dyn GenerationProvider>)> = std::env::var(
        "DM_FUNNEL_SECONDARY_KEY",
    )
    .ok()
    .map(|key| {
        let base = std::env::var("DM_FUNNEL_SECONDARY_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let secondary_model = std::env::var("DM_FUNNEL_SECONDARY_MODEL")
            .unwrap_or_else(|_| model.clone());
        (
            "secondary".to_string(),
            Arc::new(HttpGenerationProvider::new(
                base,
                secrecy::SecretString::from(key),
                secondary_model,
                "secondary",
            )) as Arc<dyn GenerationProvider>,
        )
    });

    let embedder: Option<Arc<dyn EmbeddingProvider>> = keys.first().map(|key| {
        Arc::new(HttpEmbeddingProvider::new(
            &base_url,
            secrecy::SecretString::from(key.clone()),
            &embed_model,
        )) as Arc<dyn EmbeddingProvider>
    });

    // ── Conversation store (survives restarts) ──────────────────────────
    let backend = Arc::new(JsonFileBackend::new(&state_path));
    let store = Arc::new(
        ConversationStore::load(backend, config.idle_timeout)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to load state from {state_path}: {e}");
                std::process::exit(1);
            }),
    );

    let engine = Arc::new(FunnelEngine::new(
        config,
        store,
        TemplateStore::default_rules(),
        IntentClassifier::new(IntentClassifier::default_categories()),
        generators,
        secondary,
        embedder,
    ));

    // Stdin loop standing in for the browser-automation collaborator: it
    // would deliver `(user_id, text)` pairs and perform the literal send.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/providers" {
            for snap in engine.provider_snapshot() {
                eprintln!(
                    "   {}: {} ok / {} err{}{}",
                    snap.identifier,
                    snap.request_count,
                    snap.error_count,
                    if snap.rate_limited { " [rate-limited]" } else { "" },
                    if snap.quota_exhausted { " [quota]" } else { "" },
                );
            }
            continue;
        }

        let (user_id, text) = match line.split_once(':') {
            Some((id, text)) => (id.trim().to_string(), text.trim().to_string()),
            None => ("local".to_string(), line),
        };

        let engine = Arc::clone(&engine);
        // Different users may proceed concurrently; the engine's pending
        // set keeps each user single-flight.
        tokio::spawn(async move {
            let decision = engine.decide(&user_id, &text).await;
            match decision.text {
                Some(reply) => println!("[{user_id}] → {reply}"),
                None if decision.end_conversation => println!("[{user_id}] → (closed silently)"),
                None => println!("[{user_id}] → (no action)"),
            }
        });
    }

    Ok(())
}
