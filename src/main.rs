mod logging;
mod native_messaging;
mod protocol;

use std::io::{stdin, stdout};

use anyhow::Context;
use serde_json::Value;

use embed_pipeline::config::{self, PipelineConfig, MODEL_PROFILES};
use embed_pipeline::embeddings::text_prep;
use embed_pipeline::{similarity, Metrics, Pipeline};

use crate::protocol::{EmbedParams, RankParams, RankedText, ResponseErr, ResponseOk, ScoreParams};

/// Session state: the loaded pipeline plus metrics summed over every call.
#[derive(Default)]
struct HostState {
    pipeline: Option<Pipeline>,
    model: Option<String>,
    totals: Metrics,
    requests: u64,
}

impl HostState {
    fn require_pipeline(&self) -> anyhow::Result<&Pipeline> {
        self.pipeline
            .as_ref()
            .context("Pipeline not initialized. Call 'init' first.")
    }
}

fn main() {
    if let Err(e) = real_main() {
        eprintln!("[embed_helper] fatal error: {e:?}");
        log::error!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}

fn real_main() -> anyhow::Result<()> {
    let _logger = logging::init_logging()?;

    log::info!("=== Embedding Helper Started ===");
    log::info!("Waiting for messages on stdin...");

    let mut state = HostState::default();
    let mut in_stream = stdin();
    let mut out_stream = stdout();

    loop {
        let req = match native_messaging::read_message(&mut in_stream) {
            Ok(Some(r)) => r,
            Ok(None) => {
                log::info!("No more messages after {} messages, exiting", state.requests);
                break;
            }
            Err(e) => {
                log::error!("Error reading message: {:?}", e);
                break;
            }
        };

        state.requests += 1;
        log::info!(
            "Processing message #{}: {} (id: {})",
            state.requests,
            req.method,
            req.id
        );

        let sent = match handle_request(&mut state, &req.method, &req.params) {
            Ok(result) => native_messaging::write_message(
                &mut out_stream,
                &ResponseOk { id: req.id, result },
            ),
            Err(e) => {
                log::error!("Handler error: {:?}", e);
                native_messaging::write_message(
                    &mut out_stream,
                    &ResponseErr {
                        id: req.id,
                        error: format!("{e:#}"),
                    },
                )
            }
        };
        if let Err(e) = sent {
            log::error!("Error sending response: {:?}", e);
            break;
        }
    }

    log::info!("=== Embedding Helper Stopped ===");
    Ok(())
}

fn handle_request(state: &mut HostState, method: &str, params: &Value) -> anyhow::Result<Value> {
    match method {
        "hello" => handle_hello(params),
        "init" => handle_init(state, params),
        "embed" => handle_embed(state, params),
        "embedAll" => handle_embed_all(state, params),
        "rank" => handle_rank(state, params),
        "score" => handle_score(params),
        "stats" => handle_stats(state),
        _ => anyhow::bail!("Unknown method: {method}"),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(method: &str, params: &Value) -> anyhow::Result<T> {
    serde_json::from_value(params.clone()).with_context(|| format!("invalid params for '{method}'"))
}

fn handle_hello(params: &Value) -> anyhow::Result<Value> {
    let client_version = params
        .get("clientVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    log::info!(
        "Hello from client version {}, responding with host version {}",
        client_version,
        config::HOST_VERSION
    );
    Ok(serde_json::json!({
        "type": "hello-response",
        "hostImpl": "rust",
        "hostVersion": config::HOST_VERSION,
        "onnx": cfg!(feature = "onnx"),
        "profiles": MODEL_PROFILES,
    }))
}

fn handle_init(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let cfg: PipelineConfig = if params.is_null() {
        PipelineConfig::default()
    } else {
        parse_params("init", params)?
    };
    log::info!(
        "Initializing pipeline: model={} backend={:?} pooling={}",
        cfg.model,
        cfg.backend,
        cfg.pooling
    );

    let pipeline = Pipeline::load(&cfg).context("pipeline initialization failed")?;
    let result = serde_json::json!({
        "ok": true,
        "model": cfg.model,
        "dimensions": pipeline.dimensions(),
        "pooling": pipeline.pooling(),
        "batchSize": pipeline.batch_size(),
    });
    // Re-init replaces the previous model; session totals carry over.
    state.pipeline = Some(pipeline);
    state.model = Some(cfg.model);
    Ok(result)
}

fn handle_embed(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let params: EmbedParams = parse_params("embed", params)?;
    let pipeline = state.require_pipeline()?;
    let batch_size = params.batch_size.unwrap_or_else(|| pipeline.batch_size());

    let (batches, metrics) = {
        let mut stream = pipeline.embed_with(params.texts.as_slice(), batch_size);
        let mut batches = Vec::new();
        for batch in stream.by_ref() {
            batches.push(batch?);
        }
        (batches, stream.metrics())
    };
    log::debug!(
        "embed: {} documents in {} batches ({:?})",
        metrics.documents,
        metrics.batches,
        metrics.total_time()
    );
    state.totals.merge(&metrics);

    Ok(serde_json::json!({ "batches": batches, "metrics": metrics }))
}

fn handle_embed_all(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let params: EmbedParams = parse_params("embedAll", params)?;
    let pipeline = state.require_pipeline()?;
    let embedded = match params.batch_size {
        Some(batch_size) => pipeline.embed_all_with(params.texts.as_slice(), batch_size)?,
        None => pipeline.embed_all(params.texts.as_slice())?,
    };
    state.totals.merge(&embedded.metrics);

    Ok(serde_json::json!({
        "embeddings": embedded.embeddings,
        "metrics": embedded.metrics,
    }))
}

fn handle_rank(state: &mut HostState, params: &Value) -> anyhow::Result<Value> {
    let params: RankParams = parse_params("rank", params)?;
    let pipeline = state.require_pipeline()?;

    // Query goes first so one pass embeds everything.
    let mut texts = Vec::with_capacity(params.candidates.len() + 1);
    if params.prefixes {
        texts.push(text_prep::query_text(&params.query));
        texts.extend(params.candidates.iter().map(|c| text_prep::passage_text(c)));
    } else {
        texts.push(params.query.clone());
        texts.extend(params.candidates.iter().cloned());
    }

    let embedded = pipeline.embed_all(texts.as_slice())?;
    let (query, candidates) = embedded
        .embeddings
        .split_first()
        .context("no vector produced for the query")?;
    let ranking: Vec<RankedText> = similarity::rank(query, candidates, params.metric)?
        .into_iter()
        .map(|r| RankedText {
            index: r.index,
            text: params.candidates[r.index].clone(),
            score: r.value,
        })
        .collect();
    state.totals.merge(&embedded.metrics);

    Ok(serde_json::to_value(ranking)?)
}

fn handle_score(params: &Value) -> anyhow::Result<Value> {
    let params: ScoreParams = parse_params("score", params)?;
    let scores = similarity::scores(&params.query, &params.candidates, params.metric)?;
    let ranking = similarity::rank_scores(&scores, params.metric);
    Ok(serde_json::json!({ "scores": scores, "ranking": ranking }))
}

fn handle_stats(state: &HostState) -> anyhow::Result<Value> {
    Ok(serde_json::json!({
        "initialized": state.pipeline.is_some(),
        "model": state.model,
        "dimensions": state.pipeline.as_ref().map(Pipeline::dimensions),
        "requests": state.requests,
        "totals": state.totals,
    }))
}
