use common::{
    error::AppError,
    utils::{
        config::{AppConfig, BreakpointPolicy},
        embedding::{cosine_distance, EmbeddingProvider},
    },
};
use text_splitter::TextSplitter;
use tracing::debug;

/// Tuning for the semantic chunker, lifted out of `AppConfig` so tests can
/// construct it directly.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Character range for one sentence-group unit.
    pub unit_min_chars: usize,
    pub unit_max_chars: usize,
    /// Neighbors on each side included in a unit's context window.
    pub buffer_size: usize,
    pub breakpoint_policy: BreakpointPolicy,
    pub breakpoint_amount: f32,
    /// Chunks shorter than this are dropped after boundary detection.
    pub min_chunk_chars: usize,
}

impl ChunkerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            unit_min_chars: config.chunk_unit_min_chars,
            unit_max_chars: config.chunk_unit_max_chars,
            buffer_size: config.chunk_buffer_size,
            breakpoint_policy: config.chunk_breakpoint_policy,
            breakpoint_amount: config.chunk_breakpoint_amount,
            min_chunk_chars: config.min_chunk_chars,
        }
    }
}

/// One chunk of a document, held in memory only between chunking and
/// embedding. The text itself travels inside the queue message; only the
/// embedding twin persists it relationally.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub ordinal: u32,
    pub text: String,
    pub source_document_id: String,
}

/// Splits a document along semantic boundaries.
///
/// Sentence groups are embedded with a sliding context window; a chunk
/// boundary falls wherever the cosine distance between consecutive window
/// embeddings exceeds the configured breakpoint. Survivors of the minimum
/// length filter are renumbered contiguously from zero, so chunk ids are a
/// pure function of document id and final ordinal.
pub async fn chunk_document(
    document_id: &str,
    text: &str,
    provider: &EmbeddingProvider,
    config: &ChunkerConfig,
) -> Result<Vec<DocumentChunk>, AppError> {
    let units = split_units(text, config);
    if units.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = if units.len() == 1 {
        vec![units.join(" ")]
    } else {
        let windows = context_windows(&units, config.buffer_size);
        let embeddings = provider.embed_batch(windows).await?;

        let distances: Vec<f32> = embeddings
            .iter()
            .zip(embeddings.iter().skip(1))
            .map(|(a, b)| cosine_distance(a, b))
            .collect();

        let threshold = breakpoint_threshold(&distances, config);
        debug!(
            units = units.len(),
            threshold, "derived semantic breakpoint threshold"
        );

        assemble(&units, &distances, threshold)
    };

    let chunks: Vec<DocumentChunk> = candidates
        .into_iter()
        .filter(|candidate| candidate.chars().count() >= config.min_chunk_chars)
        .enumerate()
        .map(|(ordinal, text)| {
            let ordinal = ordinal as u32;
            DocumentChunk {
                chunk_id: format!("{document_id}_chunk_{ordinal}"),
                ordinal,
                text,
                source_document_id: document_id.to_string(),
            }
        })
        .collect();

    debug!(document_id, chunks = chunks.len(), "chunked document");
    Ok(chunks)
}

/// Sentence-group units within the configured size band. The splitter is
/// whitespace/sentence aware, so units never cut words in half.
fn split_units(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let range = config.unit_min_chars..config.unit_max_chars.max(config.unit_min_chars + 1);
    TextSplitter::new(range)
        .chunks(text)
        .map(str::trim)
        .filter(|unit| !unit.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins each unit with up to `buffer` neighbors on each side, so boundary
/// decisions see local context instead of a single sentence group.
fn context_windows(units: &[String], buffer: usize) -> Vec<String> {
    (0..units.len())
        .map(|i| {
            let start = i.saturating_sub(buffer);
            let end = i.saturating_add(buffer).min(units.len().saturating_sub(1));
            units
                .get(start..=end)
                .unwrap_or_default()
                .join(" ")
        })
        .collect()
}

fn breakpoint_threshold(distances: &[f32], config: &ChunkerConfig) -> f32 {
    match config.breakpoint_policy {
        BreakpointPolicy::Absolute => config.breakpoint_amount,
        BreakpointPolicy::Percentile => percentile(distances, config.breakpoint_amount),
    }
}

/// Nearest-rank percentile over the observed distance distribution.
fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return f32::MAX;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);

    let rank = ((pct / 100.0) * sorted.len() as f32).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len().saturating_sub(1));
    sorted.get(index).copied().unwrap_or(f32::MAX)
}

fn assemble(units: &[String], distances: &[f32], threshold: f32) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for (i, unit) in units.iter().enumerate() {
        current.push(unit.as_str());
        let breaks_here = distances.get(i).is_some_and(|d| *d > threshold);
        if breaks_here {
            chunks.push(current.join(" "));
            current.clear();
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}
