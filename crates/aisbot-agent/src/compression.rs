//! Context compression engine.
//!
//! Keeps prompts inside a token budget while preserving the system prompt
//! and the most recent turns. Older history is rewritten by one of three
//! strategies: plain truncation, importance-scored section selection, or an
//! LLM-generated summary. Token counts use the `⌈chars/4⌉` heuristic over
//! string content and text parts; image parts are not counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use aisbot_core::config::CompressionConfig;
use aisbot_core::types::{Message, MessageContent};
use aisbot_providers::traits::{LlmProvider, LlmRequestConfig};

/// Ratio applied to older history messages.
const HISTORY_RATIO: f64 = 0.3;
/// Ratio applied to oversized tool results.
pub const TOOL_RESULT_RATIO: f64 = 0.4;

/// Per-strategy minimum content sizes; content at or under the bound passes
/// through untouched.
const TRUNCATION_MIN_CHARS: usize = 200;
const SUMMARY_MIN_CHARS: usize = 400;
const SEMANTIC_MIN_CHARS: usize = 500;

// ─────────────────────────────────────────────
// Token estimation
// ─────────────────────────────────────────────

/// `⌈chars/4⌉` for one piece of text.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimated tokens for a whole message array. Multimodal image parts are
/// ignored; only their sibling text parts count.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|msg| match msg {
            Message::User {
                content: MessageContent::Parts(parts),
                ..
            } => parts
                .iter()
                .map(|part| match part {
                    aisbot_core::types::ContentPart::Text { text } => estimate_text_tokens(text),
                    aisbot_core::types::ContentPart::ImageUrl { .. } => 0,
                })
                .sum(),
            other => other.text_content().map(estimate_text_tokens).unwrap_or(0),
        })
        .sum()
}

// ─────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────

/// A content rewriter. `target_ratio` is the desired output/input size.
#[async_trait]
pub trait CompressionStrategy: Send + Sync {
    async fn compress(&self, content: &str, target_ratio: f64) -> String;
}

/// Cuts at a character budget, preferring a nearby sentence break.
pub struct TruncationStrategy;

#[async_trait]
impl CompressionStrategy for TruncationStrategy {
    async fn compress(&self, content: &str, target_ratio: f64) -> String {
        let total_chars = content.chars().count();
        if total_chars <= TRUNCATION_MIN_CHARS {
            return content.to_string();
        }

        let target_chars = (total_chars as f64 * target_ratio) as usize;
        if target_chars >= total_chars {
            return content.to_string();
        }

        let prefix = char_prefix(content, target_chars);
        let break_point = prefix.rfind('.').into_iter().chain(prefix.rfind('\n')).max();

        let truncated = match break_point {
            // Keep the break only when it lands in the last 30% of the slice.
            Some(bp) if bp as f64 > prefix.len() as f64 * 0.7 => &prefix[..=bp],
            _ => prefix,
        };

        debug!(
            original = total_chars,
            kept = truncated.chars().count(),
            "truncation applied"
        );
        if truncated.len() < content.len() {
            format!("{truncated}...")
        } else {
            truncated.to_string()
        }
    }
}

/// Keeps the most important sections, in original order.
pub struct SemanticStrategy;

impl SemanticStrategy {
    /// Split on blank lines; sections over 2000 chars are re-split into
    /// chunks of roughly 1000.
    fn split_sections(content: &str) -> Vec<String> {
        let mut sections = Vec::new();
        for block in content.split("\n\n") {
            if block.chars().count() > 2000 {
                let mut chunk = String::new();
                for line in block.split('\n') {
                    if !chunk.is_empty()
                        && chunk.chars().count() + line.chars().count() > 1000
                    {
                        sections.push(std::mem::take(&mut chunk));
                    }
                    if chunk.is_empty() {
                        chunk.push_str(line);
                    } else {
                        chunk.push('\n');
                        chunk.push_str(line);
                    }
                }
                if !chunk.is_empty() {
                    sections.push(chunk);
                }
            } else {
                sections.push(block.to_string());
            }
        }
        sections
    }

    fn importance(section: &str) -> f64 {
        const KEY_TERMS: [&str; 7] = [
            "error",
            "exception",
            "result",
            "summary",
            "conclusion",
            "important",
            "critical",
        ];

        let mut score = 1.0;
        if section.contains("```") {
            score += 2.0;
        }
        let trimmed = section.trim();
        if trimmed.starts_with("# ") || trimmed.starts_with("## ") || trimmed.starts_with("### ") {
            score += 1.5;
        }
        let lower = section.to_lowercase();
        for term in KEY_TERMS {
            if lower.contains(term) {
                score += 0.5;
            }
        }
        if section.chars().count() < 100 {
            score *= 0.5;
        }
        score
    }
}

#[async_trait]
impl CompressionStrategy for SemanticStrategy {
    async fn compress(&self, content: &str, target_ratio: f64) -> String {
        if content.chars().count() <= SEMANTIC_MIN_CHARS {
            return content.to_string();
        }

        let sections = Self::split_sections(content);
        if sections.len() <= 1 {
            return TruncationStrategy.compress(content, target_ratio).await;
        }

        let scores: Vec<f64> = sections.iter().map(|s| Self::importance(s)).collect();
        if scores.iter().sum::<f64>() == 0.0 {
            return TruncationStrategy.compress(content, target_ratio).await;
        }

        let target = std::cmp::max(1, (sections.len() as f64 * target_ratio) as usize);

        // Stable index-annotated sort: highest score first, earlier section
        // winning ties; output preserves original order.
        let mut order: Vec<usize> = (0..sections.len()).collect();
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let keep: std::collections::BTreeSet<usize> = order.into_iter().take(target).collect();

        let kept: Vec<&str> = keep.iter().map(|&i| sections[i].as_str()).collect();
        debug!(
            sections = sections.len(),
            kept = kept.len(),
            "semantic compression applied"
        );
        kept.join("\n\n")
    }
}

/// Asks the LLM for a shorter rendition. Failures fall back to the original.
pub struct SummaryStrategy {
    provider: Arc<dyn LlmProvider>,
}

impl SummaryStrategy {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CompressionStrategy for SummaryStrategy {
    async fn compress(&self, content: &str, target_ratio: f64) -> String {
        if content.chars().count() <= SUMMARY_MIN_CHARS {
            return content.to_string();
        }

        let prompt = format!(
            "Summarize the following content concisely, preserving key information. \
             Aim for roughly {}% of the original length.\n\n{content}\n\nSummary:",
            (target_ratio * 100.0) as i64
        );
        let response = self
            .provider
            .chat(
                &[Message::user(prompt)],
                None,
                self.provider.default_model(),
                &LlmRequestConfig::default(),
            )
            .await;

        // A failed call carries no finish reason; keep the original then.
        if response.finish_reason.is_none() {
            warn!("summary generation failed; keeping original content");
            return content.to_string();
        }
        match response.content {
            Some(summary) if !summary.trim().is_empty() => {
                debug!(
                    original = content.len(),
                    summary = summary.trim().len(),
                    "summary generated"
                );
                summary.trim().to_string()
            }
            _ => content.to_string(),
        }
    }
}

/// Prefix of `content` holding at most `n_chars` characters.
fn char_prefix(content: &str, n_chars: usize) -> &str {
    match content.char_indices().nth(n_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

// ─────────────────────────────────────────────
// System prompt cache
// ─────────────────────────────────────────────

/// Caches assembled system prompts keyed by their source material. A hit
/// requires both the key and an identical hash of the serialized sources.
pub struct SystemPromptCache {
    entries: Mutex<HashMap<String, (String, String)>>,
}

impl SystemPromptCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str, serialized_sources: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let (prompt, cached_hash) = entries.get(key)?;
        if *cached_hash == content_hash(serialized_sources) {
            debug!(key, "system prompt cache hit");
            Some(prompt.clone())
        } else {
            debug!(key, "system prompt cache stale");
            None
        }
    }

    pub fn set(&self, key: &str, prompt: &str, serialized_sources: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            (prompt.to_string(), content_hash(serialized_sources)),
        );
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Default for SystemPromptCache {
    fn default() -> Self {
        Self::new()
    }
}

/// 16-hex-char prefix of SHA-256.
fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

// ─────────────────────────────────────────────
// Compressor
// ─────────────────────────────────────────────

/// Outcome of one compression run.
#[derive(Clone, Debug, Default)]
pub struct CompressionStats {
    pub compressed: bool,
    pub reason: Option<String>,
    pub original_tokens: usize,
    pub final_tokens: usize,
    pub reduction: usize,
    pub reduction_percent: f64,
}

impl CompressionStats {
    fn skipped(reason: &str, original_tokens: usize) -> Self {
        CompressionStats {
            compressed: false,
            reason: Some(reason.to_string()),
            original_tokens,
            final_tokens: original_tokens,
            ..Default::default()
        }
    }
}

/// The compression engine: message-history compaction plus the system
/// prompt cache.
pub struct ContextCompressor {
    config: CompressionConfig,
    strategies: HashMap<&'static str, Arc<dyn CompressionStrategy>>,
    prompt_cache: SystemPromptCache,
}

impl ContextCompressor {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompressionConfig) -> Self {
        let mut strategies: HashMap<&'static str, Arc<dyn CompressionStrategy>> = HashMap::new();
        strategies.insert("truncation", Arc::new(TruncationStrategy));
        strategies.insert("semantic", Arc::new(SemanticStrategy));
        strategies.insert("summary", Arc::new(SummaryStrategy::new(provider)));
        Self {
            config,
            strategies,
            prompt_cache: SystemPromptCache::new(),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// The strategy registered under `name`, if any.
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn CompressionStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// The configured strategy, defaulting to semantic for unknown names.
    pub fn active_strategy(&self) -> Arc<dyn CompressionStrategy> {
        self.strategies
            .get(self.config.strategy.as_str())
            .or_else(|| self.strategies.get("semantic"))
            .cloned()
            .expect("semantic strategy is always registered")
    }

    /// Compact a message array to fit `target_context_tokens`.
    ///
    /// System messages and the trailing `recent_messages_keep` non-system
    /// messages pass through byte-identical; older messages with long string
    /// content are rewritten and marked.
    pub async fn compress_messages(
        &self,
        messages: &[Message],
    ) -> (Vec<Message>, CompressionStats) {
        if !self.config.enabled {
            return (
                messages.to_vec(),
                CompressionStats::skipped("disabled", estimate_tokens(messages)),
            );
        }

        let original_tokens = estimate_tokens(messages);
        debug!(tokens = original_tokens, "estimated tokens before compression");

        if original_tokens <= self.config.target_context_tokens {
            return (
                messages.to_vec(),
                CompressionStats::skipped("under_limit", original_tokens),
            );
        }

        let (system, others): (Vec<&Message>, Vec<&Message>) = messages
            .iter()
            .partition(|m| matches!(m, Message::System { .. }));

        if others.len() <= self.config.recent_messages_keep {
            return (
                messages.to_vec(),
                CompressionStats::skipped("history_within_recent_window", original_tokens),
            );
        }

        let split = others.len() - self.config.recent_messages_keep;
        let (older, recent) = others.split_at(split);

        let strategy = self.active_strategy();
        let mut compacted: Vec<Message> = system.into_iter().cloned().collect();
        for msg in older {
            match msg.text_content() {
                Some(text) if text.chars().count() > self.config.min_content_length => {
                    let original_len = text.len();
                    let rewritten = strategy.compress(text, HISTORY_RATIO).await;
                    compacted.push(msg.with_compressed_content(rewritten, original_len));
                }
                _ => compacted.push((*msg).clone()),
            }
        }
        compacted.extend(recent.iter().map(|m| (*m).clone()));

        let final_tokens = estimate_tokens(&compacted);
        let reduction = original_tokens.saturating_sub(final_tokens);
        let stats = CompressionStats {
            compressed: true,
            reason: None,
            original_tokens,
            final_tokens,
            reduction,
            reduction_percent: if original_tokens > 0 {
                reduction as f64 / original_tokens as f64 * 100.0
            } else {
                0.0
            },
        };
        info!(
            original_tokens,
            final_tokens,
            percent = format!("{:.1}", stats.reduction_percent),
            "context compression complete"
        );
        (compacted, stats)
    }

    /// Run the system prompt through the cache. The prompt is returned
    /// either way; a hit returns the cached copy.
    pub fn compress_system_prompt(
        &self,
        system_prompt: &str,
        content_sources: &BTreeMap<String, String>,
    ) -> String {
        if !self.config.preserve_system_prompt_cache {
            return system_prompt.to_string();
        }

        let serialized = serde_json::to_string(content_sources).unwrap_or_default();
        let key = content_hash(&serialized);

        if let Some(cached) = self.prompt_cache.get(&key, &serialized) {
            return cached;
        }
        self.prompt_cache.set(&key, system_prompt, &serialized);
        system_prompt.to_string()
    }

    /// Compact a tool result when it exceeds 1000 characters.
    pub async fn compress_tool_result(&self, result: &str) -> String {
        if result.chars().count() <= 1000 {
            return result.to_string();
        }
        let compressed = self
            .active_strategy()
            .compress(result, TOOL_RESULT_RATIO)
            .await;
        debug!(
            original = result.len(),
            compressed = compressed.len(),
            "tool result compressed"
        );
        compressed
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
