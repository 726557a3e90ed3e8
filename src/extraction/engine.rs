//! Extraction completion engine.
//!
//! Single entry point that drives the full document pipeline:
//! mask → split → classify → extract per strategy → merge.
//!
//! Classification is resolved once, from the first unit, before any field
//! extraction. Under Paginate each unit is extracted independently and
//! merged first-writer-wins by unit index; under Concatenate units are
//! batched under a combined token budget and merged by simple union. Unit
//! failures are contained to that unit's contribution and recorded in the
//! result's failure manifest.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::document::split::{
    choose_strategy, ContentUnit, SplitConfig, SplitStrategy, Splitter, UnitCursor,
};
use crate::document::Document;
use crate::providers::fallback::{failure_reason, FallbackController};
use crate::providers::{GenerationParams, GenerationRequest};

use super::classify::{
    match_contract, parse_classification, Classification, ClassificationPolicy,
};
use super::contract::{ExtractionContract, FieldValue};
use super::parser::parse_field_values;
use super::privacy::{MaskingMode, PiiSpan, PrivacyFilter};
use super::prompt::{
    build_classification_prompt, build_extraction_prompt, CLASSIFICATION_SYSTEM_PROMPT,
    EXTRACTION_SYSTEM_PROMPT,
};
use super::{
    ExtractError, ExtractedField, ExtractionResult, FieldProvenance, UnitFailure,
    MIN_INPUT_LENGTH,
};

/// Characters of the first unit shown to the classifier.
const CLASSIFICATION_EXCERPT_CHARS: usize = 1500;

/// How split units are turned into one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStrategy {
    /// One extraction call per unit, merged first-writer-wins.
    Paginate,
    /// Units joined into token-budgeted batches, fewer larger calls.
    Concatenate,
}

/// Per-run processing options.
#[derive(Clone)]
pub struct ProcessOptions {
    /// Contracts the classifier may select from.
    pub contracts: Vec<ExtractionContract>,
    /// Splitting strategy. None = choose from document size vs context.
    pub splitting: Option<SplitStrategy>,
    pub completion: CompletionStrategy,
    pub masking: MaskingMode,
    pub cancel: CancellationToken,
}

impl ProcessOptions {
    pub fn new(contracts: Vec<ExtractionContract>) -> Self {
        Self {
            contracts,
            splitting: None,
            completion: CompletionStrategy::Paginate,
            masking: MaskingMode::PreSplit,
            cancel: CancellationToken::new(),
        }
    }

    /// Options seeded with the configured strategy and masking defaults.
    pub fn from_settings(settings: &Settings, contracts: Vec<ExtractionContract>) -> Self {
        Self {
            completion: settings.completion_strategy,
            masking: settings.masking,
            ..Self::new(contracts)
        }
    }

    pub fn with_splitting(mut self, strategy: SplitStrategy) -> Self {
        self.splitting = Some(strategy);
        self
    }

    pub fn with_completion(mut self, strategy: CompletionStrategy) -> Self {
        self.completion = strategy;
        self
    }

    pub fn with_masking(mut self, masking: MaskingMode) -> Self {
        self.masking = masking;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Orchestrates document extraction over the provider fallback chain.
pub struct CompletionEngine {
    fallback: Arc<FallbackController>,
    privacy: PrivacyFilter,
    split_config: SplitConfig,
    max_context_tokens: usize,
    max_batch_tokens: usize,
    max_workers: usize,
    document_deadline: Option<Duration>,
    classification_threshold: f32,
    classification_policy: ClassificationPolicy,
    extraction_params: GenerationParams,
}

impl CompletionEngine {
    pub fn new(fallback: Arc<FallbackController>, settings: &Settings) -> Self {
        Self {
            fallback,
            privacy: PrivacyFilter::new(),
            split_config: SplitConfig {
                max_unit_tokens: settings.max_unit_tokens,
                overlap_tokens: settings.overlap_tokens,
            },
            max_context_tokens: settings.max_context_tokens,
            max_batch_tokens: settings.max_batch_tokens,
            max_workers: settings.max_workers.max(1),
            document_deadline: settings.document_deadline_secs.map(Duration::from_secs),
            classification_threshold: settings.classification_threshold,
            classification_policy: settings.classification_policy,
            // Accuracy-first sampling for extraction work
            extraction_params: GenerationParams {
                temperature: 0.1,
                top_p: 0.9,
                max_tokens: 2048,
            },
        }
    }

    /// Process one document into a structured extraction result.
    ///
    /// Document-level failures (unreadable input, cancellation) return an
    /// error; unit-level failures are contained in the result's manifest.
    pub fn process(
        &self,
        document: &Document,
        options: &ProcessOptions,
    ) -> Result<ExtractionResult, ExtractError> {
        let _span = tracing::info_span!("process_document", doc_id = %document.id).entered();
        let started = Instant::now();

        if document.text.trim().len() < MIN_INPUT_LENGTH {
            return Err(ExtractError::InputTooShort);
        }
        if options.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        // Masking in transit happens before any text leaves the process.
        let mut masked_spans: Vec<PiiSpan> = Vec::new();
        let text: String = if options.masking == MaskingMode::PreSplit {
            let outcome = self.privacy.mask(&document.text);
            masked_spans = outcome.spans;
            outcome.masked
        } else {
            document.text.clone()
        };

        let strategy = options
            .splitting
            .unwrap_or_else(|| choose_strategy(&text, self.max_context_tokens));
        let splitter = Splitter::new(self.split_config);

        let mut source = match strategy {
            SplitStrategy::Eager => UnitSource::Materialized(splitter.split_eager(&text).into_iter()),
            SplitStrategy::Lazy => UnitSource::Cursor(splitter.cursor(&text)),
        };

        let Some(first) = source.next_unit() else {
            return Err(ExtractError::InputTooShort);
        };
        let mut pending = vec![first];

        // Classification pre-pass: one label per document, fixed before
        // extraction starts.
        let (classification, contract) =
            self.classify(&options.contracts, &mut pending, &mut source);

        tracing::info!(
            doc_id = %document.id,
            label = %classification.label,
            confidence = classification.confidence,
            strategy = ?strategy,
            "document classified"
        );

        let degraded = classification.confidence < self.classification_threshold;

        let Some(contract) = contract else {
            // No contract to extract against. A provider-failure
            // classification marks every unit failed; an unmatched label
            // yields a degraded result with no field data.
            let failed = classification.label == "failed";
            let reason = classification_failure_reason(&classification);
            drain(&mut source, &mut pending);

            let failed_units = if failed {
                pending
                    .iter()
                    .map(|u| UnitFailure {
                        unit_index: u.index,
                        reason: reason.clone(),
                    })
                    .collect()
            } else {
                Vec::new()
            };

            return Ok(ExtractionResult {
                document_id: document.id,
                doc_type: if failed { "unknown".into() } else { classification.label },
                classification_confidence: classification.confidence,
                degraded: true,
                fields: Vec::new(),
                failed_units,
                unit_count: pending.len(),
                masked_spans,
            });
        };

        // Field extraction under the selected completion strategy.
        let (partials, failures, unit_count) = match options.completion {
            CompletionStrategy::Concatenate => {
                drain(&mut source, &mut pending);
                self.run_concatenate(contract, &pending, options, started)?
            }
            CompletionStrategy::Paginate => match strategy {
                SplitStrategy::Eager => {
                    drain(&mut source, &mut pending);
                    if pending.len() > 1 && self.max_workers > 1 {
                        self.run_paginate_parallel(contract, &pending, options, started)?
                    } else {
                        self.run_paginate_sequential(
                            contract, pending, &mut source, options, started, false,
                        )?
                    }
                }
                SplitStrategy::Lazy => self.run_paginate_sequential(
                    contract, pending, &mut source, options, started, true,
                )?,
            },
        };

        let mut fields = merge_unit_fields(contract, &partials);

        if options.masking == MaskingMode::PostExtract {
            self.mask_fields(&mut fields, &mut masked_spans);
        }

        tracing::info!(
            doc_id = %document.id,
            doc_type = %contract.doc_type,
            fields = fields.len(),
            failed_units = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "processing complete"
        );

        Ok(ExtractionResult {
            document_id: document.id,
            doc_type: contract.doc_type.clone(),
            classification_confidence: classification.confidence,
            degraded,
            fields,
            failed_units: failures,
            unit_count,
            masked_spans,
        })
    }

    /// Batch variant: one result per document; a document-level failure does
    /// not abort the rest of the batch.
    pub fn process_many(
        &self,
        documents: &[Document],
        options: &ProcessOptions,
    ) -> Vec<(Uuid, Result<ExtractionResult, ExtractError>)> {
        documents
            .iter()
            .map(|document| {
                let result = self.process(document, options);
                if let Err(e) = &result {
                    tracing::error!(doc_id = %document.id, error = %e, "document failed in batch");
                }
                (document.id, result)
            })
            .collect()
    }

    /// Run diagnostics across every registered provider.
    pub fn benchmark(&self, prompt: &str) -> Vec<crate::providers::fallback::BenchmarkRecord> {
        self.fallback.benchmark(prompt)
    }

    // ── Classification ──────────────────────────────────────────────

    /// Classify from the first unit. Under `HighestConfidence`, a
    /// low-confidence first read may be replaced by a more confident read of
    /// the second unit before extraction starts; once a confident label
    /// exists it never changes.
    fn classify<'c>(
        &self,
        contracts: &'c [ExtractionContract],
        pending: &mut Vec<ContentUnit>,
        source: &mut UnitSource<'_>,
    ) -> (Classification, Option<&'c ExtractionContract>) {
        let mut classification = self.classify_unit(contracts, &pending[0]);

        if self.classification_policy == ClassificationPolicy::HighestConfidence
            && classification.confidence < self.classification_threshold
        {
            if let Some(second) = source.next_unit() {
                let retry = self.classify_unit(contracts, &second);
                pending.push(second);
                if retry.confidence > classification.confidence {
                    classification = retry;
                }
            }
        }

        let contract = match_contract(contracts, &classification.label);
        (classification, contract)
    }

    fn classify_unit(
        &self,
        contracts: &[ExtractionContract],
        unit: &ContentUnit,
    ) -> Classification {
        let excerpt = truncate_chars(&unit.text, CLASSIFICATION_EXCERPT_CHARS);
        let request = GenerationRequest::new(build_classification_prompt(contracts, excerpt))
            .with_system(CLASSIFICATION_SYSTEM_PROMPT)
            .with_params(GenerationParams {
                temperature: 0.1,
                top_p: 0.9,
                max_tokens: 128,
            });

        match self.fallback.execute(&request) {
            Ok(result) => parse_classification(&result.completion.text),
            Err(e) => {
                tracing::warn!(error = %e, "classification call failed");
                Classification {
                    label: "failed".into(),
                    confidence: 0.0,
                }
            }
        }
    }

    // ── Paginate ────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn run_paginate_sequential(
        &self,
        contract: &ExtractionContract,
        pending: Vec<ContentUnit>,
        source: &mut UnitSource<'_>,
        options: &ProcessOptions,
        started: Instant,
        allow_short_circuit: bool,
    ) -> Result<UnitOutcomes, ExtractError> {
        let mut partials: Vec<UnitPartial> = Vec::new();
        let mut failures: Vec<UnitFailure> = Vec::new();
        let mut unit_count = 0;

        let mut pending = pending.into_iter();
        loop {
            let Some(unit) = pending.next().or_else(|| source.next_unit()) else {
                break;
            };
            unit_count += 1;

            if options.cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            if self.deadline_exceeded(started) {
                failures.push(UnitFailure {
                    unit_index: unit.index,
                    reason: "document deadline exceeded".into(),
                });
                // Account for units that will never be processed
                for unit in pending.by_ref() {
                    unit_count += 1;
                    failures.push(UnitFailure {
                        unit_index: unit.index,
                        reason: "document deadline exceeded".into(),
                    });
                }
                while let Some(unit) = source.next_unit() {
                    unit_count += 1;
                    failures.push(UnitFailure {
                        unit_index: unit.index,
                        reason: "document deadline exceeded".into(),
                    });
                }
                break;
            }

            match self.extract_unit_with_retry(contract, &unit) {
                Ok((values, provider)) => {
                    partials.push((unit.index, provider, values));
                }
                Err(reason) => failures.push(UnitFailure {
                    unit_index: unit.index,
                    reason,
                }),
            }

            // Lazy pull model: stop early once every required field is
            // populated — later units cannot displace them anyway.
            if allow_short_circuit && required_fields_satisfied(contract, &partials) {
                tracing::info!(
                    units_processed = unit_count,
                    "required fields satisfied, short-circuiting remaining units"
                );
                break;
            }
        }

        Ok((partials, failures, unit_count))
    }

    fn run_paginate_parallel(
        &self,
        contract: &ExtractionContract,
        units: &[ContentUnit],
        options: &ProcessOptions,
        started: Instant,
    ) -> Result<UnitOutcomes, ExtractError> {
        let worker_count = self.max_workers.min(units.len());
        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<Result<(Vec<(String, FieldValue)>, String), String>>>> =
            units.iter().map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= units.len() || options.cancel.is_cancelled() {
                        break;
                    }
                    let outcome = if self.deadline_exceeded(started) {
                        Err("document deadline exceeded".to_string())
                    } else {
                        self.extract_unit_with_retry(contract, &units[i])
                    };
                    *slots[i].lock().unwrap() = Some(outcome);
                });
            }
        });

        if options.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }

        // Reassemble by original unit index, not completion order.
        let mut partials: Vec<UnitPartial> = Vec::new();
        let mut failures: Vec<UnitFailure> = Vec::new();
        for (unit, slot) in units.iter().zip(slots) {
            match slot.into_inner().unwrap() {
                Some(Ok((values, provider))) => partials.push((unit.index, provider, values)),
                Some(Err(reason)) => failures.push(UnitFailure {
                    unit_index: unit.index,
                    reason,
                }),
                None => failures.push(UnitFailure {
                    unit_index: unit.index,
                    reason: "not processed".into(),
                }),
            }
        }

        Ok((partials, failures, units.len()))
    }

    // ── Concatenate ─────────────────────────────────────────────────

    fn run_concatenate(
        &self,
        contract: &ExtractionContract,
        units: &[ContentUnit],
        options: &ProcessOptions,
        started: Instant,
    ) -> Result<UnitOutcomes, ExtractError> {
        let batches = batch_units(units, self.max_batch_tokens);
        let mut partials: Vec<UnitPartial> = Vec::new();
        let mut failures: Vec<UnitFailure> = Vec::new();

        for batch in &batches {
            if options.cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            if self.deadline_exceeded(started) {
                for unit in batch {
                    failures.push(UnitFailure {
                        unit_index: unit.index,
                        reason: "document deadline exceeded".into(),
                    });
                }
                continue;
            }

            let joined: String = batch
                .iter()
                .map(|u| u.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let lead_index = batch[0].index;

            match self.extract_text_with_retry(contract, &joined) {
                Ok((values, provider)) => partials.push((lead_index, provider, values)),
                Err(reason) => {
                    for unit in batch {
                        failures.push(UnitFailure {
                            unit_index: unit.index,
                            reason: reason.clone(),
                        });
                    }
                }
            }
        }

        Ok((partials, failures, units.len()))
    }

    // ── Unit extraction ─────────────────────────────────────────────

    /// One extraction attempt through the fallback chain, then one full
    /// retry before the unit is marked failed.
    fn extract_unit_with_retry(
        &self,
        contract: &ExtractionContract,
        unit: &ContentUnit,
    ) -> Result<(Vec<(String, FieldValue)>, String), String> {
        self.extract_text_with_retry(contract, &unit.text)
    }

    fn extract_text_with_retry(
        &self,
        contract: &ExtractionContract,
        text: &str,
    ) -> Result<(Vec<(String, FieldValue)>, String), String> {
        match self.extract_text(contract, text) {
            Ok(ok) => Ok(ok),
            Err(first) => {
                tracing::warn!(reason = %first, "unit extraction failed, retrying once");
                self.extract_text(contract, text)
            }
        }
    }

    fn extract_text(
        &self,
        contract: &ExtractionContract,
        text: &str,
    ) -> Result<(Vec<(String, FieldValue)>, String), String> {
        let request = GenerationRequest::new(build_extraction_prompt(contract, text))
            .with_system(EXTRACTION_SYSTEM_PROMPT)
            .with_params(self.extraction_params);

        match self.fallback.execute(&request) {
            Ok(result) => parse_field_values(&result.completion.text, contract)
                .map(|values| (values, result.provider))
                .map_err(|e| e.to_string()),
            Err(e) => Err(failure_reason(&e)),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn deadline_exceeded(&self, started: Instant) -> bool {
        self.document_deadline
            .map(|limit| started.elapsed() > limit)
            .unwrap_or(false)
    }

    /// Mask text-bearing field values in place (protection at rest).
    fn mask_fields(&self, fields: &mut [ExtractedField], spans: &mut Vec<PiiSpan>) {
        for field in fields {
            match &mut field.value {
                FieldValue::Text(text) => {
                    let outcome = self.privacy.mask(text);
                    spans.extend(outcome.spans);
                    *text = outcome.masked;
                }
                FieldValue::List(items) => {
                    for item in items {
                        let outcome = self.privacy.mask(item);
                        spans.extend(outcome.spans);
                        *item = outcome.masked;
                    }
                }
                _ => {}
            }
        }
    }
}

type UnitPartial = (usize, String, Vec<(String, FieldValue)>);
type UnitOutcomes = (Vec<UnitPartial>, Vec<UnitFailure>, usize);

enum UnitSource<'a> {
    Materialized(std::vec::IntoIter<ContentUnit>),
    Cursor(UnitCursor<'a>),
}

impl UnitSource<'_> {
    fn next_unit(&mut self) -> Option<ContentUnit> {
        match self {
            Self::Materialized(iter) => iter.next(),
            Self::Cursor(cursor) => cursor.next_unit(),
        }
    }
}

fn drain(source: &mut UnitSource<'_>, pending: &mut Vec<ContentUnit>) {
    while let Some(unit) = source.next_unit() {
        pending.push(unit);
    }
}

fn classification_failure_reason(classification: &Classification) -> String {
    if classification.label == "failed" {
        "classification failed: no provider produced a usable response".into()
    } else {
        format!("no contract for label '{}'", classification.label)
    }
}

/// Merge per-unit field values in unit-index order.
///
/// A later unit may fill a previously-empty field or append to a list; it
/// never overwrites a populated scalar unless the contract marks the field
/// overwritable. Input is sorted here so merge output is independent of the
/// order units completed in.
pub(crate) fn merge_unit_fields(
    contract: &ExtractionContract,
    partials: &[UnitPartial],
) -> Vec<ExtractedField> {
    let mut ordered: Vec<&UnitPartial> = partials.iter().collect();
    ordered.sort_by_key(|(unit_index, _, _)| *unit_index);

    let mut fields: Vec<ExtractedField> = Vec::new();

    for (unit_index, provider, values) in ordered {
        for (name, value) in values {
            let overwritable = contract.field(name).map(|s| s.overwritable).unwrap_or(false);

            match fields.iter_mut().find(|f| &f.name == name) {
                None => fields.push(ExtractedField {
                    name: name.clone(),
                    value: value.clone(),
                    provenance: FieldProvenance {
                        unit_index: *unit_index,
                        provider: provider.clone(),
                    },
                }),
                Some(existing) => match (&mut existing.value, value) {
                    (FieldValue::List(items), FieldValue::List(new_items)) => {
                        for item in new_items {
                            if !items.contains(item) {
                                items.push(item.clone());
                            }
                        }
                    }
                    _ if overwritable => {
                        existing.value = value.clone();
                        existing.provenance = FieldProvenance {
                            unit_index: *unit_index,
                            provider: provider.clone(),
                        };
                    }
                    // First writer wins
                    _ => {}
                },
            }
        }
    }

    fields
}

/// True when every required field of the contract has a value.
fn required_fields_satisfied(contract: &ExtractionContract, partials: &[UnitPartial]) -> bool {
    let required: Vec<&str> = contract
        .fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    if required.is_empty() {
        return false;
    }
    required.iter().all(|name| {
        partials
            .iter()
            .any(|(_, _, values)| values.iter().any(|(n, _)| n == name))
    })
}

/// Greedy batching under a combined token budget. Every batch holds at
/// least one unit, so an oversize unit still gets a call of its own.
fn batch_units(units: &[ContentUnit], max_batch_tokens: usize) -> Vec<Vec<&ContentUnit>> {
    let mut batches: Vec<Vec<&ContentUnit>> = Vec::new();
    let mut current: Vec<&ContentUnit> = Vec::new();
    let mut current_tokens = 0;

    for unit in units {
        if !current.is_empty() && current_tokens + unit.token_estimate > max_batch_tokens {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += unit.token_estimate;
        current.push(unit);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
