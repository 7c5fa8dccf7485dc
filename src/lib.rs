//! A context-anchored patch engine that applies LLM-generated diffs using
//! fuzzy matching.
//!
//! `ctxpatch` applies a constrained, context-style diff dialect to a text
//! buffer. Unlike the standard `patch` command, the dialect carries no
//! reliable line numbers: a hunk is delimited by a bare `@@ ... @@` marker
//! and located purely by searching for its *anchor* — the context and
//! removal lines that are expected to already exist in the target text.
//!
//! This makes the engine resilient to the kinds of noise language models
//! produce: mismatched indentation, missing alignment spaces on context
//! lines, and hunks whose surrounding code has drifted since the model last
//! saw it. Hunks that cannot be located are skipped and reported as
//! [`Diagnostic`]s — partial application is a first-class outcome, never a
//! panic or an error.
//!
//! ## Getting Started
//!
//! The most common use case is to apply a raw patch payload to a source
//! string and inspect the result:
//!
//! ```rust
//! use ctxpatch::{apply_patch, ApplyOptions};
//!
//! let source = "line1\nline2\nline3\n";
//! let patch = "@@ ... @@\nline1\n-line2\n+lineX\nline3\n";
//!
//! let outcome = apply_patch(source, patch, &ApplyOptions::default());
//!
//! assert_eq!(outcome.patched_text, "line1\nlineX\nline3\n");
//! assert!(outcome.report.all_applied_cleanly());
//! assert!(outcome.diagnostics.is_empty());
//! ```
//!
//! ## Key Concepts
//!
//! ### The Patching Workflow
//!
//! Using the library typically involves three steps:
//!
//! 1.  **Extracting:** [`extract_patch_blocks`] pulls ` ```diff ` / ` ```patch `
//!     fenced blocks out of a model's free-text response, in order.
//! 2.  **Parsing:** [`parse_patch`] turns one raw payload into an immutable
//!     [`Patch`] — an ordered list of [`Hunk`]s, each an ordered list of
//!     typed [`HunkLine`]s. Parsing never fails; a payload without hunk
//!     markers simply yields an empty patch.
//! 3.  **Applying:** [`apply_patch`] folds the hunks over a working buffer,
//!     re-locating every hunk against the *current* (already edited) text.
//!     [`apply_patch_sequence`] chains several payloads, feeding each one
//!     the previous payload's output.
//!
//! ### Anchor-Driven Matching
//!
//! A hunk's anchor is matched by sliding a window over the buffer and
//! scoring each position: one point per line whose whitespace-trimmed text
//! matches, plus a bonus proportional to the unbroken matching run at the
//! tail of the window (a correct trailing run correlates strongly with the
//! model having produced the right context, even when it fumbled the
//! indentation earlier in the hunk). The best-scoring window is accepted
//! only if its score reaches `threshold × anchor length`.
//!
//! Both levers are named, overridable fields of [`ApplyOptions`] —
//! [`DEFAULT_MATCH_THRESHOLD`] and [`DEFAULT_RUN_BONUS`] are hand-tuned
//! trade-offs between tolerating LLM noise and editing the wrong location,
//! not principled truths.
//!
//! ## Partial Failure
//!
//! ```rust
//! use ctxpatch::{apply_patch, ApplyOptions, DiagnosticKind};
//!
//! let source = "alpha\nbeta\ngamma\n";
//! // The second hunk's anchor does not exist anywhere in the source.
//! let patch = "@@ ... @@\nalpha\n-beta\n+BETA\ngamma\n\
//!              @@ ... @@\nnope1\n-nope2\n+yes\nnope3\n";
//!
//! let outcome = apply_patch(source, patch, &ApplyOptions::default());
//!
//! // The first hunk still applied.
//! assert_eq!(outcome.patched_text, "alpha\nBETA\ngamma\n");
//!
//! // The second is reported, with its anchor text for human triage.
//! assert_eq!(outcome.diagnostics.len(), 1);
//! assert_eq!(outcome.diagnostics[0].hunk_index, 2);
//! assert!(matches!(
//!     outcome.diagnostics[0].kind,
//!     DiagnosticKind::UnresolvedHunk { .. }
//! ));
//! assert!(outcome.diagnostics[0].anchor_preview.contains("nope2"));
//! ```

use log::{debug, info, trace, warn};
use similar::udiff::unified_diff;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default acceptance threshold for the fuzzy anchor search.
///
/// A candidate window is accepted only if its weighted score reaches
/// `threshold × anchor length`. Raising it trades false accepts for false
/// rejects.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Default weight of the trailing-run bonus in the anchor score.
pub const DEFAULT_RUN_BONUS: f32 = 0.5;

// --- Error Types ---

/// Why a hunk (or a whole payload) could not be applied.
///
/// These are diagnostics, not failures: the engine records them and keeps
/// going. See [`Diagnostic`] for the record that carries them to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    /// The raw patch text contained no `@@ ... @@` hunk markers at all.
    /// The source text is returned unmodified.
    #[error("patch text contains no '@@ ... @@' hunk markers")]
    NoHunksFound,
    /// The hunk's anchor scored below the acceptance threshold everywhere
    /// in the current buffer. The hunk was skipped.
    #[error("anchor not found: best score {best_score:.2} below threshold {threshold:.2} of anchor length")]
    UnresolvedHunk {
        /// The best weighted score seen across the scan.
        best_score: f32,
        /// The threshold that was in effect.
        threshold: f32,
    },
    /// The hunk consists only of insertion lines, so it has no anchor and
    /// no deterministic location. It is reported, never guessed at.
    #[error("hunk has no context or removal lines to anchor on")]
    MalformedHunk,
}

/// Record of a hunk that failed to apply, carrying enough of its anchor
/// text to let a human locate the intended edit site.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// The 1-based index of the hunk within its patch. `0` means the
    /// diagnostic concerns the whole payload (see
    /// [`DiagnosticKind::NoHunksFound`]).
    pub hunk_index: usize,
    /// Why the hunk could not be applied.
    pub kind: DiagnosticKind,
    /// The hunk's anchor lines, newline-joined. Empty for payload-level
    /// diagnostics.
    pub anchor_preview: String,
}

/// Represents the possible hard errors of the filesystem convenience layer.
///
/// Semantic mismatches (unlocatable hunks) are *not* errors — they surface
/// as [`Diagnostic`]s. These variants are reserved for genuinely invalid
/// situations like unreadable files.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The user does not have permission to read or write the target.
    #[error("Permission denied for path: {path:?}")]
    PermissionDenied { path: PathBuf },
    /// The target path exists but is a directory, not a file.
    #[error("Target path is a directory, not a file: {path:?}")]
    TargetIsDirectory { path: PathBuf },
    /// Any other I/O error while reading or writing the target.
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Converts a `std::io::Error` into a more specific `PatchError`.
fn map_io_error(path: PathBuf, e: std::io::Error) -> PatchError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => PatchError::PermissionDenied { path },
        std::io::ErrorKind::IsADirectory => PatchError::TargetIsDirectory { path },
        _ => PatchError::Io { path, source: e },
    }
}

// --- Data Structures ---

/// The role a single line plays within a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Unchanged line: used to locate the hunk, then re-emitted.
    Context,
    /// Line present in the source and absent from the result.
    Remove,
    /// Line absent from the source and present in the result.
    Insert,
}

/// One classified line of a hunk body. Order-significant within its hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,
    /// The line's payload, marker stripped, without a trailing newline.
    pub content: String,
}

/// A single `@@ ... @@`-delimited block of changes.
///
/// A hunk is located in the target text by its *anchor* — the context and
/// removal lines — and realized by splicing in its *replacement block* —
/// the context and insertion lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// The classified lines of the hunk, in input order.
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Extracts the lines that must already exist in the target text.
    ///
    /// This includes context and removal lines, in order; insertion lines
    /// are excluded since they are not expected to exist yet. These lines
    /// form the search pattern the matcher slides over the buffer.
    ///
    /// # Example
    ///
    /// ```
    /// # use ctxpatch::parse_patch;
    /// let patch = parse_patch("@@ ... @@\n context\n-deleted\n+added\n");
    /// assert_eq!(patch.hunks[0].anchor_lines(), vec!["context", "deleted"]);
    /// ```
    pub fn anchor_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Insert)
            .map(|l| l.content.as_str())
            .collect()
    }

    /// Extracts the lines that will replace the matched anchor span.
    ///
    /// This includes context and insertion lines, in order. Removal lines
    /// are realized by their absence from this block.
    ///
    /// # Example
    ///
    /// ```
    /// # use ctxpatch::parse_patch;
    /// let patch = parse_patch("@@ ... @@\n context\n-deleted\n+added\n");
    /// assert_eq!(patch.hunks[0].replacement_lines(), vec!["context", "added"]);
    /// ```
    pub fn replacement_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Remove)
            .map(|l| l.content.as_str())
            .collect()
    }

    /// Checks whether the hunk has an anchor at all.
    ///
    /// A well-formed hunk contains at least one context or removal line; a
    /// hunk of pure insertions cannot be located deterministically and is
    /// reported as [`DiagnosticKind::MalformedHunk`].
    pub fn has_anchor(&self) -> bool {
        self.lines.iter().any(|l| l.kind != LineKind::Insert)
    }

    /// Checks whether the hunk contains any effective changes.
    ///
    /// A hunk with only context lines would splice the matched span back in
    /// unchanged, so it is skipped instead of applied.
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|l| l.kind != LineKind::Context)
    }

    /// The anchor lines joined with newlines, for diagnostics and logs.
    pub fn anchor_preview(&self) -> String {
        self.anchor_lines().join("\n")
    }
}

/// An immutable, ordered sequence of hunks parsed from one raw payload.
///
/// Hunks are applied in document order, each against the buffer as edited
/// by its predecessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// The hunks of the patch, in input order.
    pub hunks: Vec<Hunk>,
}

/// The result of searching for a hunk's anchor in the working buffer.
///
/// Produced and consumed within a single hunk's processing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchResult {
    /// The anchor was located, starting at the 0-based line `offset`.
    Matched { offset: usize, score: f32 },
    /// No window reached the acceptance threshold.
    Unmatched {
        /// The best weighted score seen anywhere in the scan.
        best_score: f32,
    },
}

/// The result of applying a single hunk to the working buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum HunkApplyStatus {
    /// The hunk was located and spliced in.
    Applied {
        /// The 0-based line offset the anchor matched at.
        offset: usize,
        /// The weighted match score at that offset.
        score: f32,
        /// The original lines that were replaced by the splice.
        replaced_lines: Vec<String>,
    },
    /// The hunk contained no insertions or removals and was skipped.
    SkippedNoChanges,
    /// The hunk could not be applied for the given reason.
    Failed(DiagnosticKind),
}

/// Options for configuring how a patch is matched and applied.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// If `true`, [`apply_patch_to_file`] will not modify the file and will
    /// return a unified diff of the proposed changes instead.
    pub dry_run: bool,
    /// Acceptance threshold for the fuzzy anchor search, as a fraction of
    /// the anchor length (0.0 to 1.0). Higher is stricter.
    pub threshold: f32,
    /// Weight of the trailing-run bonus in the anchor score.
    pub run_bonus: f32,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            threshold: DEFAULT_MATCH_THRESHOLD,
            run_bonus: DEFAULT_RUN_BONUS,
        }
    }
}

impl ApplyOptions {
    /// Creates a new builder for `ApplyOptions`.
    ///
    /// # Example
    ///
    /// ```
    /// # use ctxpatch::ApplyOptions;
    /// let options = ApplyOptions::builder()
    ///     .dry_run(true)
    ///     .threshold(0.8)
    ///     .build();
    ///
    /// assert!(options.dry_run);
    /// assert_eq!(options.threshold, 0.8);
    /// ```
    pub fn builder() -> ApplyOptionsBuilder {
        ApplyOptionsBuilder::default()
    }
}

/// A builder for creating `ApplyOptions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptionsBuilder {
    dry_run: Option<bool>,
    threshold: Option<f32>,
    run_bonus: Option<f32>,
}

impl ApplyOptionsBuilder {
    /// If `true`, no files will be modified by [`apply_patch_to_file`].
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    /// Sets the acceptance threshold for the fuzzy anchor search.
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Sets the weight of the trailing-run bonus.
    pub fn run_bonus(mut self, run_bonus: f32) -> Self {
        self.run_bonus = Some(run_bonus);
        self
    }

    /// Builds the `ApplyOptions`.
    pub fn build(self) -> ApplyOptions {
        let default = ApplyOptions::default();
        ApplyOptions {
            dry_run: self.dry_run.unwrap_or(default.dry_run),
            threshold: self.threshold.unwrap_or(default.threshold),
            run_bonus: self.run_bonus.unwrap_or(default.run_bonus),
        }
    }
}

/// Contains detailed per-hunk results for one patch application.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyReport {
    /// One status per hunk, in patch order.
    pub hunk_results: Vec<HunkApplyStatus>,
}

impl ApplyReport {
    /// Checks if every hunk was applied or harmlessly skipped.
    ///
    /// Returns `false` if any hunk failed.
    pub fn all_applied_cleanly(&self) -> bool {
        self.hunk_results
            .iter()
            .all(|r| !matches!(r, HunkApplyStatus::Failed(_)))
    }

    /// Returns every hunk that failed to apply, with its 1-based index.
    ///
    /// # Example
    ///
    /// ```
    /// # use ctxpatch::{apply_patch, ApplyOptions, DiagnosticKind};
    /// let outcome = apply_patch("a\nb\n", "@@ ... @@\n-zzz\n+yyy\n", &ApplyOptions::default());
    /// let failures = outcome.report.failures();
    /// assert_eq!(failures.len(), 1);
    /// assert_eq!(failures[0].hunk_index, 1);
    /// assert!(matches!(failures[0].reason, DiagnosticKind::UnresolvedHunk { .. }));
    /// ```
    pub fn failures(&self) -> Vec<HunkFailure> {
        self.hunk_results
            .iter()
            .enumerate()
            .filter_map(|(i, status)| {
                if let HunkApplyStatus::Failed(reason) = status {
                    Some(HunkFailure {
                        hunk_index: i + 1,
                        reason: reason.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Details about a hunk that failed to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct HunkFailure {
    /// The 1-based index of the hunk that failed.
    pub hunk_index: usize,
    /// The reason for the failure.
    pub reason: DiagnosticKind,
}

/// The result of applying one patch payload to a source text.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// The text after all locatable hunks were applied.
    pub patched_text: String,
    /// One record per hunk that could not be applied (plus a payload-level
    /// record when the payload contained no hunks at all).
    pub diagnostics: Vec<Diagnostic>,
    /// Detailed per-hunk statuses.
    pub report: ApplyReport,
}

/// The result of applying a sequence of patch payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// The text after every payload was applied in order.
    pub patched_text: String,
    /// One outcome per payload, in application order.
    pub outcomes: Vec<PatchOutcome>,
}

impl BatchOutcome {
    /// Checks if every payload applied without diagnostics.
    pub fn all_applied_cleanly(&self) -> bool {
        self.outcomes.iter().all(|o| o.diagnostics.is_empty())
    }

    /// Total number of diagnostics across all payloads.
    pub fn diagnostic_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.diagnostics.len()).sum()
    }
}

/// The result of a filesystem-level patch operation.
#[derive(Debug)]
pub struct FilePatchResult {
    /// The in-memory outcome, including diagnostics.
    pub outcome: PatchOutcome,
    /// A unified diff of the proposed changes. Only populated when
    /// `dry_run` was set in [`ApplyOptions`].
    pub diff: Option<String>,
}

// --- Core Logic ---

/// Checks whether a raw line opens a new hunk.
///
/// The dialect's marker is a line of the form `@@ ... @@`; internal content
/// is ignored, so conventional `@@ -1,3 +1,3 @@` headers (a common model
/// slip) open a hunk too. Their line numbers are never used.
fn is_hunk_marker(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= 4 && trimmed.starts_with("@@") && trimmed.ends_with("@@")
}

/// Classifies one raw body line by its first character.
fn classify_line(line: &str) -> HunkLine {
    if let Some(rest) = line.strip_prefix('+') {
        HunkLine {
            kind: LineKind::Insert,
            content: rest.to_string(),
        }
    } else if let Some(rest) = line.strip_prefix('-') {
        HunkLine {
            kind: LineKind::Remove,
            content: rest.to_string(),
        }
    } else if let Some(rest) = line.strip_prefix(' ') {
        // The alignment space occupies the same column as '+' and '-', so
        // stripping it keeps the payload columns of all three kinds lined up.
        HunkLine {
            kind: LineKind::Context,
            content: rest.to_string(),
        }
    } else {
        // Models routinely omit the alignment space on unchanged lines;
        // tolerate it and take the whole line as context.
        HunkLine {
            kind: LineKind::Context,
            content: line.to_string(),
        }
    }
}

/// Builds a [`Hunk`] from the raw lines between two markers.
///
/// Leading and trailing blank lines are payload separators, not context.
/// Blank lines *inside* the body are kept as empty context lines, which
/// blank-line-sensitive targets (HTML, CSS, Liquid) depend on.
fn build_hunk(raw_body: &[&str]) -> Hunk {
    let start = raw_body
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(raw_body.len());
    let end = raw_body
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    Hunk {
        lines: raw_body[start..end]
            .iter()
            .map(|l| classify_line(l))
            .collect(),
    }
}

fn push_hunk(hunks: &mut Vec<Hunk>, raw_body: &[&str]) {
    let hunk = build_hunk(raw_body);
    if hunk.lines.is_empty() {
        debug!("Discarding hunk with an empty body.");
        return;
    }
    hunks.push(hunk);
}

/// Parses one raw patch payload into a [`Patch`].
///
/// Text preceding the first `@@ ... @@` marker is discarded. Body lines are
/// classified by their first character: `+` insertion, `-` removal,
/// anything else context (with one leading alignment space stripped when
/// present — a missing space, a common model slip, is tolerated). Input
/// order is preserved exactly.
///
/// Parsing never fails: a payload without markers yields an empty patch,
/// which the orchestrator turns into a [`DiagnosticKind::NoHunksFound`]
/// diagnostic rather than an error.
///
/// # Example
///
/// ```rust
/// use ctxpatch::{parse_patch, LineKind};
///
/// let patch = parse_patch("intro text, ignored\n@@ ... @@\n keep\n-old\n+new\n");
/// assert_eq!(patch.hunks.len(), 1);
///
/// let kinds: Vec<LineKind> = patch.hunks[0].lines.iter().map(|l| l.kind).collect();
/// assert_eq!(kinds, vec![LineKind::Context, LineKind::Remove, LineKind::Insert]);
/// ```
pub fn parse_patch(raw_patch_text: &str) -> Patch {
    let mut hunks = Vec::new();
    let mut current_body: Option<Vec<&str>> = None;

    for line in raw_patch_text.split('\n') {
        if is_hunk_marker(line) {
            if let Some(body) = current_body.take() {
                push_hunk(&mut hunks, &body);
            }
            current_body = Some(Vec::new());
        } else if let Some(body) = current_body.as_mut() {
            body.push(line);
        }
        // Lines before the first marker fall through and are discarded.
    }
    if let Some(body) = current_body {
        push_hunk(&mut hunks, &body);
    }

    debug!("Parsed {} hunk(s) from patch payload.", hunks.len());
    Patch { hunks }
}

/// A strategy for locating a hunk's anchor in the working buffer.
///
/// This keeps the search algorithm pluggable; [`WindowScanner`] is the
/// built-in scored sliding-window implementation.
pub trait AnchorFinder {
    /// Finds the best location for `anchor` within `target_lines`.
    fn find_anchor<T: AsRef<str>>(&self, target_lines: &[T], anchor: &[&str]) -> MatchResult;
}

/// The default anchor search: a scored sliding window.
///
/// Every window of `anchor.len()` lines is scored as
/// `matching lines + run_bonus × trailing matching run`, comparing lines
/// with leading/trailing whitespace stripped so indentation drift never
/// blocks a match. A window where every line matches is accepted
/// immediately; otherwise the best-scoring window wins if it reaches
/// `threshold × anchor length`, earliest offset breaking ties.
#[derive(Debug)]
pub struct WindowScanner<'a> {
    options: &'a ApplyOptions,
}

impl<'a> WindowScanner<'a> {
    /// Creates a new scanner with the given options.
    pub fn new(options: &'a ApplyOptions) -> Self {
        Self { options }
    }
}

impl<'a> AnchorFinder for WindowScanner<'a> {
    fn find_anchor<T: AsRef<str>>(&self, target_lines: &[T], anchor: &[&str]) -> MatchResult {
        if anchor.is_empty() || anchor.len() > target_lines.len() {
            return MatchResult::Unmatched { best_score: 0.0 };
        }

        let needed = self.options.threshold * anchor.len() as f32;
        let mut best_offset = 0usize;
        let mut best_score = -1.0f32;

        for offset in 0..=target_lines.len() - anchor.len() {
            let mut total = 0usize;
            let mut run = 0usize;
            for (j, expected) in anchor.iter().enumerate() {
                if target_lines[offset + j].as_ref().trim() == expected.trim() {
                    total += 1;
                    run += 1;
                } else {
                    run = 0;
                }
            }
            // `run` is now the unbroken matching run at the window's tail.
            let score = total as f32 + self.options.run_bonus * run as f32;

            if total == anchor.len() {
                // Perfect window: accept without scanning further, so a
                // numerically higher-scoring tie later cannot steal it.
                trace!(
                    "Perfect anchor match at offset {} (score {:.2}).",
                    offset,
                    score
                );
                return MatchResult::Matched { offset, score };
            }
            if score > best_score {
                trace!("New best score {:.2} at offset {}.", score, offset);
                best_offset = offset;
                best_score = score;
            }
        }

        if best_score >= needed {
            debug!(
                "Fuzzy anchor match at offset {} (score {:.2}, needed {:.2}).",
                best_offset, best_score, needed
            );
            MatchResult::Matched {
                offset: best_offset,
                score: best_score,
            }
        } else {
            debug!(
                "No anchor match: best score {:.2} below {:.2}.",
                best_score, needed
            );
            MatchResult::Unmatched {
                best_score: best_score.max(0.0),
            }
        }
    }
}

/// Finds the best location for an anchor within a slice of lines.
///
/// This is the free-function form of [`WindowScanner`]. Comparison is done
/// on whitespace-trimmed lines, so indentation differences never block a
/// match while content differences do.
///
/// # Example
///
/// ```rust
/// use ctxpatch::{find_anchor_in_lines, ApplyOptions, MatchResult};
///
/// let lines = vec!["fn main() {", "    let x = 1;", "}"];
/// // Indentation drift on the middle line is tolerated.
/// let anchor = vec!["fn main() {", "let x = 1;", "}"];
///
/// let result = find_anchor_in_lines(&lines, &anchor, &ApplyOptions::default());
/// assert_eq!(result, MatchResult::Matched { offset: 0, score: 4.5 });
/// ```
pub fn find_anchor_in_lines<T: AsRef<str>>(
    target_lines: &[T],
    anchor: &[&str],
    options: &ApplyOptions,
) -> MatchResult {
    WindowScanner::new(options).find_anchor(target_lines, anchor)
}

/// Applies a single hunk to a mutable vector of lines in place.
///
/// The hunk's anchor is located in `target_lines`; on a match, the anchor
/// span is replaced with the hunk's replacement block in one splice, which
/// realizes removals by omission and insertions by inclusion while leaving
/// context lines in place. The buffer length changes by the difference
/// between the two blocks; callers applying several hunks simply repeat
/// the search against the updated buffer.
///
/// # Example
///
/// ```rust
/// use ctxpatch::{apply_hunk_to_lines, parse_patch, ApplyOptions, HunkApplyStatus};
///
/// let patch = parse_patch("@@ ... @@\n one\n-two\n+TWO\n three\n");
/// let mut lines: Vec<String> =
///     ["one", "two", "three"].iter().map(|s| s.to_string()).collect();
///
/// let status = apply_hunk_to_lines(&patch.hunks[0], &mut lines, &ApplyOptions::default());
///
/// assert!(matches!(status, HunkApplyStatus::Applied { offset: 0, .. }));
/// assert_eq!(lines, vec!["one", "TWO", "three"]);
/// ```
pub fn apply_hunk_to_lines(
    hunk: &Hunk,
    target_lines: &mut Vec<String>,
    options: &ApplyOptions,
) -> HunkApplyStatus {
    if !hunk.has_anchor() {
        return HunkApplyStatus::Failed(DiagnosticKind::MalformedHunk);
    }
    if !hunk.has_changes() {
        debug!("Skipping hunk (no changes).");
        return HunkApplyStatus::SkippedNoChanges;
    }

    let anchor = hunk.anchor_lines();
    match find_anchor_in_lines(target_lines, &anchor, options) {
        MatchResult::Matched { offset, score } => {
            let replaced_lines: Vec<String> = target_lines
                .splice(
                    offset..offset + anchor.len(),
                    hunk.replacement_lines().into_iter().map(String::from),
                )
                .collect();
            HunkApplyStatus::Applied {
                offset,
                score,
                replaced_lines,
            }
        }
        MatchResult::Unmatched { best_score } => {
            HunkApplyStatus::Failed(DiagnosticKind::UnresolvedHunk {
                best_score,
                threshold: options.threshold,
            })
        }
    }
}

/// An iterator that applies a patch's hunks one at a time.
///
/// The applier owns the working buffer for the duration of one patch
/// application. Each `next()` call locates the next hunk against the buffer
/// as edited so far and splices it in, yielding a [`HunkApplyStatus`]. When
/// the iterator is exhausted, [`into_content`](Self::into_content) joins
/// the buffer back into the final text.
///
/// # Example
///
/// ```rust
/// use ctxpatch::{parse_patch, ApplyOptions, HunkApplier, HunkApplyStatus};
///
/// let patch = parse_patch("@@ ... @@\n-old\n+new\n");
/// let options = ApplyOptions::default();
/// let mut applier = HunkApplier::new(&patch, "old\n", &options);
///
/// let status = applier.next().unwrap();
/// assert!(matches!(status, HunkApplyStatus::Applied { .. }));
/// assert!(applier.next().is_none());
///
/// assert_eq!(applier.into_content(), "new\n");
/// ```
#[derive(Debug)]
pub struct HunkApplier<'a> {
    hunks: std::slice::Iter<'a, Hunk>,
    current_lines: Vec<String>,
    options: &'a ApplyOptions,
}

impl<'a> HunkApplier<'a> {
    /// Creates a new applier over `source_text`.
    ///
    /// The source is split on `'\n'`, so a trailing newline survives as a
    /// trailing empty line and the final join is byte-faithful outside the
    /// edited regions.
    pub fn new(patch: &'a Patch, source_text: &str, options: &'a ApplyOptions) -> Self {
        Self {
            hunks: patch.hunks.iter(),
            current_lines: source_text.split('\n').map(String::from).collect(),
            options,
        }
    }

    /// A view of the buffer, reflecting all hunks applied so far.
    pub fn current_lines(&self) -> &[String] {
        &self.current_lines
    }

    /// Consumes the applier and returns the final buffer.
    pub fn into_lines(self) -> Vec<String> {
        self.current_lines
    }

    /// Consumes the applier and joins the buffer into the final text.
    pub fn into_content(self) -> String {
        self.current_lines.join("\n")
    }
}

impl<'a> Iterator for HunkApplier<'a> {
    type Item = HunkApplyStatus;

    fn next(&mut self) -> Option<Self::Item> {
        let hunk = self.hunks.next()?;
        Some(apply_hunk_to_lines(
            hunk,
            &mut self.current_lines,
            self.options,
        ))
    }
}

/// Applies an already-parsed [`Patch`] to a source text.
///
/// This is [`apply_patch`] minus the parsing step, for callers that reuse
/// a parsed patch or need to inspect the hunks first.
pub fn apply_parsed_patch(
    patch: &Patch,
    source_text: &str,
    options: &ApplyOptions,
) -> PatchOutcome {
    if patch.hunks.is_empty() {
        debug!("Patch contains no hunks; returning source unchanged.");
        return PatchOutcome {
            patched_text: source_text.to_string(),
            diagnostics: vec![Diagnostic {
                hunk_index: 0,
                kind: DiagnosticKind::NoHunksFound,
                anchor_preview: String::new(),
            }],
            report: ApplyReport::default(),
        };
    }

    let total_hunks = patch.hunks.len();
    let mut applier = HunkApplier::new(patch, source_text, options);

    let hunk_results: Vec<HunkApplyStatus> = applier
        .by_ref()
        .enumerate()
        .map(|(i, status)| {
            info!("Applying hunk {}/{}...", i + 1, total_hunks);
            if let HunkApplyStatus::Failed(reason) = &status {
                warn!("Failed to apply hunk {}: {}", i + 1, reason);
            }
            status
        })
        .collect();

    let patched_text = applier.into_content();

    let diagnostics = hunk_results
        .iter()
        .enumerate()
        .filter_map(|(i, status)| {
            if let HunkApplyStatus::Failed(kind) = status {
                Some(Diagnostic {
                    hunk_index: i + 1,
                    kind: kind.clone(),
                    anchor_preview: patch.hunks[i].anchor_preview(),
                })
            } else {
                None
            }
        })
        .collect();

    PatchOutcome {
        patched_text,
        diagnostics,
        report: ApplyReport { hunk_results },
    }
}

/// Applies one raw patch payload to a source text.
///
/// This is the engine's main entry point: parse once, then fold every hunk
/// over the working buffer in order, re-locating each hunk against the
/// already-edited text. A hunk that cannot be located is recorded as a
/// [`Diagnostic`] and skipped; the remaining hunks are still attempted. The
/// call never fails — partial application is reported, not raised.
///
/// # Example
///
/// ```rust
/// use ctxpatch::{apply_patch, ApplyOptions, DiagnosticKind};
///
/// // Indentation drift: the anchor carries no leading spaces, the source
/// // does. The hunk still locates and applies.
/// let source = "<div>\n    <h1>Hello</h1>\n</div>\n";
/// let patch = "@@ ... @@\n<div>\n-<h1>Hello</h1>\n+    <h1>Hello, world</h1>\n</div>\n";
///
/// let outcome = apply_patch(source, patch, &ApplyOptions::default());
/// assert_eq!(outcome.patched_text, "<div>\n    <h1>Hello, world</h1>\n</div>\n");
///
/// // A payload without markers is a diagnostic, not an error.
/// let outcome = apply_patch(source, "no markers here", &ApplyOptions::default());
/// assert_eq!(outcome.patched_text, source);
/// assert!(matches!(outcome.diagnostics[0].kind, DiagnosticKind::NoHunksFound));
/// ```
pub fn apply_patch(
    source_text: &str,
    raw_patch_text: &str,
    options: &ApplyOptions,
) -> PatchOutcome {
    let patch = parse_patch(raw_patch_text);
    apply_parsed_patch(&patch, source_text, options)
}

/// Applies several independently-extracted payloads in sequence.
///
/// Each payload is applied to the previous payload's output, so edits
/// compose across the fenced blocks of one model response. Diagnostics are
/// kept per payload in [`BatchOutcome::outcomes`].
///
/// # Example
///
/// ```rust
/// use ctxpatch::{apply_patch_sequence, ApplyOptions};
///
/// let source = "one\ntwo\nthree\n";
/// let payloads = [
///     "@@ ... @@\n one\n-two\n+2\n",
///     "@@ ... @@\n-three\n+3\n",
/// ];
///
/// let batch = apply_patch_sequence(source, &payloads, &ApplyOptions::default());
/// assert_eq!(batch.patched_text, "one\n2\n3\n");
/// assert!(batch.all_applied_cleanly());
/// ```
pub fn apply_patch_sequence<T: AsRef<str>>(
    source_text: &str,
    payloads: &[T],
    options: &ApplyOptions,
) -> BatchOutcome {
    let mut current = source_text.to_string();
    let mut outcomes = Vec::with_capacity(payloads.len());

    for (i, payload) in payloads.iter().enumerate() {
        info!("Applying patch payload {}/{}...", i + 1, payloads.len());
        let outcome = apply_patch(&current, payload.as_ref(), options);
        current.clone_from(&outcome.patched_text);
        outcomes.push(outcome);
    }

    BatchOutcome {
        patched_text: current,
        outcomes,
    }
}

/// Checks whether a line opens a fenced code block tagged as a patch.
fn is_patch_fence(line: &str) -> bool {
    if !line.starts_with("```") {
        return false;
    }
    // The info string is a comma-separated list of tags, each possibly
    // several words (e.g. ```liquid, patch).
    let info_string = &line[3..];
    info_string.split(',').any(|part| {
        part.split_whitespace()
            .any(|word| word == "diff" || word == "patch")
    })
}

/// Extracts raw patch payloads from a model's free-text response.
///
/// Scans for fenced code blocks whose info string tags them `diff` or
/// `patch` (e.g. ` ```diff `, ` ```liquid, patch `) and returns the fence
/// contents in order, ready for [`apply_patch_sequence`]. Fences with other
/// tags are left alone — those are full-code responses, not patches. An
/// unclosed fence runs to the end of the input.
///
/// # Example
///
/// ```rust
/// let response = "Here is the fix:\n```diff\n@@ ... @@\n-a\n+b\n```\nDone.";
/// let blocks = ctxpatch::extract_patch_blocks(response);
/// assert_eq!(blocks, vec!["@@ ... @@\n-a\n+b"]);
/// ```
pub fn extract_patch_blocks(response: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut lines = response.lines();

    while lines.by_ref().any(is_patch_fence) {
        let mut block_lines: Vec<&str> = Vec::new();
        for line in lines.by_ref() {
            if line == "```" {
                break;
            }
            block_lines.push(line);
        }
        blocks.push(block_lines.join("\n"));
    }

    debug!("Extracted {} patch block(s) from response.", blocks.len());
    blocks
}

/// Renders a unified diff of a proposed change, for previews and dry runs.
///
/// # Example
///
/// ```rust
/// let diff = ctxpatch::preview_diff("a\nb\n", "a\nc\n");
/// assert!(diff.contains("-b"));
/// assert!(diff.contains("+c"));
/// ```
pub fn preview_diff(old: &str, new: &str) -> String {
    unified_diff(similar::Algorithm::default(), old, new, 3, Some(("a", "b"))).to_string()
}

// --- File Convenience ---

/// Applies a raw patch payload to a file on disk.
///
/// Reads the target, applies the payload in memory, and writes the result
/// back — or, in dry-run mode, leaves the file alone and returns a unified
/// diff of the proposed changes instead. Unlocatable hunks surface as
/// diagnostics in the returned outcome; `Err` is reserved for I/O-level
/// failures.
///
/// # Example
///
/// ```rust
/// # use ctxpatch::{apply_patch_to_file, ApplyOptions};
/// # use std::fs;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let file = dir.path().join("snippet.liquid");
/// fs::write(&file, "<h1>Hello</h1>\n")?;
///
/// let patch = "@@ ... @@\n-<h1>Hello</h1>\n+<h1>Hello, world</h1>\n";
/// let result = apply_patch_to_file(&file, patch, ApplyOptions::default())?;
///
/// assert!(result.outcome.report.all_applied_cleanly());
/// assert_eq!(fs::read_to_string(&file)?, "<h1>Hello, world</h1>\n");
/// # Ok(())
/// # }
/// ```
pub fn apply_patch_to_file(
    target: &Path,
    raw_patch_text: &str,
    options: ApplyOptions,
) -> Result<FilePatchResult, PatchError> {
    info!("Applying patch to: {}", target.display());

    if target.is_dir() {
        return Err(PatchError::TargetIsDirectory {
            path: target.to_path_buf(),
        });
    }

    let original =
        fs::read_to_string(target).map_err(|e| map_io_error(target.to_path_buf(), e))?;
    let outcome = apply_patch(&original, raw_patch_text, &options);

    let mut diff = None;
    if options.dry_run {
        info!("DRY RUN: would write changes to '{}'", target.display());
        diff = Some(preview_diff(&original, &outcome.patched_text));
    } else {
        fs::write(target, &outcome.patched_text)
            .map_err(|e| map_io_error(target.to_path_buf(), e))?;
        if outcome.report.all_applied_cleanly() {
            info!("Successfully wrote changes to '{}'", target.display());
        } else {
            warn!("Wrote partial changes to '{}'", target.display());
        }
    }

    Ok(FilePatchResult { outcome, diff })
}
