//! Parsing recoverer
//!
//! Repairs common markdown formatting mistakes with an ordered list of
//! pattern-based fix rules, re-runs the caller's parser on the fixed text, and
//! falls back to a permissive structural extraction when parsing still fails.
//!
//! Applying the rule list is idempotent: fixing already-fixed text changes nothing.

use crate::clock::BoxFuture;
use crate::config::ParsingConfig;
use crate::dispatcher::{ErrorDispatcher, HandleOptions, WeakDispatcher};
use crate::error::RecoveryError;
use crate::recovery::{ErrorHandler, Recoverer, RetryTracker, SafeResult};
use crate::taxonomy::{ErrorCategory, ErrorKind, ErrorLocation, TaxonomyError};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::fmt::Display;
use std::sync::{Arc, Mutex};

/// A single line-level fix
struct FixRule {
    name: &'static str,
    pattern: Regex,
    rewrite: fn(&Captures) -> String,
}

static LINE_RULES: Lazy<Vec<FixRule>> = Lazy::new(|| {
    vec![
        FixRule {
            name: "heading-whitespace",
            pattern: Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?)|([^#\s].*?))?[ \t]*$")
                .expect("valid heading pattern"),
            rewrite: |caps| {
                let text = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                if text.is_empty() {
                    caps[1].to_string()
                } else {
                    format!("{} {}", &caps[1], text)
                }
            },
        },
        FixRule {
            name: "task-checkbox",
            pattern: Regex::new(
                r"^([ \t]*)([-*+])[ \t]*\[([^\]]?)\](?:[ \t]+(.*?)|([^(\s].*?))?[ \t]*$",
            )
            .expect("valid checkbox pattern"),
            rewrite: |caps| {
                let marker = TaskState::from_marker(&caps[3]).marker();
                let text = caps
                    .get(4)
                    .or_else(|| caps.get(5))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                if text.is_empty() {
                    format!("{}{} [{}]", &caps[1], &caps[2], marker)
                } else {
                    format!("{}{} [{}] {}", &caps[1], &caps[2], marker, text)
                }
            },
        },
        FixRule {
            name: "link-format",
            pattern: Regex::new(r"\[([^\[\]]{2,})\][ \t]*\([ \t]*([^()\s]+)[ \t]*\)")
                .expect("valid link pattern"),
            rewrite: |caps| format!("[{}]({})", &caps[1], &caps[2]),
        },
    ]
});

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([ \t]*)(```|~~~)[ \t]*([^`]*?)[ \t]*$").expect("valid fence pattern")
});

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ {0,3}(#{1,6})[ \t]+(.+)$").expect("valid heading pattern"));

static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+(.*)$").expect("valid list item pattern")
});

static VALID_TASK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([ \t]*)[-*+] \[([ x-])\] (\S.*)$").expect("valid task pattern")
});

static TASK_ATTEMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*[-*+][ \t]*\[").expect("valid task attempt pattern"));

/// State of a task-list item
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Done,
    InProgress,
}

impl TaskState {
    /// Map a checkbox marker to a state; unrecognized markers are pending
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "x" => TaskState::Done,
            "-" => TaskState::InProgress,
            _ => TaskState::Pending,
        }
    }

    pub fn marker(&self) -> char {
        match self {
            TaskState::Pending => ' ',
            TaskState::Done => 'x',
            TaskState::InProgress => '-',
        }
    }
}

/// Result of running the fix rules over a document
#[derive(Debug, Clone, PartialEq)]
pub struct FixReport {
    pub content: String,
    /// Names of the rules that changed at least one line
    pub applied_rules: Vec<&'static str>,
}

impl FixReport {
    pub fn changed(&self) -> bool {
        !self.applied_rules.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Heading {
    pub level: usize,
    pub text: String,
    /// 1-based line number
    pub line: usize,
}

/// Permissive structural view of a markdown document
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MarkdownOutline {
    pub headings: Vec<Heading>,
    pub paragraphs: Vec<String>,
    pub lists: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskLine {
    pub line: usize,
    pub indent: usize,
    pub state: TaskState,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvalidLine {
    pub line: usize,
    pub text: String,
}

/// Task document split into well-formed task lines and malformed attempts
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TaskExtraction {
    pub valid: Vec<TaskLine>,
    pub invalid: Vec<InvalidLine>,
}

/// Data returned by [`ParsingRecoverer::safe_parse`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParsedContent<T> {
    /// The caller's parser succeeded, possibly after auto-fix
    Parsed(T),
    Outline(MarkdownOutline),
    Tasks(TaskExtraction),
}

impl<T> ParsedContent<T> {
    pub fn parsed(self) -> Option<T> {
        match self {
            ParsedContent::Parsed(value) => Some(value),
            _ => None,
        }
    }
}

/// Apply the line rules to a single line
pub fn fix_line(line: &str) -> String {
    let mut current = line.to_string();
    for rule in LINE_RULES.iter() {
        current = apply_rule(rule, &current);
    }
    current
}

fn apply_rule(rule: &FixRule, line: &str) -> String {
    rule.pattern
        .replace_all(line, |caps: &Captures| (rule.rewrite)(caps))
        .into_owned()
}

/// Apply every fix rule to a document
///
/// Lines inside fenced code blocks are left alone; an unterminated fence is
/// closed at the end of the document.
pub fn fix_content(content: &str) -> FixReport {
    let mut applied: Vec<&'static str> = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut open_fence: Option<String> = None;
    let crlf = content.contains("\r\n");

    for raw in content.split('\n') {
        // Rules see the line without its CR; it is put back afterwards
        let (line, cr) = match raw.strip_suffix('\r') {
            Some(stripped) => (stripped, "\r"),
            None => (raw, ""),
        };
        if let Some(caps) = FENCE.captures(line) {
            let fence = caps[2].to_string();
            let normalized = match &open_fence {
                None => {
                    open_fence = Some(fence.clone());
                    Some(format!("{}{}{}", &caps[1], fence, &caps[3]))
                }
                Some(open) if *open == fence && caps[3].is_empty() => {
                    open_fence = None;
                    Some(format!("{}{}", &caps[1], fence))
                }
                Some(_) => None,
            };
            if let Some(normalized) = normalized {
                if normalized != line && !applied.contains(&"code-fence") {
                    applied.push("code-fence");
                }
                lines.push(format!("{}{}", normalized, cr));
                continue;
            }
        }

        if open_fence.is_some() {
            lines.push(raw.to_string());
            continue;
        }

        let mut current = line.to_string();
        for rule in LINE_RULES.iter() {
            let next = apply_rule(rule, &current);
            if next != current && !applied.contains(&rule.name) {
                applied.push(rule.name);
            }
            current = next;
        }
        current.push_str(cr);
        lines.push(current);
    }

    if let Some(fence) = open_fence {
        let insert_at = if lines.last().is_some_and(|l| l.is_empty()) {
            lines.len() - 1
        } else {
            lines.len()
        };
        lines.insert(insert_at, if crlf { format!("{}\r", fence) } else { fence });
        applied.push("close-code-fence");
    }

    FixReport {
        content: lines.join("\n"),
        applied_rules: applied,
    }
}

/// Permissive extraction of headings, paragraphs and lists
pub fn extract_outline(content: &str) -> MarkdownOutline {
    let mut outline = MarkdownOutline::default();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut list: Vec<String> = Vec::new();
    let mut in_fence = false;

    fn flush(paragraph: &mut Vec<&str>, list: &mut Vec<String>, outline: &mut MarkdownOutline) {
        if !paragraph.is_empty() {
            outline.paragraphs.push(paragraph.join(" "));
            paragraph.clear();
        }
        if !list.is_empty() {
            outline.lists.push(std::mem::take(list));
        }
    }

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_end();
        if FENCE.is_match(line) {
            in_fence = !in_fence;
            flush(&mut paragraph, &mut list, &mut outline);
            continue;
        }
        if in_fence {
            continue;
        }

        if line.trim().is_empty() {
            flush(&mut paragraph, &mut list, &mut outline);
        } else if let Some(caps) = HEADING.captures(line) {
            flush(&mut paragraph, &mut list, &mut outline);
            outline.headings.push(Heading {
                level: caps[1].len(),
                text: caps[2].trim().to_string(),
                line: index + 1,
            });
        } else if let Some(caps) = LIST_ITEM.captures(line) {
            if !paragraph.is_empty() {
                outline.paragraphs.push(paragraph.join(" "));
                paragraph.clear();
            }
            list.push(caps[1].trim().to_string());
        } else {
            if !list.is_empty() {
                outline.lists.push(std::mem::take(&mut list));
            }
            paragraph.push(line.trim());
        }
    }
    flush(&mut paragraph, &mut list, &mut outline);
    outline
}

/// Split a task document into valid task lines and malformed task attempts
pub fn extract_tasks(content: &str) -> TaskExtraction {
    let mut extraction = TaskExtraction::default();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_end();
        if let Some(caps) = VALID_TASK.captures(line) {
            extraction.valid.push(TaskLine {
                line: index + 1,
                indent: caps[1].len(),
                state: TaskState::from_marker(&caps[2]),
                text: caps[3].to_string(),
            });
        } else if TASK_ATTEMPT.is_match(line) {
            extraction.invalid.push(InvalidLine {
                line: index + 1,
                text: line.to_string(),
            });
        }
    }
    extraction
}

/// A reported line together with its fixed text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineRepair {
    pub resource: Option<String>,
    pub line: Option<u32>,
    pub original: String,
    pub fixed: String,
}

/// Receives repaired lines so the host can apply them and parse again
pub type RepairHook = Arc<dyn Fn(LineRepair) + Send + Sync>;

/// Recoverer for parsing errors
pub struct ParsingRecoverer {
    config: ParsingConfig,
    retries: RetryTracker,
    dispatcher: WeakDispatcher,
    repair_hook: Mutex<Option<RepairHook>>,
}

impl ParsingRecoverer {
    pub fn new(config: ParsingConfig) -> Self {
        let retries = RetryTracker::new(config.max_retries);
        Self {
            config,
            retries,
            dispatcher: WeakDispatcher::default(),
            repair_hook: Mutex::new(None),
        }
    }

    /// Report parse failures from `safe_parse` to `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: &ErrorDispatcher) -> Self {
        self.dispatcher = dispatcher.downgrade();
        self
    }

    /// Register as both handler and recoverer for parsing errors
    pub fn register(self: &Arc<Self>, dispatcher: &ErrorDispatcher) {
        dispatcher.register_handler(ErrorCategory::Parsing, self.clone());
        dispatcher.register_recoverer(ErrorCategory::Parsing, self.clone());
    }

    pub fn config(&self) -> &ParsingConfig {
        &self.config
    }

    /// Hand repaired lines from dispatched errors to `hook`
    ///
    /// Without a hook, dispatched parsing errors are diagnosed but never
    /// reported as recovered.
    pub fn set_repair_hook(&self, hook: RepairHook) {
        *self.repair_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn clear_repair_hook(&self) {
        self.repair_hook.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Drop the repair hook and all retry bookkeeping
    pub fn clear(&self) {
        self.clear_repair_hook();
        self.retries.clear();
    }

    fn repair_hook(&self) -> Option<RepairHook> {
        self.repair_hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Advice for a failed parsing operation
    pub fn suggestion(operation: Option<&str>) -> &'static str {
        match operation {
            Some("auto-fix") => "Fix the formatting manually; automatic repair did not help",
            Some("parse-tasks") => "Use '- [ ] task', '- [x] task' or '- [-] task' for task lines",
            Some("parse") => "Check the markdown syntax near the reported line",
            _ => "Check the document formatting",
        }
    }

    /// Parse a markdown document, auto-fixing and falling back to an outline
    pub fn safe_parse<T, E, F>(
        &self,
        content: &str,
        resource: &str,
        component: &str,
        parse: F,
    ) -> SafeResult<ParsedContent<T>>
    where
        F: Fn(&str) -> Result<T, E>,
        E: Display,
    {
        self.parse_with_recovery(content, resource, component, "parse", parse, |text| {
            ParsedContent::Outline(extract_outline(text))
        })
    }

    /// Parse a task document, auto-fixing and falling back to a task-line split
    pub fn safe_parse_tasks<T, E, F>(
        &self,
        content: &str,
        resource: &str,
        component: &str,
        parse: F,
    ) -> SafeResult<ParsedContent<T>>
    where
        F: Fn(&str) -> Result<T, E>,
        E: Display,
    {
        self.parse_with_recovery(content, resource, component, "parse-tasks", parse, |text| {
            ParsedContent::Tasks(extract_tasks(text))
        })
    }

    fn parse_with_recovery<T, E, F>(
        &self,
        content: &str,
        resource: &str,
        component: &str,
        operation: &str,
        parse: F,
        fallback: fn(&str) -> ParsedContent<T>,
    ) -> SafeResult<ParsedContent<T>>
    where
        F: Fn(&str) -> Result<T, E>,
        E: Display,
    {
        let first_error = match parse(content) {
            Ok(value) => return SafeResult::ok(ParsedContent::Parsed(value)),
            Err(e) => e.to_string(),
        };
        let error = TaxonomyError::parsing(first_error, None)
            .with_component(component)
            .with_operation(operation)
            .with_location(ErrorLocation::new(resource));

        let mut text = content.to_string();
        let mut retry_count = 0;
        if self.config.auto_fix {
            let report = fix_content(content);
            let key = RetryTracker::key(operation, resource);
            if report.changed() && self.retries.attempt(&key).is_some() {
                retry_count = 1;
                debug!(
                    "Auto-fixed {} with rules {:?}",
                    resource, report.applied_rules
                );
                match parse(&report.content) {
                    Ok(value) => {
                        self.retries.reset(&key);
                        info!("Parsed {} after auto-fix", resource);
                        return SafeResult::ok(ParsedContent::Parsed(value)).with_retries(1);
                    }
                    Err(e) => debug!("Parse still failing after auto-fix: {}", e),
                }
                text = report.content;
            }
        }

        let error = error.with_recoverable(false);
        if self.config.fallback_parsing {
            self.dispatcher.report(error.clone(), HandleOptions::silent());
            return SafeResult::fallback(fallback(&text), error).with_retries(retry_count);
        }

        self.dispatcher.report(error.clone(), HandleOptions::default());
        SafeResult::failed(error).with_retries(retry_count)
    }

    fn line_text(error: &TaxonomyError) -> Option<&str> {
        match &error.kind {
            ErrorKind::Parsing { line_text } => line_text.as_deref(),
            _ => None,
        }
    }

    fn retry_key(error: &TaxonomyError) -> String {
        RetryTracker::key(
            error.operation().unwrap_or("parse"),
            &error.resource().unwrap_or_default(),
        )
    }
}

impl ErrorHandler for ParsingRecoverer {
    fn name(&self) -> &str {
        "parsing"
    }

    fn can_handle(&self, error: &TaxonomyError) -> bool {
        error.category() == ErrorCategory::Parsing
    }

    fn handle_error<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<(), RecoveryError>> {
        Box::pin(async move {
            let location = error
                .context
                .location
                .as_ref()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            warn!(
                "Parsing failed at {}: {}. {}",
                location,
                error.message,
                Self::suggestion(error.operation())
            );
            if let Some(line) = Self::line_text(error) {
                let fixed = fix_line(line);
                if fixed != line {
                    info!("Suggested replacement for '{}': '{}'", line, fixed);
                }
            }
            Ok(())
        })
    }
}

impl Recoverer for ParsingRecoverer {
    fn name(&self) -> &str {
        "parsing"
    }

    fn can_recover(&self, error: &TaxonomyError) -> bool {
        self.config.auto_fix
            && error.category() == ErrorCategory::Parsing
            && Self::line_text(error).is_some()
            && self.repair_hook().is_some()
            && self.retries.can_retry(&Self::retry_key(error))
    }

    fn recover<'a>(
        &'a self,
        error: &'a TaxonomyError,
    ) -> BoxFuture<'a, Result<bool, RecoveryError>> {
        Box::pin(async move {
            let (line, hook) = match (Self::line_text(error), self.repair_hook()) {
                (Some(line), Some(hook)) => (line, hook),
                _ => return Ok(false),
            };
            let key = Self::retry_key(error);
            if self.retries.attempt(&key).is_none() {
                return Ok(false);
            }
            let fixed = fix_line(line);
            if fixed == line {
                return Ok(false);
            }

            self.retries.reset(&key);
            info!("Auto-fixed line '{}' to '{}'", line, fixed);
            let location = error.context.location.as_ref();
            hook(LineRepair {
                resource: location.map(|l| l.resource.clone()),
                line: location.and_then(|l| l.line),
                original: line.to_string(),
                fixed,
            });
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StrictError(String);

    impl std::fmt::Display for StrictError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    /// Accepts only documents whose task lines are all canonical
    fn strict_task_parser(text: &str) -> Result<usize, StrictError> {
        let mut count = 0;
        for line in text.lines() {
            if TASK_ATTEMPT.is_match(line) {
                if !VALID_TASK.is_match(line) {
                    return Err(StrictError(format!("malformed task line: {}", line)));
                }
                count += 1;
            }
        }
        Ok(count)
    }

    #[test]
    fn test_unrecognized_marker_defaults_to_pending() {
        assert_eq!(fix_line("- [X] task"), "- [ ] task");
        assert_eq!(fix_line("- [?] task"), "- [ ] task");
        assert_eq!(fix_line("- [] task"), "- [ ] task");
    }

    #[test]
    fn test_canonical_markers_are_kept() {
        assert_eq!(fix_line("- [x] done"), "- [x] done");
        assert_eq!(fix_line("- [-] doing"), "- [-] doing");
        assert_eq!(fix_line("  * [ ] nested"), "  * [ ] nested");
    }

    #[test]
    fn test_checkbox_spacing() {
        assert_eq!(fix_line("-[x]done"), "- [x] done");
        assert_eq!(fix_line("-   [ ]   spaced   "), "- [ ] spaced");
        assert_eq!(fix_line("- [ ]"), "- [ ]");
        // A one-character link is not a checkbox
        assert_eq!(fix_line("- [a](b)"), "- [a](b)");
    }

    #[test]
    fn test_heading_whitespace() {
        assert_eq!(fix_line("#Title"), "# Title");
        assert_eq!(fix_line("##   Spaced   "), "## Spaced");
        assert_eq!(fix_line("   ### Indented"), "### Indented");
        assert_eq!(fix_line("#######"), "#######");
        assert_eq!(fix_line("# "), "#");
    }

    #[test]
    fn test_link_format() {
        assert_eq!(
            fix_line("see [the docs] (https://example.com)"),
            "see [the docs](https://example.com)"
        );
        assert_eq!(fix_line("[docs]( ./a.md )"), "[docs](./a.md)");
    }

    #[test]
    fn test_fix_content_skips_code_and_closes_fence() {
        let input = "#Notes\n``` rust\n#not a heading\n- [X] in code\n";
        let report = fix_content(input);

        assert_eq!(
            report.content,
            "# Notes\n```rust\n#not a heading\n- [X] in code\n```\n"
        );
        assert!(report.applied_rules.contains(&"heading-whitespace"));
        assert!(report.applied_rules.contains(&"code-fence"));
        assert!(report.applied_rules.contains(&"close-code-fence"));
    }

    #[test]
    fn test_fix_content_is_idempotent_on_sample() {
        let input = "#Todo\n-[X]buy milk\n- [x] done\n[link] (url)\n~~~\ncode\n";
        let once = fix_content(input);
        let twice = fix_content(&once.content);
        assert_eq!(once.content, twice.content);
        assert!(!twice.changed());
    }

    #[test]
    fn test_extract_outline() {
        let outline = extract_outline(
            "# Title\nfirst line\nsecond line\n\n- a\n- b\n\n## Next\n```\n# code\n```\ntext\n",
        );

        assert_eq!(outline.headings.len(), 2);
        assert_eq!(outline.headings[0].text, "Title");
        assert_eq!(outline.headings[1].level, 2);
        assert_eq!(outline.headings[1].line, 8);
        assert_eq!(
            outline.paragraphs,
            vec!["first line second line".to_string(), "text".to_string()]
        );
        assert_eq!(outline.lists, vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[test]
    fn test_extract_tasks() {
        let extraction = extract_tasks("# Tasks\n- [ ] one\n- [x] two\n- [?] three\n-[ ]four\nplain\n");

        assert_eq!(extraction.valid.len(), 2);
        assert_eq!(extraction.valid[1].state, TaskState::Done);
        assert_eq!(extraction.invalid.len(), 2);
        assert_eq!(extraction.invalid[0].line, 4);
    }

    #[test]
    fn test_safe_parse_success_without_fix() {
        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let result = recoverer.safe_parse_tasks("- [ ] a\n", "todo.md", "tasks", strict_task_parser);

        assert!(result.success);
        assert!(!result.retried);
        assert_eq!(result.data.unwrap().parsed(), Some(1));
    }

    #[test]
    fn test_safe_parse_succeeds_after_auto_fix() {
        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let result =
            recoverer.safe_parse_tasks("- [X] a\n-[x]b\n", "todo.md", "tasks", strict_task_parser);

        assert!(result.success);
        assert!(result.retried);
        assert_eq!(result.retry_count, 1);
        assert!(!result.used_fallback);
        assert_eq!(result.data.unwrap().parsed(), Some(2));
    }

    #[test]
    fn test_safe_parse_falls_back_to_task_split() {
        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let always_fails = |_: &str| -> Result<(), StrictError> { Err(StrictError("nope".into())) };
        let result = recoverer.safe_parse_tasks("- [ ] a\n- [x b\n", "todo.md", "tasks", always_fails);

        assert!(result.success);
        assert!(result.used_fallback);
        assert_eq!(result.error.as_ref().unwrap().message, "nope");
        match result.data.unwrap() {
            ParsedContent::Tasks(tasks) => {
                assert_eq!(tasks.valid.len(), 1);
                assert_eq!(tasks.invalid.len(), 1);
            }
            other => panic!("Expected task fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_safe_parse_markdown_fallback_and_disabled_fallback() {
        let always_fails = |_: &str| -> Result<(), StrictError> { Err(StrictError("bad".into())) };

        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let result = recoverer.safe_parse("# A\ntext\n", "a.md", "outline", always_fails);
        match result.data {
            Some(ParsedContent::Outline(outline)) => assert_eq!(outline.headings.len(), 1),
            other => panic!("Expected outline fallback, got {:?}", other),
        }

        let recoverer = ParsingRecoverer::new(ParsingConfig {
            fallback_parsing: false,
            ..ParsingConfig::default()
        });
        let result = recoverer.safe_parse("# A\n", "a.md", "outline", always_fails);
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error.unwrap().category(), ErrorCategory::Parsing);
    }

    #[tokio::test]
    async fn test_recover_hands_fixed_line_to_hook() {
        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let repairs = Arc::new(Mutex::new(Vec::<LineRepair>::new()));
        let sink = repairs.clone();
        recoverer.set_repair_hook(Arc::new(move |repair: LineRepair| {
            sink.lock().unwrap().push(repair)
        }));

        let error = TaxonomyError::parsing("bad checkbox", Some("- [X] task".to_string()))
            .with_location(ErrorLocation::at("todo.md", 3, None));

        assert!(recoverer.can_recover(&error));
        assert!(recoverer.recover(&error).await.unwrap());
        assert_eq!(
            *repairs.lock().unwrap(),
            vec![LineRepair {
                resource: Some("todo.md".to_string()),
                line: Some(3),
                original: "- [X] task".to_string(),
                fixed: "- [ ] task".to_string(),
            }]
        );

        let clean = TaxonomyError::parsing("other", Some("- [ ] task".to_string()));
        assert!(!recoverer.recover(&clean).await.unwrap());

        let no_line = TaxonomyError::parsing("no line", None);
        assert!(!recoverer.can_recover(&no_line));
        assert_eq!(repairs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recover_without_hook_claims_nothing() {
        let recoverer = ParsingRecoverer::new(ParsingConfig::default());
        let error = TaxonomyError::parsing("bad checkbox", Some("- [X] task".to_string()));

        assert!(!recoverer.can_recover(&error));
        assert!(!recoverer.recover(&error).await.unwrap());
    }

    #[test]
    fn test_fix_content_handles_crlf() {
        let report = fix_content("```\r\ncode\r\n```\r\n#Title\r\n");

        assert_eq!(report.content, "```\r\ncode\r\n```\r\n# Title\r\n");
        assert_eq!(report.applied_rules, vec!["heading-whitespace"]);
        assert!(!fix_content(&report.content).changed());

        let report = fix_content("```\r\ncode\r\n");
        assert_eq!(report.content, "```\r\ncode\r\n```\r\n");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Markdown-ish documents built from fragments the rules care about
    #[derive(Debug, Clone)]
    struct MarkdownDoc(String);

    impl Arbitrary for MarkdownDoc {
        fn arbitrary(g: &mut Gen) -> Self {
            let fragments = [
                "#", "##", "#######", " ", "  ", "\t", "-", "*", "+", "[", "]", "[ ]", "[x]",
                "[X]", "[-]", "[?]", "(", ")", "```", "~~~", "rust", "task", "[ab]", "(url)",
                "\n", "\n", "\n", "text", "é", "`",
            ];
            let count = usize::arbitrary(g) % 40;
            let mut doc = String::new();
            for _ in 0..count {
                doc.push_str(g.choose(&fragments).unwrap());
            }
            MarkdownDoc(doc)
        }
    }

    #[quickcheck]
    fn prop_fix_is_idempotent_on_markdown(doc: MarkdownDoc) -> bool {
        let once = fix_content(&doc.0).content;
        fix_content(&once).content == once
    }

    #[quickcheck]
    fn prop_fix_is_idempotent_on_arbitrary_text(text: String) -> bool {
        let once = fix_content(&text).content;
        fix_content(&once).content == once
    }

    #[quickcheck]
    fn prop_fixed_task_lines_are_canonical(marker: char, text: String) -> bool {
        let text: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
        if marker == ']' || marker == '\n' || text.is_empty() {
            return true;
        }
        let fixed = fix_line(&format!("- [{}] {}", marker, text));
        VALID_TASK.is_match(&fixed)
    }
}
