//! Line-scoped classification of session output into structured events.
//!
//! Decoded text accumulates until a line terminator completes a line, so
//! a phrase split across read boundaries still matches once its line is
//! whole, while phrases split across different lines never match. Escape
//! codes are stripped from each completed line before any pattern sees
//! it; progress escape sequences are the one exception, extracted from
//! the raw line because the convention lives inside the codes.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;

use patchbay_types::ParsedEvent;

use crate::ansi::strip_ansi;

/// Recent status texts kept for duplicate suppression. Spinner frames
/// repaint the same text many times per second.
const STATUS_WINDOW: usize = 8;
/// Recently detected URLs kept for duplicate suppression.
const URL_WINDOW: usize = 64;

/// One completed line, in the forms the rules match against.
struct LineContext {
    /// As decoded, escape codes intact.
    raw: String,
    /// Stripped and trimmed.
    line: String,
    /// Stripped, trimmed, lowercased.
    lower: String,
}

/// One classification rule: a cheap gate plus a constructor that may
/// still decline once it looks closer.
struct Rule {
    name: &'static str,
    matches: fn(&LineContext) -> bool,
    build: fn(&mut OutputParser, &LineContext) -> Option<ParsedEvent>,
}

/// Ordered rule table. Every rule is evaluated for every line and all
/// matches are emitted in this order; adding a pattern is a data change.
static RULES: &[Rule] = &[
    Rule {
        name: "rate_limit",
        matches: |ctx| {
            ctx.lower.contains("429") || strong_rate_limit_phrase(&ctx.lower).is_some()
        },
        build: build_rate_limit,
    },
    Rule {
        name: "warning",
        matches: |ctx| {
            ctx.lower.starts_with("warning:")
                || ctx.lower.starts_with("warn:")
                || ctx.line.contains('⚠')
        },
        build: |_, ctx| {
            Some(ParsedEvent::Warning {
                text: ctx.line.clone(),
            })
        },
    },
    Rule {
        name: "progress_osc",
        matches: |ctx| ctx.raw.contains("\x1b]9;4;"),
        build: build_progress_osc,
    },
    Rule {
        name: "progress_percent",
        matches: |ctx| ctx.line.contains('%'),
        build: build_progress_percent,
    },
    Rule {
        name: "link",
        matches: |ctx| ctx.line.contains("http://") || ctx.line.contains("https://"),
        build: build_links_marker,
    },
    Rule {
        name: "status_line",
        matches: |ctx| is_status_line(&ctx.line),
        build: build_status,
    },
];

/// Rate-limit phrasings that are sufficient evidence on their own.
/// A bare "429" is not: it needs a retry hint on the same line before
/// the line classifies (strings of digits show up everywhere).
const STRONG_RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "rate_limit_error",
    "too many requests",
    "quota exceeded",
    "overloaded_error",
    "insufficient_quota",
    "requests throttled",
];

/// Provider attribution markers. Ordered, first match wins; lines that
/// name no provider fall through to "generic".
const PROVIDER_MARKERS: &[(&str, &[&str])] = &[
    ("anthropic", &["anthropic", "claude", "overloaded_error"]),
    ("openai", &["openai", "gpt-", "insufficient_quota"]),
    ("github", &["github", "secondary rate limit"]),
    ("google", &["gemini", "googleapis"]),
];

static HTTP_429_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b429\b").unwrap()
});

/// "Retry-After: 30", "retry_after_secs=30" and similar header-ish forms.
static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[-_ ]after(?:_secs)?[:\s=]+(\d+)").unwrap()
});

/// Prose forms: "try again in 30 seconds", "retry in 5s".
static TRY_AGAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:try again|retry) in (\d+)\s*s(?:ec(?:ond)?s?)?\b").unwrap()
});

/// A 0-100 integer immediately followed by '%'.
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3})%").unwrap()
});

/// OSC 9;4 taskbar-progress sequence: ESC ] 9;4;state;percent (BEL | ESC \).
static PROGRESS_OSC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\]9;4;(\d+);?(\d*)(?:\x07|\x1b\\)").unwrap()
});

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>"'\)\]]+"#).unwrap()
});

fn strong_rate_limit_phrase(lower: &str) -> Option<&'static str> {
    STRONG_RATE_LIMIT_PHRASES
        .iter()
        .find(|phrase| lower.contains(**phrase))
        .copied()
}

fn detect_provider(lower: &str) -> &'static str {
    for (provider, markers) in PROVIDER_MARKERS {
        if markers.iter().any(|m| lower.contains(m)) {
            return provider;
        }
    }
    "generic"
}

fn extract_retry_after(line: &str) -> Option<u64> {
    let caps = RETRY_AFTER_RE
        .captures(line)
        .or_else(|| TRY_AGAIN_RE.captures(line))?;
    caps.get(1)?.as_str().parse().ok()
}

fn build_rate_limit(_parser: &mut OutputParser, ctx: &LineContext) -> Option<ParsedEvent> {
    let retry_after = extract_retry_after(&ctx.line);
    let strong = strong_rate_limit_phrase(&ctx.lower).is_some();
    let weak_429 = HTTP_429_RE.is_match(&ctx.lower);

    if !strong && !(weak_429 && retry_after.is_some()) {
        return None;
    }

    Some(ParsedEvent::RateLimit {
        provider: detect_provider(&ctx.lower).to_string(),
        retry_after,
    })
}

fn build_progress_osc(parser: &mut OutputParser, ctx: &LineContext) -> Option<ParsedEvent> {
    let caps = PROGRESS_OSC_RE.captures(&ctx.raw)?;
    let state: u8 = caps.get(1)?.as_str().parse().ok()?;
    // States: 0 clear, 1 normal, 2 error, 3 indeterminate, 4 paused.
    // Only the percent-carrying states report progress.
    if !matches!(state, 1 | 2 | 4) {
        return None;
    }
    let percent: u8 = caps.get(2)?.as_str().parse().ok()?;
    if percent > 100 {
        return None;
    }
    parser.dedupe_progress(percent)
}

fn build_progress_percent(parser: &mut OutputParser, ctx: &LineContext) -> Option<ParsedEvent> {
    // Redraws repaint a whole bar; the last value on the line is current.
    let caps = PERCENT_RE.captures_iter(&ctx.line).last()?;
    let percent: u8 = caps.get(1)?.as_str().parse().ok()?;
    if percent > 100 {
        return None;
    }
    parser.dedupe_progress(percent)
}

fn build_links_marker(parser: &mut OutputParser, ctx: &LineContext) -> Option<ParsedEvent> {
    // Emits every new URL on the line itself; returning the first event
    // through the rule result would drop siblings, so the builder pushes
    // extras onto the parser's spillover list.
    parser.collect_links(&ctx.line)
}

fn build_status(parser: &mut OutputParser, ctx: &LineContext) -> Option<ParsedEvent> {
    let text = status_text(&ctx.line)?;
    if parser.recent_status.iter().any(|seen| seen == &text) {
        return None;
    }
    if parser.recent_status.len() == STATUS_WINDOW {
        parser.recent_status.pop_front();
    }
    parser.recent_status.push_back(text.clone());
    Some(ParsedEvent::StatusLine { text })
}

/// Status lines start with a spinner or bullet glyph, or are short lines
/// led by an activity word.
fn is_status_line(line: &str) -> bool {
    const BULLETS: [char; 8] = ['*', '●', '•', '○', '◐', '◑', '◒', '◓'];
    const SPINNERS: [char; 18] = [
        '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '⣾', '⣽', '⣻', '⢿', '⡿', '⣟',
        '⣯', '⣷',
    ];

    let Some(first) = line.chars().next() else {
        return false;
    };
    if BULLETS.contains(&first) || SPINNERS.contains(&first) {
        return true;
    }

    if line.len() < 50 {
        let lower = line.to_lowercase();
        for word in ["thinking", "planning", "working", "running", "waiting"] {
            if lower.starts_with(word) {
                return true;
            }
        }
    }

    false
}

/// Timer and hint chatter appended to status lines, e.g.
/// "(3s · esc to interrupt)".
static STATUS_TRAILER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\((?:\d+s\b[^)]*|[^)]*esc to interrupt[^)]*)\)\s*$").unwrap()
});

fn status_text(line: &str) -> Option<String> {
    let body = line
        .strip_prefix(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(line)
        .trim_start();
    let text = STATUS_TRAILER_RE.replace(body, "").trim().to_string();
    if text.is_empty() || is_chrome(&text) {
        return None;
    }
    Some(text)
}

/// Lines that are pure box-drawing or separator chrome.
fn is_chrome(text: &str) -> bool {
    text.chars()
        .all(|c| "─│┌┐└┘├┤┬┴┼━┃┏┓┗┛═║╔╗╚╝▀▄█▌▐░▒▓-=_ ".contains(c))
}

/// Windowed line classifier turning decoded text into structured events.
#[derive(Debug, Default)]
pub struct OutputParser {
    /// Accumulated text of the line in progress.
    partial: String,
    /// Recently emitted status texts (duplicate suppression).
    recent_status: VecDeque<String>,
    /// Recently detected URLs (duplicate suppression).
    recent_urls: VecDeque<String>,
    /// Extra link events when one line carries several URLs.
    spillover: Vec<ParsedEvent>,
    last_progress: Option<u8>,
    next_link_id: u64,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a chunk of decoded output, returning every event from
    /// the lines it completed. A partial trailing line is retained; a
    /// line still unterminated at stream end is never classified.
    pub fn parse_chunk(&mut self, chunk: &str) -> Vec<ParsedEvent> {
        self.partial.push_str(chunk);
        let mut events = Vec::new();

        // '\r' terminates a visual line just as '\n' does: a redraw
        // replaces the line, and the replaced text was complete.
        while let Some(pos) = self.partial.find(['\n', '\r']) {
            let mut end = pos + 1;
            if self.partial.as_bytes()[pos] == b'\r'
                && self.partial.as_bytes().get(end) == Some(&b'\n')
            {
                end += 1;
            }
            let raw: String = self.partial[..pos].to_string();
            self.partial.drain(..end);
            self.classify_line(raw, &mut events);
        }

        events
    }

    fn classify_line(&mut self, raw: String, events: &mut Vec<ParsedEvent>) {
        let stripped = strip_ansi(&raw);
        let line = stripped.trim();
        if line.is_empty() && !raw.contains('\x1b') {
            return;
        }
        let ctx = LineContext {
            lower: line.to_lowercase(),
            line: line.to_string(),
            raw,
        };

        for rule in RULES {
            if !(rule.matches)(&ctx) {
                continue;
            }
            if let Some(event) = (rule.build)(self, &ctx) {
                tracing::trace!(target: "patchbay::parser", "rule '{}' matched: {:?}", rule.name, event);
                events.push(event);
            }
            events.append(&mut self.spillover);
        }
    }

    fn dedupe_progress(&mut self, percent: u8) -> Option<ParsedEvent> {
        if self.last_progress == Some(percent) {
            return None;
        }
        self.last_progress = Some(percent);
        Some(ParsedEvent::Progress { percent })
    }

    fn collect_links(&mut self, line: &str) -> Option<ParsedEvent> {
        let mut first = None;
        for m in URL_RE.find_iter(line) {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            if url.is_empty() || self.recent_urls.iter().any(|seen| seen == url) {
                continue;
            }
            if self.recent_urls.len() == URL_WINDOW {
                self.recent_urls.pop_front();
            }
            self.recent_urls.push_back(url.to_string());

            self.next_link_id += 1;
            let event = ParsedEvent::LinkDetected {
                url: url.to_string(),
                id: self.next_link_id,
            };
            if first.is_none() {
                first = Some(event);
            } else {
                self.spillover.push(event);
            }
        }
        first
    }
}
