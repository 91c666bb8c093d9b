//! Math-markup normalization for model answers.
//!
//! Models mix delimiter styles freely: `[[..]]`, `((..))`, `[..]`, `\[..\]`,
//! `\(..\)`. Answers are rendered with `$$..$$` for block math and `$..$` for
//! inline math, so everything else is rewritten into those two forms.
//!
//! Two strategies exist. [`Strategy::PreserveAndFix`] is the production
//! default: spans already in canonical form are stashed behind placeholder
//! tokens, legacy brackets are rewritten, and the stashed spans are put back
//! verbatim. [`Strategy::CommandTable`] is the older rewrite kept for
//! comparison; it also escapes a fixed table of bare command words and
//! reflows whitespace around math.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// `$$..$$`, may span lines
static BLOCK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\$\$(.*?)\$\$").unwrap());

/// `$..$`, confined to one line
static INLINE_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$(.*?)\$").unwrap());

static DOUBLE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]|\(\((.*?)\)\)").unwrap());

static SINGLE_BRACKET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(.*?)\]").unwrap());

static DISPLAY_DELIMITER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\\[|\\\]").unwrap());

static INLINE_DELIMITER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\\(|\\\)").unwrap());

/// Bare command words that get a backslash. Substring match: `impi` becomes `im\pi`.
static COMMAND_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\?(alpha|beta|gamma|delta|pi|theta|mu|quad|text|mod|div)").unwrap()
});

static BLOCK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\$\$[^$\n]+\$\$[ \t]*$").unwrap());

static MATH_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\$[^$]+\$\$|\$[^$\n]+\$").unwrap());

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static EXCESS_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Private-use code points; models never emit them in practice.
const SENTINEL: char = '\u{E000}';
const SENTINEL_END: char = '\u{E001}';

/// Normalization policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Stash canonical spans, fix legacy brackets, restore
    #[default]
    #[serde(alias = "preserve")]
    PreserveAndFix,
    /// Unconditional delimiter rewrite plus command escaping and reflow
    #[serde(alias = "commands")]
    CommandTable,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::PreserveAndFix => "preserve-and-fix",
            Strategy::CommandTable => "command-table",
        }
    }

    /// Apply this strategy to one answer
    pub fn apply(&self, text: &str) -> String {
        match self {
            Strategy::PreserveAndFix => preserve_and_fix(text),
            Strategy::CommandTable => command_table(text),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve" | "preserve-and-fix" => Ok(Strategy::PreserveAndFix),
            "commands" | "command-table" => Ok(Strategy::CommandTable),
            other => Err(format!(
                "Invalid normalizer strategy: '{}'. Valid values: preserve, commands",
                other
            )),
        }
    }
}

/// Normalize with the default strategy. Absent input yields an empty string.
pub fn normalize(text: Option<&str>) -> String {
    normalize_with(Strategy::default(), text)
}

/// Normalize with an explicit strategy. Absent input yields an empty string.
pub fn normalize_with(strategy: Strategy, text: Option<&str>) -> String {
    match text {
        Some(text) => strategy.apply(text),
        None => String::new(),
    }
}

/// Per-call table of spans that were already correct.
struct PreservedSpans {
    prefix: String,
    spans: Vec<String>,
}

impl PreservedSpans {
    fn for_input(text: &str) -> Self {
        // One sentinel longer than the longest run already in the input.
        let longest_run = text
            .split(|c: char| c != SENTINEL)
            .map(|run| run.len() / SENTINEL.len_utf8())
            .max()
            .unwrap_or(0);
        Self {
            prefix: SENTINEL.to_string().repeat(longest_run + 1),
            spans: Vec::new(),
        }
    }

    fn token(&self, index: usize) -> String {
        format!("{}{}{}", self.prefix, index, SENTINEL_END)
    }

    fn stash(&mut self, span: &str) -> String {
        let token = self.token(self.spans.len());
        self.spans.push(span.to_string());
        token
    }

    fn stash_all(&mut self, pattern: &Regex, text: &str) -> String {
        pattern
            .replace_all(text, |caps: &Captures| self.stash(&caps[0]))
            .into_owned()
    }

    fn restore(&self, text: &str) -> String {
        let mut restored = String::with_capacity(text.len());
        self.expand_into(text, &mut restored);
        restored
    }

    /// Single pass over `text`. A stashed span can hold tokens of earlier
    /// spans, which are expanded in place.
    fn expand_into(&self, text: &str, out: &mut String) {
        let mut rest = text;
        while let Some(pos) = rest.find(&self.prefix) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + self.prefix.len()..];
            let digits = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            let index = after[..digits].parse::<usize>().ok();
            match index.and_then(|i| self.spans.get(i)) {
                Some(span) if after[digits..].starts_with(SENTINEL_END) => {
                    self.expand_into(span, out);
                    rest = &after[digits + SENTINEL_END.len_utf8()..];
                }
                // A literal sentinel from the input runs into the token; step past it.
                _ => {
                    out.push(SENTINEL);
                    rest = &rest[pos + SENTINEL.len_utf8()..];
                }
            }
        }
        out.push_str(rest);
    }
}

fn preserve_and_fix(text: &str) -> String {
    let mut table = PreservedSpans::for_input(text);

    let working = table.stash_all(&BLOCK_SPAN, text);
    let working = table.stash_all(&INLINE_SPAN, &working);

    // Double forms first, otherwise `[[a]]` is eaten by the single-bracket rule.
    let working = DOUBLE_BRACKET.replace_all(&working, |caps: &Captures| {
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str());
        format!("$${}$$", inner)
    });
    let working = SINGLE_BRACKET.replace_all(&working, |caps: &Captures| format!("${}$", &caps[1]));

    table.restore(&working)
}

fn command_table(text: &str) -> String {
    let working = DISPLAY_DELIMITER.replace_all(text, "$$$$");
    let working = INLINE_DELIMITER.replace_all(&working, "$$");

    let working = COMMAND_WORD.replace_all(&working, |caps: &Captures| {
        let matched = &caps[0];
        if matched.starts_with('\\') {
            matched.to_string()
        } else {
            format!("\\{}", matched)
        }
    });

    let working = BLOCK_LINE.replace_all(&working, "\n\n${0}\n\n");
    let working = EXCESS_NEWLINES.replace_all(&working, "\n\n");

    let working = MATH_SPAN.replace_all(&working, |caps: &Captures| {
        let span = &caps[0];
        if span.starts_with("$$") {
            span.to_string()
        } else {
            format!(" {} ", span)
        }
    });
    let working = EXCESS_SPACES.replace_all(&working, " ");

    working.trim().to_string()
}
