//! Tests for math-markup normalization.
//!
//! Verifies canonical spans survive untouched and legacy brackets are rewritten.

use doubt_common::normalizer::{normalize, normalize_with, Strategy};
use std::thread;
use std::time::{Duration, Instant};

fn fix(text: &str) -> String {
    normalize(Some(text))
}

#[test]
fn test_canonical_inline_is_unchanged() {
    let text = "The force is $F = ma$.";
    assert_eq!(fix(text), text);
}

#[test]
fn test_multiline_block_preserved_verbatim() {
    let text = "Result:\n$$x = \\frac{-b \\pm \\sqrt{b^2-4ac}}{2a}$$\nDone";
    assert_eq!(fix(text), text);
}

#[test]
fn test_block_spanning_lines_is_not_split() {
    let text = "Matrix:\n$$\\begin{pmatrix} a[0] & b \\\\\n c & d \\end{pmatrix}$$\nend";
    assert_eq!(fix(text), text);
}

#[test]
fn test_double_bracket_becomes_block() {
    assert_eq!(fix("[[x=5]]"), "$$x=5$$");
    assert_eq!(fix("[[a+b]]"), "$$a+b$$");
}

#[test]
fn test_double_paren_becomes_block() {
    assert_eq!(fix("((E = mc^2))"), "$$E = mc^2$$");
}

#[test]
fn test_single_bracket_becomes_inline() {
    assert_eq!(fix("The value [x] is shown"), "The value $x$ is shown");
}

#[test]
fn test_mixed_content_keeps_correct_span() {
    assert_eq!(fix("$a=1$ and ((b=2))"), "$a=1$ and $$b=2$$");
}

#[test]
fn test_brackets_inside_canonical_math_untouched() {
    let text = "Interval $x \\in [0, 1]$ and [y]";
    assert_eq!(fix(text), "Interval $x \\in [0, 1]$ and $y$");
}

#[test]
fn test_inline_never_crosses_lines() {
    // A lone `$` per line is not an inline span, so the brackets still convert.
    assert_eq!(fix("costs $5\nand [z] $"), "costs $5\nand $z$ $");
}

#[test]
fn test_inline_span_holding_block_restored() {
    assert_eq!(fix("$a $$b$$ c$"), "$a $$b$$ c$");
    assert_eq!(fix("$a $$b$$ c$ then [d]"), "$a $$b$$ c$ then $d$");
}

#[test]
fn test_round_parens_alone_are_prose() {
    let text = "Newton's law (second) applies.";
    assert_eq!(fix(text), text);
}

#[test]
fn test_idempotent_on_output() {
    let once = fix("Given [[v = u + at]] so [t] = 2");
    assert_eq!(once, "Given $$v = u + at$$ so $t$ = 2");
    assert_eq!(fix(&once), once);
}

#[test]
fn test_absent_and_empty_input() {
    assert_eq!(normalize(None), "");
    assert_eq!(fix(""), "");
}

#[test]
fn test_command_table_is_alternate_policy() {
    let text = "Angle \\(theta\\) where:\n\\[sin theta = 1/2\\]\nso theta = pi/6";
    let out = normalize_with(Strategy::CommandTable, Some(text));
    assert_eq!(
        out,
        "Angle $\\theta$ where:\n\n$$sin \\theta = 1/2$$\n\nso \\theta = \\pi/6"
    );
    // The default policy treats the same text differently.
    assert_ne!(normalize(Some(text)), out);
}

#[test]
fn test_command_table_keeps_escaped_commands() {
    let text = "$\\alpha + \\beta$";
    assert_eq!(normalize_with(Strategy::CommandTable, Some(text)), text);
}

#[test]
fn test_command_table_substring_escaping_is_known_limitation() {
    // Bare words match inside other words too.
    let out = normalize_with(Strategy::CommandTable, Some("impi and model"));
    assert_eq!(out, "im\\pi and \\model");
}

#[test]
fn test_concurrent_calls_are_independent() {
    let inputs: Vec<String> = (0..16)
        .map(|i| format!("Step {i}: $a_{i}$ then [[b_{i}]] and [c_{i}]"))
        .collect();

    let handles: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|input| thread::spawn(move || (0..50).map(|_| fix(&input)).collect::<Vec<_>>()))
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let expected = format!("Step {i}: $a_{i}$ then $$b_{i}$$ and $c_{i}$");
        for out in handle.join().unwrap() {
            assert_eq!(out, expected);
        }
    }
}

#[test]
fn test_long_private_use_run_is_linear() {
    let run = "\u{E000}".repeat(100_000);
    let input = format!("{} [x]", run);

    let started = Instant::now();
    let out = fix(&input);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(out, format!("{} $x$", run));
}

#[test]
fn test_many_preserved_spans() {
    let input = "$a$ [b] ".repeat(20_000);

    let started = Instant::now();
    let out = fix(&input);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(out, "$a$ $b$ ".repeat(20_000));
}
