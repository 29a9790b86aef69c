//! crates/exam_pilot_core/src/parser.rs
//!
//! Turns raw generated text into an ordered list of steps and a final answer.
//! The provider output is untrusted, so parsing never fails.

const STEP_MARKER: &str = "STEP";
const FINAL_ANSWER_MARKER: &str = "FINAL ANSWER:";

/// A structured lesson extracted from free-form text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedExplanation {
    pub steps: Vec<String>,
    pub final_answer: String,
}

/// The role of a single trimmed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind<'a> {
    Step(&'a str),
    FinalAnswer(&'a str),
    Other,
}

/// ASCII case-insensitive `strip_prefix`.
fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let head = line.get(..marker.len())?;
    head.eq_ignore_ascii_case(marker).then(|| &line[marker.len()..])
}

fn classify(line: &str) -> LineKind<'_> {
    if let Some(rest) = strip_marker(line, FINAL_ANSWER_MARKER) {
        return LineKind::FinalAnswer(rest.trim());
    }

    if let Some(rest) = strip_marker(line, STEP_MARKER) {
        // "STEPS are..." or "Stepping" are prose, not markers.
        let is_marker = rest
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c.is_ascii_digit() || c == ':');
        if is_marker {
            let content = match line.split_once(':') {
                Some((_, after)) => after.trim(),
                None => line,
            };
            return LineKind::Step(content);
        }
    }

    LineKind::Other
}

/// Parses a line-oriented explanation.
///
/// Step lines are kept in order of appearance. When the final-answer marker
/// appears more than once, the last occurrence wins.
pub fn parse_explanation(raw: &str) -> ParsedExplanation {
    let mut parsed = ParsedExplanation::default();

    for line in raw.lines().map(str::trim) {
        match classify(line) {
            LineKind::Step(content) => parsed.steps.push(content.to_string()),
            LineKind::FinalAnswer(answer) => parsed.final_answer = answer.to_string(),
            LineKind::Other => {}
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_and_final_answer() {
        let parsed = parse_explanation("STEP 1: Read\nSTEP 2: Solve\nFINAL ANSWER: 42");
        assert_eq!(parsed.steps, vec!["Read", "Solve"]);
        assert_eq!(parsed.final_answer, "42");
    }

    #[test]
    fn text_without_markers_yields_empty_result() {
        let parsed = parse_explanation("The answer is probably 42.\nGood luck!");
        assert!(parsed.steps.is_empty());
        assert_eq!(parsed.final_answer, "");
        assert_eq!(parse_explanation(""), ParsedExplanation::default());
    }

    #[test]
    fn ignores_concept_and_formula_lines() {
        let raw = "CONCEPT: Speed\nFORMULA: v = d / t\n  STEP 1: Divide 100 by 20  \nFINAL ANSWER: 5 m/s";
        let parsed = parse_explanation(raw);
        assert_eq!(parsed.steps, vec!["Divide 100 by 20"]);
        assert_eq!(parsed.final_answer, "5 m/s");
    }

    #[test]
    fn keeps_text_after_the_first_colon_only() {
        let parsed = parse_explanation("STEP 1: Use the formula: v = d / t");
        assert_eq!(parsed.steps, vec!["Use the formula: v = d / t"]);
    }

    #[test]
    fn step_without_colon_keeps_whole_line() {
        let parsed = parse_explanation("STEP 1 read carefully");
        assert_eq!(parsed.steps, vec!["STEP 1 read carefully"]);
    }

    #[test]
    fn last_final_answer_wins() {
        let parsed = parse_explanation("FINAL ANSWER: 3\nSTEP 1: Recheck\nFINAL ANSWER: 4");
        assert_eq!(parsed.final_answer, "4");
        assert_eq!(parsed.steps, vec!["Recheck"]);
    }

    #[test]
    fn markers_are_case_insensitive_but_prose_is_ignored() {
        let parsed = parse_explanation("Step 1: Expand\nSteps are listed below\nFinal answer: x = 2");
        assert_eq!(parsed.steps, vec!["Expand"]);
        assert_eq!(parsed.final_answer, "x = 2");
    }

    #[test]
    fn survives_non_ascii_input() {
        let parsed = parse_explanation("الخطوة ١\nSTEP 1: اقرأ السؤال\nFINAL ANSWER: ٤٢");
        assert_eq!(parsed.steps, vec!["اقرأ السؤال"]);
        assert_eq!(parsed.final_answer, "٤٢");
    }
}
