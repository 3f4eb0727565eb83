//! Prompt templates for the LLM-backed pipeline stages
//!
//! Provides default templates for translation, progressive summaries,
//! vocabulary extraction and the final report. Placeholders use
//! `{name}` syntax and are substituted with `str::replace`.

/// Default prompt templates for each pipeline stage
pub struct PromptTemplates;

impl PromptTemplates {
    /// Realtime translation prompt (fast tier)
    pub fn translate() -> &'static str {
        r#"You are a professional simultaneous interpreter for university lectures.
Translate the following {source_language} text into {target_language}.
Preserve technical terminology. Return only the translated text with no commentary.

Text:
{text}"#
    }

    /// High-quality re-translation prompt (history tier)
    pub fn translate_quality() -> &'static str {
        r#"You are an expert translator preparing lecture notes.
Translate the following {source_language} passage into natural, fluent {target_language}.
Preserve terminology, nuance and sentence structure where possible.
Return only the translated text with no commentary.

Passage:
{text}"#
    }

    /// First progressive summary over the accumulated source text
    pub fn summary_first() -> &'static str {
        r#"You are summarizing a live university lecture delivered in {source_language}.
Summarize the following transcript so far in {source_language}, in 3-5 sentences.
Focus on the main ideas and keep the lecturer's terminology.

Transcript:
{text}"#
    }

    /// Cumulative summary combining the previous summary with new text
    pub fn summary_cumulative() -> &'static str {
        r#"You are summarizing a live university lecture delivered in {source_language}.
Below is your previous summary of the lecture so far, followed by the newly
transcribed portion. Produce one updated cumulative summary in {source_language},
in 4-6 sentences, covering both.

Previous summary:
{previous}

New transcript:
{text}"#
    }

    /// Translate a generated summary into the target language
    pub fn summary_translate() -> &'static str {
        r#"Translate the following lecture summary from {source_language} into {target_language}.
Return only the translated summary.

Summary:
{text}"#
    }

    /// Vocabulary extraction over the session history
    pub fn vocabulary() -> &'static str {
        r#"You are building a study glossary from a university lecture in {source_language}.
Extract 5-10 key technical terms from the transcript below. For each term provide
a short definition in {target_language} and, where helpful, the phrase it appeared in.

Respond with a JSON array only, no surrounding text, where each element is:
{"term": "...", "definition": "...", "context": "..."}

Transcript:
{text}"#
    }

    /// Final Markdown report over the whole session
    pub fn final_report() -> &'static str {
        r#"You are preparing a study report for a university lecture delivered in {source_language}.
Write a Markdown report in {target_language} with these sections:

# Lecture Report
## Overview
## Main Topics
## Key Vocabulary
## Full Summary

Base it on the transcript and summaries below. Be faithful to the content.

Transcript:
{text}

Summaries:
{summaries}"#
    }
}

/// Substitute `{name}`-style placeholders in a template
pub fn render(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in pairs {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_template_placeholders() {
        let prompt = PromptTemplates::translate();
        assert!(prompt.contains("{source_language}"));
        assert!(prompt.contains("{target_language}"));
        assert!(prompt.contains("{text}"));
    }

    #[test]
    fn test_render_substitutes_all_pairs() {
        let rendered = render(
            PromptTemplates::translate(),
            &[
                ("source_language", "English"),
                ("target_language", "Japanese"),
                ("text", "Hello"),
            ],
        );
        assert!(rendered.contains("English"));
        assert!(rendered.contains("Japanese"));
        assert!(rendered.ends_with("Hello"));
        assert!(!rendered.contains('{'));
    }

    #[test]
    fn test_cumulative_template_has_previous() {
        assert!(PromptTemplates::summary_cumulative().contains("{previous}"));
    }
}
