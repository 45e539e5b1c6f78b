//! Poll prompt assembly.

use driftwatch_store::{SearchResultRow, SourceRow};

const INSTRUCTIONS: &str = "## Instructions

Tell me everything you know about this event. Draw on your full training data to provide a comprehensive, up-to-date summary. Do NOT say you lack information \u{2014} share what you know.

Include:
1. **Key Facts**: What happened, who was involved, when, where, how
2. **Context**: Background information, relevant history, and what led to this event
3. **Current Status**: Latest developments you're aware of
4. **Public Reaction**: How officials, media, and the public have responded
5. **Uncertainties**: What remains unknown, disputed, or unconfirmed
6. **Analysis**: What this means and potential implications

Be thorough but objective. Clearly distinguish between confirmed facts and claims that are disputed or unverified.";

const SOURCES_HEADER: &str = "## Additional Sources / Evidence

The following external sources have been collected. Incorporate them into your analysis and note if they contradict or add to what you already know:";

const SEARCH_HEADER: &str = "## Real-Time Search Results

The following are real-time search results retrieved just now. You MUST acknowledge and address every fact present in these results. If a search result contradicts your training data, explicitly note the discrepancy. Do not ignore or omit any information from these results.";

const ITEM_SEPARATOR: &str = "\n\n---\n\n";

fn sources_block(sources: &[SourceRow]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let url = s.url.as_deref().map(|u| format!(" ({u})")).unwrap_or_default();
            format!("[Source {}] {}{url}\n{}", i + 1, s.title, s.content)
        })
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

fn search_block(results: &[SearchResultRow]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let date = r
                .published_date
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            format!(
                "[Search {}] {} ({}){date}\nRelevance: {:.0}%\n{}",
                i + 1,
                r.title,
                r.url,
                r.score * 100.0,
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join(ITEM_SEPARATOR)
}

/// Template, fixed instructions, then the evidence and grounding blocks
/// when there is anything to put in them.
pub fn build_poll_prompt(
    template: &str,
    sources: &[SourceRow],
    search_results: &[SearchResultRow],
) -> String {
    let mut prompt = format!("{template}\n\n{INSTRUCTIONS}");
    if !sources.is_empty() {
        prompt.push_str(&format!("\n\n{SOURCES_HEADER}\n\n{}", sources_block(sources)));
    }
    if !search_results.is_empty() {
        prompt.push_str(&format!("\n\n{SEARCH_HEADER}\n\n{}", search_block(search_results)));
    }
    prompt
}
