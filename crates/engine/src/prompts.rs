//! System prompts and tool definitions.
//!
//! Every stage sends one of these constants as its system message; all
//! run-specific content goes into the user message.

use delve_core::ToolDefinition;

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const RESEARCH_COMPLETE_TOOL: &str = "research_complete";

pub const CLARIFY_PROMPT: &str = "You decide whether a research request is clear enough to start. \
Ask for clarification only when the request is genuinely ambiguous: unknown acronyms, \
an unclear scope, or missing constraints that would change the research. \
Respond with JSON only:\n\
{\"need_clarification\": true|false, \"question\": \"<one question for the user, empty if none>\", \
\"verification\": \"<one sentence confirming what you will research, empty if asking>\"}";

pub const PLAN_PROMPT: &str = "You are the lead researcher. Break the research request into \
independent sub-topics that can be investigated in parallel by separate researchers. \
Each sub-topic must be self-contained: a researcher sees only that description. \
Prefer fewer, broader sub-topics for simple questions. \
Respond with JSON only:\n{\"sub_topics\": [{\"description\": \"...\"}]}";

pub const REFLECT_PROMPT: &str = "You are the lead researcher reviewing findings gathered so far. \
Decide whether the findings answer the research request well enough to write the final report. \
If not, propose new, non-overlapping sub-topics that close the most important gaps. \
Respond with JSON only:\n\
{\"research_complete\": true|false, \"sub_topics\": [{\"description\": \"...\"}]}";

pub const RESEARCHER_PROMPT: &str = "You are a researcher investigating one sub-topic. \
Use the web_search tool to gather evidence, one focused query at a time. \
After each set of results, decide whether you have enough to cover the sub-topic. \
When you do, or when further searching stops turning up new information, call research_complete. \
Stay on your sub-topic.";

pub const COMPRESS_PROMPT: &str = "You condense raw research notes into a faithful digest. \
Keep every relevant fact, figure and date; drop repetition and filler. \
Reference sources by their number in square brackets, like [2]. Never invent sources. \
List questions the sources left unanswered as gaps. \
Respond with JSON only:\n{\"digest\": \"...\", \"gaps\": [\"...\"]}";

pub const SUMMARIZE_PROMPT: &str = "Summarize the following web page for a researcher. \
Keep key facts, figures, dates and direct quotes that matter; omit navigation, ads and boilerplate. \
Reply with the summary text only.";

pub const REPORT_PROMPT: &str = "You write the final research report in markdown. \
Answer the research request directly, organised with headings. \
Support claims with citations to the numbered sources you are given, written as \
[title](url) links or [n] references. Cite only those sources; never add other URLs. \
End with a \"### Sources\" section listing the sources you cited.";

/// The `web_search` tool offered to research units.
pub fn web_search_tool() -> ToolDefinition {
    ToolDefinition {
        name: WEB_SEARCH_TOOL.into(),
        description: "Search the web. Returns titles, URLs and content for the top results."
            .into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A focused search query"
                }
            },
            "required": ["query"]
        }),
    }
}

/// The `research_complete` tool: signals the unit is done searching.
pub fn research_complete_tool() -> ToolDefinition {
    ToolDefinition {
        name: RESEARCH_COMPLETE_TOOL.into(),
        description: "Call when you have gathered enough information on your sub-topic.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {}
        }),
    }
}
