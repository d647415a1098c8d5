//! Prompt texts and message assembly for analysis, compliance, generation and rewrite.

use std::fmt::Write as _;

use codementor_index::RetrievedDocument;
use codementor_llm::Message;

const PREPROCESS_SYSTEM: &str = "\
You analyze messages written by developers. A message can mix a question with code \
snippets, error output and stack traces. Split it into three parts:
1. user_query: the natural-language question. When the message has no explicit \
question, write one that fits the code and errors it contains.
2. context: the code snippets that give the question its context.
3. error: error messages and stack traces.
Answer with a JSON object.";

const INTENT_SYSTEM: &str =
    "You classify developer queries by intent and describe how they relate to a codebase.";

const REFORMULATE_SYSTEM: &str = "\
You rewrite developer queries so they retrieve the right code from a codebase index.
- Add keywords that are likely to appear in the relevant code.
- Turn implicit references to codebase elements into explicit ones.
- Split compound questions into clear parts.
You receive the query as JSON with user_query, context and error. Keep those three \
fields unchanged and add the rewritten query as reformulated_query.";

const RAG_DECISION_SYSTEM: &str = "\
You decide whether answering a developer query needs retrieval over the user's codebase.";

const COMPLIANCE_SYSTEM: &str = "\
You screen incoming queries for a coding assistant. Decide whether the query is about \
programming, software development, AI or another technical topic.
Start your reply with True when it is, followed by a short explanation.
Start your reply with False when it is not, followed by a short message telling the user \
that you only help with programming questions and that a general-purpose assistant fits \
the request better.
When the user asks who you are or who built you, reply False followed by: I am a coding \
assistant created by DhiWise, my name is CodeMentor and I am here to help with your \
coding queries.";

const RAG_SYSTEM: &str = "\
You are an expert coding assistant with deep knowledge of programming and software \
development. Give helpful, accurate and educational answers to coding questions. Mention \
the file path when you refer to code from the provided context.
If the retrieved context looks unrelated to the question, answer from general knowledge \
while keeping in mind that the user works inside a codebase.
Be clear and precise, with enough detail to be useful.";

const DIRECT_SYSTEM: &str = "\
You are an expert coding assistant with deep knowledge of programming and software \
development. Give helpful, accurate and educational answers to coding questions. Be \
clear and precise, with enough detail to be useful, and stay concise.";

const STREAMING_RAG_SYSTEM: &str = "\
You are an expert coding assistant with deep knowledge of programming and software \
development. Give helpful, accurate and educational answers to coding questions. Mention \
the file path when you refer to code from the provided context.";

const STREAMING_DIRECT_SYSTEM: &str = "\
You are an expert coding assistant with deep knowledge of programming and software \
development. Give helpful, accurate and educational answers to coding questions.";

const REWRITE_SYSTEM: &str = "\
You merge code edits into source files. You receive the full original file and an edited \
fragment of it. Produce the complete updated file: apply the edit where it belongs, keep \
every untouched line exactly as it was, and do not add commentary.";

const REWRITE_QUERY: &str =
    "Return only the complete updated file content, without markdown fences or explanations.";

const PRIMARY_HEADING: &str = "Here are relevant code snippets from the codebase:";
const SECONDARY_HEADING: &str = "Here is additional context around the relevant code snippets:";

pub(crate) fn preprocess_messages(raw_input: &str) -> Vec<Message> {
    let user = format!(
        "Parse this developer message and extract or infer its parts:\n\n```\n{raw_input}\n```\n\n\
         Return a JSON object with:\n\
         - \"user_query\": the question being asked; write a clear, concise one if the message has none.\n\
         - \"context\": code snippets that give context, excluding error output.\n\
         - \"error\": error messages or stack traces, or an empty string when there are none."
    );
    vec![Message::system(PREPROCESS_SYSTEM), Message::user(user)]
}

pub(crate) fn intent_messages(query: &str) -> Vec<Message> {
    let user = format!(
        "Analyze this query and identify its primary intent:\n\nQuery: \"{query}\"\n\n\
         Set \"category\" to exactly one of:\n\
         - understanding: explain what existing code does\n\
         - modification: change existing code\n\
         - navigation: find files or components\n\
         - new-feature: add something new\n\
         - debugging: help with an error\n\
         - general-question: programming question not tied to the codebase\n\
         - non-programming: not about programming\n\
         - whole-route-implementation: implement a complete route\n\
         - whole-app-implementation: implement a complete application\n\n\
         Set \"entities\" to the files, classes and functions the query names (empty list if none), \
         and \"specificity\" to how technically specific the query is, from 1 to 5.\n\
         Answer in JSON."
    );
    vec![Message::system(INTENT_SYSTEM), Message::user(user)]
}

pub(crate) fn reformulate_messages(preprocessed_json: &str, intent_json: &str) -> Vec<Message> {
    let user = format!("Original query: {preprocessed_json}\n\nIntent analysis: {intent_json}");
    vec![Message::system(REFORMULATE_SYSTEM), Message::user(user)]
}

pub(crate) fn rag_decision_messages(
    original_query: &str,
    reformulated_query: &str,
    intent_json: &str,
) -> Vec<Message> {
    let user = format!(
        "Decide whether the query below needs retrieval over the user's codebase to be answered well.\n\n\
         Retrieval is likely needed when the query:\n\
         - refers to specific parts of the codebase\n\
         - asks about implementation details of the codebase\n\
         - needs an understanding of the existing code structure\n\
         - asks for changes to existing code\n\
         - asks for help debugging existing code\n\
         - says things like \"in my codebase\", \"in my code\" or \"in my project\"\n\n\
         Retrieval is likely unnecessary when the query:\n\
         - is about general programming concepts, such as converting a string to lowercase\n\
         - asks for a standard pattern without referring to existing code\n\
         - is not technical\n\n\
         For example, \"add a new provider config to every tracing service and keep the provider a dummy\" \
         needs retrieval.\n\
         When in doubt, use retrieval.\n\n\
         Original query: \"{original_query}\"\n\
         Reformulated query: \"{reformulated_query}\"\n\
         Intent analysis: {intent_json}\n\n\
         Start your answer with True or False, then explain briefly. Finish with the number of \
         chunks to retrieve and to keep after reranking, written as \"topk: <n>, topn: <n>\". \
         A chunk is about 500 tokens, so large changes or full implementations need larger values."
    );
    vec![Message::system(RAG_DECISION_SYSTEM), Message::user(user)]
}

pub(crate) fn compliance_messages(query: &str) -> Vec<Message> {
    let user = format!(
        "User query: {query}\n\n\
         Is this query about programming? Your reply must start with True if it is and with False if it is not."
    );
    vec![Message::system(COMPLIANCE_SYSTEM), Message::user(user)]
}

pub(crate) fn rewrite_messages(original_code: &str, rewritten_code: &str) -> Vec<Message> {
    let user = format!(
        "Original file:\n```\n{original_code}\n```\n\nEdited fragment:\n```\n{rewritten_code}\n```"
    );
    vec![
        Message::system(REWRITE_SYSTEM),
        Message::user(user_content(&user, REWRITE_QUERY)),
    ]
}

/// The query text sent to the hybrid retriever and the reranker.
#[must_use]
pub fn retrieval_query(
    user_query: &str,
    reformulated_query: &str,
    current_file_path: &str,
    current_file_content: &str,
) -> String {
    let mut query = format!(
        "this is {user_query} and this is enhanced query if incase user query is not sufficient {reformulated_query}"
    );
    if !current_file_path.is_empty() && !current_file_content.is_empty() {
        let _ = write!(
            query,
            ", current file path is this (Current file: {current_file_path}) and current file content is this {current_file_content}"
        );
    }
    query
}

fn user_content(user_prompt: &str, query: &str) -> String {
    format!("{user_prompt}, here is the query : {query}")
}

/// What the user supplied besides the bare question.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInputs<'a> {
    pub query: &'a str,
    pub context: &'a str,
    pub error: &'a str,
    pub folder_structure: &'a str,
}

/// System prompt plus user prompt for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPrompt {
    pub system: &'static str,
    pub user: String,
}

impl GenerationPrompt {
    /// Messages for the generation provider; `query` is appended to the user prompt.
    #[must_use]
    pub fn messages(&self, query: &str) -> Vec<Message> {
        vec![
            Message::system(self.system),
            Message::user(user_content(&self.user, query)),
        ]
    }
}

fn labelled(label: &str, body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!("{label}\n\n{body}\n\n")
    }
}

fn document_section(heading: &str, docs: &[RetrievedDocument], first_number: usize) -> String {
    if docs.is_empty() {
        return String::new();
    }
    let mut out = format!("{heading}\n\n");
    for (i, doc) in docs.iter().enumerate() {
        let _ = write!(
            out,
            "--- Document {} (from {}) ---\n{}\n\n",
            first_number + i + 1,
            doc.metadata.file_path,
            doc.text
        );
    }
    out
}

/// Prompt for the synchronous retrieval path. The first `primary` documents are
/// the reranked hits, the rest are surrounding chunks of the same files.
#[must_use]
pub fn rag_prompt(
    inputs: &PromptInputs<'_>,
    docs: &[RetrievedDocument],
    primary: usize,
) -> GenerationPrompt {
    let split = primary.min(docs.len());
    let (reranked, surrounding) = docs.split_at(split);
    let user = format!(
        "I need help with the following coding question:\n\n{query}\n\n{context}{error}\n\
         Reranked documents: {reranked}\n\
         Surrounding content from the same files (may contain noise): {surrounding}\n\
         Give a clear, accurate and helpful answer based on the context above. Every snippet \
         carries its file path: when you propose a change, name the file it belongs to. When \
         several files need changes, show the changes of each file with its path. Explain the \
         code you changed, the error you fixed or the feature you implemented.\n\n\
         Folder structure of the codebase: {folder}\n\
         Use it to find the files to change or to decide where new files and folders belong.\n",
        query = inputs.query,
        context = labelled("Additional context from your message:", inputs.context),
        error = labelled("Error information from your message:", inputs.error),
        reranked = document_section(PRIMARY_HEADING, reranked, 0),
        surrounding = document_section(SECONDARY_HEADING, surrounding, split),
        folder = inputs.folder_structure,
    );
    GenerationPrompt {
        system: RAG_SYSTEM,
        user,
    }
}

/// Prompt for the synchronous path without retrieval.
#[must_use]
pub fn direct_prompt(inputs: &PromptInputs<'_>) -> GenerationPrompt {
    let user = format!(
        "I need help with the following coding question:\n\n{query}\n\n{context}{error}\n\
         Give a clear, accurate and helpful answer.\n\n\
         Folder structure of the codebase: {folder}\n\
         Use it to find the files to change or to decide where new files and folders belong.\n\n\
         Only answer questions about programming, software development and other technical \
         topics. For anything else, reply that you are a coding assistant for programming \
         questions and that a general-purpose assistant fits the request better.\n",
        query = inputs.query,
        context = labelled("Here is some code context you provided:", inputs.context),
        error = labelled("Here is the error information you provided:", inputs.error),
        folder = inputs.folder_structure,
    );
    GenerationPrompt {
        system: DIRECT_SYSTEM,
        user,
    }
}

/// Prompt for the streaming retrieval path: at most `limit` documents, all
/// under one heading.
#[must_use]
pub fn streaming_rag_prompt(
    inputs: &PromptInputs<'_>,
    docs: &[RetrievedDocument],
    limit: usize,
) -> GenerationPrompt {
    let docs = &docs[..limit.min(docs.len())];
    let user = format!(
        "I need help with the following coding question:\n\n{query}\n\n{context}{error}\n{documents}\n\
         Folder structure of the codebase: {folder}\n\n\
         Give a clear, accurate and helpful answer based on the context above.\n",
        query = inputs.query,
        context = labelled("Additional context from your message:", inputs.context),
        error = labelled("Error information from your message:", inputs.error),
        documents = document_section(PRIMARY_HEADING, docs, 0),
        folder = inputs.folder_structure,
    );
    GenerationPrompt {
        system: STREAMING_RAG_SYSTEM,
        user,
    }
}

#[must_use]
pub fn streaming_direct_prompt(inputs: &PromptInputs<'_>) -> GenerationPrompt {
    let user = format!(
        "I need help with the following coding question:\n\n{query}\n\n{context}{error}\n\
         Folder structure of the codebase: {folder}\n\n\
         Give a clear, accurate and helpful answer.\n",
        query = inputs.query,
        context = labelled("Here is some code context you provided:", inputs.context),
        error = labelled("Here is the error information you provided:", inputs.error),
        folder = inputs.folder_structure,
    );
    GenerationPrompt {
        system: STREAMING_DIRECT_SYSTEM,
        user,
    }
}
