/// Grounding instruction sent as the system prompt of every generation call.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant that answers questions based on the provided context documents.

Rules:
1. Answer ONLY based on the information in the provided documents
2. If the answer is not in the documents, say \"I don't have enough information to answer that question\"
3. Cite which document number(s) you used when answering, e.g. [Document 2]
4. Be concise but complete
5. If multiple documents have relevant information, synthesize them";

/// Fixed answer returned when retrieval finds nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "I don't have enough information to answer that question. No relevant documents were found; ingest documents first.";

pub fn label(number: usize) -> String {
    format!("[Document {number}]")
}

/// One labeled context item: the label on its own line, then the chunk text.
pub fn context_item(number: usize, text: &str) -> String {
    format!("{}\n{}", label(number), text)
}

pub const ITEM_SEPARATOR: &str = "\n\n";
