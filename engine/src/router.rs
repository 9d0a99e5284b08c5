//! Task routing
//!
//! Maps a free-text task to the [`WorkerKind`] that should handle it. Rules are
//! evaluated in priority order and the first match wins; there is no scoring.
//!
//! 1. Search phrase ("search for", "what is", ...) → Search
//! 2. Code syntax marker in a short text (< 30 words) → Exec
//! 3. Execution phrase ("run this", ...) → Exec
//! 4. Code generation phrase ("write a function", ...) → CodeGen
//! 5. Ends with `?` → Search
//! 6. Multi-line text with a code syntax marker → Exec
//! 7. Parentheses plus a common built-in name → Exec
//! 8. Otherwise → Search
//!
//! Phrase rules are case-insensitive. Code syntax markers are matched
//! case-sensitively since they are literal Python tokens.

use sdk::WorkerKind;

const SEARCH_PHRASES: &[&str] = &[
    "search for",
    "find information",
    "look up",
    "research about",
    "what is",
    "tell me about",
    "information about",
];

const CODE_MARKERS: &[&str] = &["print(", "def ", "class ", "import ", "return ", "if __name__"];

const EXEC_PHRASES: &[&str] = &["run this", "execute this", "test this code", "run the code"];

const CODEGEN_PHRASES: &[&str] = &[
    "write code",
    "write a function",
    "write a class",
    "generate code",
    "create a function",
    "implement a",
    "code to",
    "python function",
    "algorithm for",
    "write python",
];

const BUILTIN_CALLS: &[&str] = &["print", "len", "range", "sum"];

/// Texts with fewer words than this count as snippets
const SHORT_TASK_WORDS: usize = 30;

/// Stateless, deterministic task classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskRouter;

impl TaskRouter {
    pub fn new() -> Self {
        Self
    }

    /// Pick the worker kind for `task`. Never fails.
    pub fn classify(&self, task: &str) -> WorkerKind {
        let lowered = task.to_lowercase();
        let trimmed = task.trim();

        let contains_any = |haystack: &str, needles: &[&str]| needles.iter().any(|n| haystack.contains(n));
        let has_code_marker = contains_any(task, CODE_MARKERS);

        if contains_any(&lowered, SEARCH_PHRASES) {
            return WorkerKind::Search;
        }

        if has_code_marker && trimmed.split_whitespace().count() < SHORT_TASK_WORDS {
            return WorkerKind::Exec;
        }

        if contains_any(&lowered, EXEC_PHRASES) {
            return WorkerKind::Exec;
        }

        if contains_any(&lowered, CODEGEN_PHRASES) {
            return WorkerKind::CodeGen;
        }

        if trimmed.ends_with('?') {
            return WorkerKind::Search;
        }

        if task.contains('\n') && has_code_marker {
            return WorkerKind::Exec;
        }

        if task.contains('(') && task.contains(')') && contains_any(task, BUILTIN_CALLS) {
            return WorkerKind::Exec;
        }

        WorkerKind::Search
    }
}
