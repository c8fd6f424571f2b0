//! Reserved-word table
//!
//! Built once per process and handed to the lexer by reference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

macro_rules! keywords {
    ($($variant:ident => $text:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Keyword {
            $($variant),*
        }

        impl Keyword {
            pub const ALL: &'static [Keyword] = &[$(Keyword::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Keyword::$variant => $text),*
                }
            }
        }
    };
}

keywords! {
    // declarations
    Spec => "spec",
    Use => "use",
    Include => "include",
    Alias => "alias",
    Flow => "flow",
    Pipeline => "pipeline",
    Record => "record",
    Page => "page",
    Tool => "tool",
    Ai => "ai",
    Agent => "agent",
    Team => "team",
    Policy => "policy",
    Job => "job",
    Prompt => "prompt",
    Route => "route",
    Purity => "purity",
    Input => "input",
    Output => "output",
    Tools => "tools",
    Expose => "expose",
    Model => "model",
    Provider => "provider",
    SystemPrompt => "system_prompt",
    Kind => "kind",
    Capability => "capability",
    Grant => "grant",
    Title => "title",
    Text => "text",
    Form => "form",
    Table => "table",
    Button => "button",
    Calls => "calls",
    // statements
    Let => "let",
    Set => "set",
    Constant => "constant",
    If => "if",
    Else => "else",
    Repeat => "repeat",
    Up => "up",
    To => "to",
    Times => "times",
    For => "for",
    Each => "each",
    In => "in",
    Match => "match",
    When => "when",
    Otherwise => "otherwise",
    Parallel => "parallel",
    Run => "run",
    Async => "async",
    Await => "await",
    Return => "return",
    Yield => "yield",
    Tick => "tick",
    Advance => "advance",
    Time => "time",
    By => "by",
    Save => "save",
    Find => "find",
    Where => "where",
    With => "with",
    As => "as",
    Call => "call",
    Enqueue => "enqueue",
    State => "state",
    Identity => "identity",
    // operators
    Is => "is",
    Not => "not",
    And => "and",
    Or => "or",
    Equal => "equal",
    Greater => "greater",
    Less => "less",
    Than => "than",
    At => "at",
    Least => "least",
    Most => "most",
    Between => "between",
    Strictly => "strictly",
    One => "one",
    Of => "of",
    // record constraints
    Must => "must",
    Be => "be",
    Present => "present",
    Unique => "unique",
    Pattern => "pattern",
    Have => "have",
    Length => "length",
    Order => "order",
    // types
    Number => "number",
    Int => "int",
    Integer => "integer",
    Boolean => "boolean",
    Bool => "bool",
    Json => "json",
    String => "string",
    Str => "str",
}

/// Lookup table from spelling to keyword. `true`, `false` and `null` are
/// literal tokens rather than keywords and are handled by the lexer.
#[derive(Debug)]
pub struct KeywordTable {
    by_text: HashMap<&'static str, Keyword>,
}

impl KeywordTable {
    fn build() -> Self {
        let by_text = Keyword::ALL.iter().map(|k| (k.as_str(), *k)).collect();
        Self { by_text }
    }

    /// The process-wide table.
    pub fn standard() -> &'static KeywordTable {
        static TABLE: OnceLock<KeywordTable> = OnceLock::new();
        TABLE.get_or_init(KeywordTable::build)
    }

    pub fn lookup(&self, word: &str) -> Option<Keyword> {
        self.by_text.get(word).copied()
    }

    pub fn is_reserved(&self, word: &str) -> bool {
        self.by_text.contains_key(word) || matches!(word, "true" | "false" | "null")
    }

    pub fn len(&self) -> usize {
        self.by_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_text.is_empty()
    }
}

impl Keyword {
    /// Keywords that name a base type or one of its built-in aliases.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Keyword::Text
                | Keyword::Number
                | Keyword::Int
                | Keyword::Integer
                | Keyword::Boolean
                | Keyword::Bool
                | Keyword::Json
                | Keyword::String
                | Keyword::Str
        )
    }
}
