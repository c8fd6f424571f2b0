//! Grammar snapshot and alternate parser backends
//!
//! The reference grammar is published as a versioned text snapshot. An
//! alternate [`ParserBackend`] (for example one generated from the snapshot)
//! is only used when it declares the same snapshot hash as the reference;
//! otherwise [`select_backend`] logs a warning and returns the reference
//! parser.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::warn;

use super::{ParseOptions, ParseResult, Parser, Program};
use crate::lexer::Token;

pub const GRAMMAR_VERSION: &str = "1.0";

const GRAMMAR_TEXT: &str = r#"program      = [ "spec" "is" STRING NEWLINE ] { declaration }
declaration  = use | alias | record | flow | tool | ai | agent | team
             | policy | job | prompt | page | route
use          = ( "use" STRING [ "as" NAME ] | "include" STRING ) NEWLINE
alias        = "alias" STRING "is" type NEWLINE
record       = "record" STRING block( field | "order" "by" WORD NEWLINE )
field        = key [ "is" ] type { "must" constraint [ "and" ] } NEWLINE
constraint   = "be" "present" | "be" "unique"
             | "be" ( "greater" "than" | "less" "than" | "at" "least" | "at" "most" ) NUMBER
             | "match" "pattern" STRING
             | "have" "length" "at" ( "least" | "most" ) NUMBER
flow         = ( "flow" | "pipeline" ) STRING block( header | statement )
header       = "purity" "is" STRING NEWLINE | params( "input" ) | params( "output" )
params(k)    = k block( key "is" type NEWLINE )
tool         = "tool" STRING block( property | params( "input" ) | params( "output" ) )
ai           = "ai" STRING block( property | "tools" block( "expose" STRING NEWLINE ) )
agent        = "agent" STRING block( property )
team         = "team" STRING block( "agent" "is" STRING NEWLINE )
policy       = "policy" STRING block( "flow" "is" STRING NEWLINE | "grant" STRING NEWLINE )
job          = "job" STRING block( property )
prompt       = "prompt" STRING block( property )
page         = "page" STRING block( property | "button" STRING block( "calls" "flow" STRING NEWLINE ) )
route        = "route" STRING block( property | params( "request" ) | params( "response" ) )
property     = WORD "is" STRING NEWLINE

statement    = "let" NAME "is" value [ "constant" ] NEWLINE
             | "let" NAME "is" "async" toolcall
             | "let" block( NAME "is" expr [ "constant" ] NEWLINE )
             | "set" target "is" value NEWLINE
             | "set" target "with" block( assign )
             | "if" expr block( statement ) [ "else" ( if | block( statement ) ) ]
             | "repeat" "up" "to" expr "times" block( statement )
             | "for" "each" NAME "in" expr block( statement )
             | "match" expr block( { "when" expr block( statement ) } [ "otherwise" block( statement ) ] )
             | "parallel" block( { "run" STRING block( statement ) } )
             | "await" NAME NEWLINE
             | ( "return" | "yield" ) expr NEWLINE
             | "tick" [ expr ] NEWLINE | "advance" "time" "by" expr NEWLINE
             | "save" STRING "with" expr [ "as" NAME ] NEWLINE
             | "find" STRING "where" expr [ "as" NAME ] NEWLINE
             | "enqueue" "job" STRING NEWLINE
value        = toolcall | flowcall | expr
toolcall     = WORD { WORD } ":" NEWLINE [ INDENT { assign } DEDENT ]
flowcall     = "call" ( "flow" | "pipeline" ) STRING
               block( "input" block( assign ) "output" block( WORD NEWLINE ) )
assign       = key "is" expr NEWLINE
target       = ( NAME | "state" "." WORD ) { "." WORD }

expr         = or
or           = and { "or" and }
and          = not { "and" not }
not          = "not" not | comparison
comparison   = additive [ compare additive
                        | "is" "one" "of" additive
                        | "is" [ "strictly" ] "between" additive "and" additive ]
compare      = "==" | "!=" | "<" | ">" | "<=" | ">="
             | "is" [ "not" [ "equal" "to" ] | "equal" "to" | "greater" "than"
                    | "less" "than" | "at" "least" | "at" "most" ]
additive     = multiplicative { ( "+" | "-" ) multiplicative }
multiplicative = exponent { ( "*" | "/" | "%" ) exponent }
exponent     = unary [ "**" exponent ]
unary        = "-" unary | postfix
postfix      = primary { "." WORD | "[" expr "]" }
primary      = NUMBER | STRING | "true" | "false" | "null" | NAME
             | "input" | "state" | "identity"
             | "(" expr ")" | "[" [ expr { "," expr } ] "]"
             | "{" [ key ":" expr { "," key ":" expr } ] "}"
block(x)     = ":" NEWLINE INDENT { x } DEDENT
key          = WORD | STRING
"#;

/// A versioned grammar text identified by its SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarSnapshot {
    pub version: String,
    pub text: String,
    pub hash: String,
}

impl GrammarSnapshot {
    pub fn new(version: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        Self {
            version: version.into(),
            text,
            hash,
        }
    }

    /// The grammar the reference parser implements.
    pub fn reference() -> &'static GrammarSnapshot {
        static SNAPSHOT: OnceLock<GrammarSnapshot> = OnceLock::new();
        SNAPSHOT.get_or_init(|| GrammarSnapshot::new(GRAMMAR_VERSION, GRAMMAR_TEXT))
    }
}

/// A parser implementation that can stand in for the reference parser.
pub trait ParserBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Hash of the grammar snapshot this backend was certified against.
    fn grammar_hash(&self) -> &str;

    fn parse(&self, tokens: &[Token], options: &ParseOptions) -> ParseResult<Program>;
}

/// The hand-written recursive descent parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceParser;

impl ParserBackend for ReferenceParser {
    fn name(&self) -> &str {
        "reference"
    }

    fn grammar_hash(&self) -> &str {
        &GrammarSnapshot::reference().hash
    }

    fn parse(&self, tokens: &[Token], options: &ParseOptions) -> ParseResult<Program> {
        Parser::new(tokens, options).parse_program()
    }
}

/// Pick `candidate` when it is certified against the reference snapshot.
pub fn select_backend<'a>(candidate: Option<&'a dyn ParserBackend>) -> &'a dyn ParserBackend {
    static REFERENCE: ReferenceParser = ReferenceParser;
    let Some(backend) = candidate else {
        return &REFERENCE;
    };
    let expected = &GrammarSnapshot::reference().hash;
    if backend.grammar_hash() == expected.as_str() {
        return backend;
    }
    warn!(
        backend = backend.name(),
        declared = backend.grammar_hash(),
        expected = expected.as_str(),
        "parser backend is not certified against the reference grammar; using reference parser"
    );
    &REFERENCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParseError, ParseOptions};

    struct Stub {
        hash: String,
    }

    impl ParserBackend for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        fn grammar_hash(&self) -> &str {
            &self.hash
        }

        fn parse(&self, _tokens: &[Token], _options: &ParseOptions) -> ParseResult<Program> {
            Err(ParseError::Syntax {
                message: "stub".to_string(),
                line: 1,
                column: 1,
            })
        }
    }

    #[test]
    fn test_snapshot_hash_is_stable_hex() {
        let snapshot = GrammarSnapshot::reference();
        assert_eq!(snapshot.version, GRAMMAR_VERSION);
        assert_eq!(snapshot.hash.len(), 64);
        assert!(snapshot.hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            snapshot.hash,
            GrammarSnapshot::new(GRAMMAR_VERSION, GRAMMAR_TEXT).hash
        );
        assert_ne!(snapshot.hash, GrammarSnapshot::new("1.0", "other").hash);
    }

    #[test]
    fn test_uncertified_backend_falls_back() {
        let stub = Stub {
            hash: "0".repeat(64),
        };
        assert_eq!(select_backend(Some(&stub as &dyn ParserBackend)).name(), "reference");
        assert_eq!(select_backend(None).name(), "reference");

        let certified = Stub {
            hash: GrammarSnapshot::reference().hash.clone(),
        };
        assert_eq!(select_backend(Some(&certified as &dyn ParserBackend)).name(), "stub");
    }
}
